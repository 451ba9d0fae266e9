use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

/// The two independent point categories tracked per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Academic,
    Social,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Academic => "academic",
            TokenKind::Social => "social",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown token kind: {0}")]
pub struct UnknownTokenKind(pub String);

impl FromStr for TokenKind {
    type Err = UnknownTokenKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "academic" => Ok(TokenKind::Academic),
            "social" => Ok(TokenKind::Social),
            other => Err(UnknownTokenKind(other.to_string())),
        }
    }
}

/// Amount of tokens of one kind granted by a task or an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub amount: i32,
    pub kind: TokenKind,
}

impl Reward {
    pub fn new(amount: i32, kind: TokenKind) -> Self {
        Self { amount, kind }
    }

    pub fn academic(amount: i32) -> Self {
        Self::new(amount, TokenKind::Academic)
    }

    pub fn social(amount: i32) -> Self {
        Self::new(amount, TokenKind::Social)
    }

    pub fn is_valid(&self) -> bool {
        self.amount > 0
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} tokens", self.amount, self.kind)
    }
}

/// Per-user counters. Both stay non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub academic: i32,
    pub social: i32,
}

impl Balance {
    pub fn new(academic: i32, social: i32) -> Self {
        Self { academic, social }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns the balance with `reward` added to the matching counter.
    /// `None` on overflow.
    pub fn credited(self, reward: Reward) -> Option<Self> {
        let mut out = self;
        match reward.kind {
            TokenKind::Academic => out.academic = out.academic.checked_add(reward.amount)?,
            TokenKind::Social => out.social = out.social.checked_add(reward.amount)?,
        }
        Some(out)
    }

    pub fn total(&self) -> i64 {
        self.academic as i64 + self.social as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Severity::Success),
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Active,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Active => "active",
        }
    }

    pub fn at(starts_at: OffsetDateTime, now: OffsetDateTime) -> Self {
        if starts_at > now {
            EventStatus::Upcoming
        } else {
            EventStatus::Active
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message stored in the notification feed after a successful earn.
pub fn earn_message(reward: &Reward, source: &str) -> String {
    format!("Earned {} from {}", reward, source)
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
