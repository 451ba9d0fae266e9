//! Client-side mirror of a user's balance and notification feed.
//!
//! The view only changes from server-confirmed data: a snapshot fetched
//! from the server or an [`EarnResp`] returned by a successful earn.

use std::collections::VecDeque;

use crate::api::{BalanceDto, EarnResp, NotificationDto};
use crate::domain::Balance;

/// Default number of notifications kept for display.
pub const FEED_WINDOW: usize = 10;

/// Newest-first notification list capped to a display window.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    items: VecDeque<NotificationDto>,
    window: usize,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::with_window(FEED_WINDOW)
    }
}

impl NotificationFeed {
    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        Self {
            items: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Replaces the feed with `items`, which are expected newest-first.
    pub fn reset(&mut self, items: Vec<NotificationDto>) {
        self.items = items.into_iter().take(self.window).collect();
    }

    pub fn push(&mut self, item: NotificationDto) {
        if self.items.iter().any(|n| n.id == item.id) {
            return;
        }
        self.items.push_front(item);
        self.items.truncate(self.window);
    }

    pub fn newest(&self) -> Option<&NotificationDto> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationDto> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    balance: Balance,
    feed: NotificationFeed,
}

impl LedgerView {
    pub fn from_snapshot(balance: &BalanceDto, notifications: Vec<NotificationDto>) -> Self {
        let mut feed = NotificationFeed::default();
        feed.reset(notifications);
        Self {
            balance: balance.balance(),
            feed,
        }
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn feed(&self) -> &NotificationFeed {
        &self.feed
    }

    /// Mirrors a confirmed earn. The server balance is authoritative, so it
    /// replaces the local counters instead of being added to them.
    pub fn apply_earn(&mut self, resp: &EarnResp) {
        self.balance = resp.balance.balance();
        if let Some(n) = &resp.notification {
            self.feed.push(n.clone());
        }
    }
}
