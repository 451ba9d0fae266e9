//! Read and write commands that talk to the server with a stored session.
//!
//! `complete` and `scan` mirror the confirmed earn into a [`LedgerView`]
//! loaded right before the call, so the printed balance is always the one
//! the server committed.

use std::fmt::Write as _;
use std::io::Read;

use edutoken_shared::api::{
    self, CreateEventReq, CreateTaskReq, EarnResp, EventDto, NotificationDto, ScanReq, StatsDto,
    TaskDto,
};
use edutoken_shared::domain::{Balance, Reward, TokenKind};
use edutoken_shared::jwt;
use edutoken_shared::ledger::{LedgerView, NotificationFeed};
use edutoken_shared::qr::EventQrPayload;
use tracing::{debug, info};

use crate::cli::Command;
use crate::config::ClientConfig;
use crate::AppError;

struct Session<'a> {
    server: &'a str,
    token: &'a str,
    user_id: String,
}

impl<'a> Session<'a> {
    fn from_config(cfg: &'a ClientConfig) -> Result<Self, AppError> {
        let token = cfg.require_token()?;
        let claims = jwt::decode_unverified(token)
            .map_err(|e| AppError::Config(format!("stored token is unreadable: {e}")))?;
        Ok(Self {
            server: &cfg.server_url,
            token,
            user_id: claims.sub,
        })
    }

    async fn ledger_view(&self) -> Result<LedgerView, AppError> {
        let balance = api::rest::user_balance(self.server, self.token, &self.user_id).await?;
        let feed = api::rest::list_notifications(self.server, self.token, None).await?;
        Ok(LedgerView::from_snapshot(&balance, feed))
    }
}

pub async fn run(cfg: &ClientConfig, command: Command) -> Result<(), AppError> {
    let s = Session::from_config(cfg)?;
    let (server, token) = (s.server, s.token);
    match command {
        Command::Whoami => {
            let me = api::rest::me(server, token).await?;
            let role = me.role.map(|r| r.to_string());
            println!(
                "{} ({})\nid: {}",
                me.email,
                role.as_deref().unwrap_or("no role yet"),
                me.id
            );
        }
        Command::Balance { user } => {
            let user_id = user.unwrap_or_else(|| s.user_id.clone());
            let b = api::rest::user_balance(server, token, &user_id).await?;
            println!("{}", render_balance(&b.balance()));
        }
        Command::Tasks => {
            let tasks = api::rest::list_tasks(server, token).await?;
            print_list(tasks.iter().map(render_task), "No tasks.");
        }
        Command::CreateTask {
            title,
            amount,
            kind,
            description,
            due,
            assignee,
        } => {
            let req = CreateTaskReq {
                title,
                description,
                due_date: due,
                reward: positive_reward(amount, kind.into())?,
                assignee_id: assignee,
            };
            let task = api::rest::create_task(server, token, &req).await?;
            println!("Created {}", render_task(&task));
        }
        Command::DeleteTask { id } => {
            api::rest::delete_task(server, token, id).await?;
            println!("Deleted task #{id}.");
        }
        Command::Complete { id } => {
            let view = s.ledger_view().await?;
            let resp = api::rest::complete_task(server, token, id).await;
            println!("{}", mirror_earn(view, resp)?);
        }
        Command::Events => {
            let events = api::rest::list_events(server, token).await?;
            print_list(events.iter().map(render_event), "No events.");
        }
        Command::CreateEvent {
            title,
            starts_at,
            amount,
            kind,
            location,
            description,
        } => {
            let req = CreateEventReq {
                title,
                description,
                starts_at,
                location,
                reward: positive_reward(amount, kind.into())?,
            };
            let event = api::rest::create_event(server, token, &req).await?;
            println!("Created {}", render_event(&event));
        }
        Command::DeleteEvent { id } => {
            api::rest::delete_event(server, token, id).await?;
            println!("Deleted event #{id}.");
        }
        Command::Qr { id } => {
            let qr = api::rest::event_qr(server, token, id).await?;
            println!("{}", qr.payload);
        }
        Command::Scan { payload } => {
            let payload = read_payload(&payload)?;
            // Reject malformed payloads before touching the server
            let parsed = EventQrPayload::decode(&payload)
                .map_err(|e| AppError::Input(format!("not an event QR code: {e}")))?;
            debug!(event_id = %parsed.event_id, "scan: payload decoded");
            let view = s.ledger_view().await?;
            let resp = api::rest::scan(server, token, &ScanReq { payload }).await;
            println!("{}", mirror_earn(view, resp)?);
        }
        Command::Notifications { limit, mark_read } => {
            let items = api::rest::list_notifications(server, token, limit).await?;
            let mut feed = NotificationFeed::with_window(items.len());
            feed.reset(items);
            println!("{}", render_feed(&feed));
            if mark_read {
                for n in feed.iter().filter(|n| !n.read) {
                    api::rest::mark_notification_read(server, token, n.id).await?;
                }
            }
        }
        Command::Students => {
            let students = api::rest::list_students(server, token).await?;
            print_list(
                students.iter().map(|s| format!("{}  {}", s.id, s.email)),
                "No students.",
            );
        }
        Command::Stats => {
            let stats = api::rest::stats(server, token).await?;
            println!("{}", render_stats(&stats));
        }
        Command::Signup { .. }
        | Command::Login { .. }
        | Command::Logout
        | Command::ChooseRole { .. } => {
            return Err(AppError::Input("not a dashboard command".into()));
        }
    }
    Ok(())
}

/// Applies a server-confirmed earn to `view`. On error the view is dropped
/// untouched and the error is returned.
fn mirror_earn(
    mut view: LedgerView,
    resp: Result<EarnResp, api::rest::RestError>,
) -> Result<String, AppError> {
    let resp = resp?;
    let before = view.balance();
    view.apply_earn(&resp);
    info!(
        academic = view.balance().academic,
        social = view.balance().social,
        "earn mirrored"
    );
    Ok(render_earn(before, &resp.reward, &view))
}

fn positive_reward(amount: i32, kind: TokenKind) -> Result<Reward, AppError> {
    let reward = Reward::new(amount, kind);
    if !reward.is_valid() {
        return Err(AppError::Input("amount must be positive".into()));
    }
    Ok(reward)
}

fn read_payload(arg: &str) -> Result<String, AppError> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf.trim().to_string())
}

fn print_list(lines: impl Iterator<Item = String>, empty: &str) {
    let mut any = false;
    for line in lines {
        any = true;
        println!("{line}");
    }
    if !any {
        println!("{empty}");
    }
}

pub fn render_balance(b: &Balance) -> String {
    format!(
        "Academic: {}  Social: {}  Total: {}",
        b.academic,
        b.social,
        b.total()
    )
}

pub fn render_task(t: &TaskDto) -> String {
    let mut out = format!(
        "[{}] #{} {} ({})",
        if t.completed { "x" } else { " " },
        t.id,
        t.title,
        t.reward
    );
    if let Some(due) = &t.due_date {
        let _ = write!(out, " due {due}");
    }
    out
}

pub fn render_event(e: &EventDto) -> String {
    let mut out = format!("#{} {} [{}] {}", e.id, e.title, e.status, e.starts_at);
    if !e.location.is_empty() {
        let _ = write!(out, " @ {}", e.location);
    }
    let _ = write!(out, " ({})", e.reward);
    out
}

pub fn render_notification(n: &NotificationDto) -> String {
    format!(
        "{} [{}] {}  {}",
        if n.read { " " } else { "*" },
        n.severity,
        n.message,
        n.created_at
    )
}

pub fn render_feed(feed: &NotificationFeed) -> String {
    if feed.is_empty() {
        return "No notifications.".to_string();
    }
    let mut out = String::new();
    for n in feed.iter() {
        let _ = writeln!(out, "{}", render_notification(n));
    }
    let _ = write!(out, "{} unread", feed.unread());
    out
}

pub fn render_earn(before: Balance, reward: &Reward, view: &LedgerView) -> String {
    let after = view.balance();
    let mut out = format!(
        "+{reward}\n{} -> {}",
        render_balance(&before),
        render_balance(&after)
    );
    if let Some(n) = view.feed().newest() {
        let _ = write!(out, "\n{}", n.message);
    }
    out
}

pub fn render_stats(s: &StatsDto) -> String {
    format!(
        "Events: {} ({} active, {} upcoming), {} tokens offered\n\
         Students: {}\n\
         Tokens held: {} academic, {} social\n\
         Tasks: {} open, {} completed",
        s.total_events,
        s.active_events,
        s.upcoming_events,
        s.tokens_offered,
        s.students,
        s.academic_held,
        s.social_held,
        s.open_tasks,
        s.completed_tasks
    )
}
