pub mod models;
pub mod schema;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use edutoken_shared::auth::Role;
use edutoken_shared::domain::{Balance, Reward, Severity, TokenKind};
use models::{
    BalanceRow, Event, NewBalance, NewEvent, NewNotification, NewSession, NewTask, NewUser,
    Notification, Session, Task, User,
};
use tracing::{info, trace};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// A uniqueness rule was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Seed entry for a user account provided by configuration.
#[derive(Debug, Clone)]
pub struct SeedUser {
    pub email: String,
    pub password_hash: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct TaskInput {
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub reward: Reward,
    pub assignee_id: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct EventInput {
    pub title: String,
    pub description: String,
    pub starts_at: NaiveDateTime,
    pub location: String,
    pub reward: Reward,
    pub created_by: String,
}

/// Result of an atomic counter increment.
#[derive(Debug)]
pub enum Increment {
    Applied(BalanceRow),
    /// No balance row exists for the user.
    Missing,
    /// The counter would pass `i32::MAX`; the row is unchanged.
    Overflow,
}

/// Result of a student's attempt to complete a task.
#[derive(Debug)]
pub enum CompleteOutcome {
    Completed(Task),
    NotFound,
    AlreadyCompleted,
    NotAssigned,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_events: i64,
    pub active_events: i64,
    pub tokens_offered: i64,
    pub students: i64,
    pub academic_held: i64,
    pub social_held: i64,
    pub open_tasks: i64,
    pub completed_tasks: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;
        let store = Store { pool };

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        store
            .with_conn(|conn| {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await?;

        Ok(store)
    }

    /// Runs `f` on a pooled connection inside `spawn_blocking`.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut conn)
        })
        .await?
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            diesel::sql_query("SELECT 1;").execute(conn)?;
            Ok(())
        })
        .await
    }

    // Fixtures

    /// Upserts configured accounts by email. Existing ids are kept, and so is
    /// a stored role when the entry does not name one.
    pub async fn seed_users(&self, seed: &[SeedUser]) -> Result<(), StorageError> {
        use schema::users;
        let seed = seed.to_owned();
        self.with_conn(move |conn| {
            for u in &seed {
                let id = uuid::Uuid::new_v4().to_string();
                let role = u.role.map(|r| r.as_str());
                let new_user = NewUser {
                    id: &id,
                    email: &u.email,
                    password_hash: &u.password_hash,
                    role,
                };
                let upsert = diesel::insert_into(users::table)
                    .values(&new_user)
                    .on_conflict(users::email)
                    .do_update();
                // A role chosen at runtime survives seeding unless config pins one.
                match role {
                    Some(r) => upsert
                        .set((
                            users::password_hash.eq(&u.password_hash),
                            users::role.eq(Some(r)),
                        ))
                        .execute(conn)?,
                    None => upsert
                        .set(users::password_hash.eq(&u.password_hash))
                        .execute(conn)?,
                };
            }
            Ok(())
        })
        .await
    }

    /// Inserts fixture tasks and events, each only into an empty table.
    pub async fn seed_fixtures(
        &self,
        task_inputs: &[TaskInput],
        event_inputs: &[EventInput],
    ) -> Result<(), StorageError> {
        use schema::{events, tasks};
        let task_inputs = task_inputs.to_owned();
        let event_inputs = event_inputs.to_owned();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                let task_count: i64 = tasks::table.count().get_result(conn)?;
                if task_count == 0 && !task_inputs.is_empty() {
                    for t in &task_inputs {
                        insert_task(conn, t)?;
                    }
                    info!(count = task_inputs.len(), "seeded fixture tasks");
                }
                let event_count: i64 = events::table.count().get_result(conn)?;
                if event_count == 0 && !event_inputs.is_empty() {
                    for e in &event_inputs {
                        insert_event(conn, e)?;
                    }
                    info!(count = event_inputs.len(), "seeded fixture events");
                }
                Ok(())
            })
        })
        .await
    }

    // Users

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        role: Option<Role>,
    ) -> Result<User, StorageError> {
        use schema::users;
        let email = email.to_string();
        let hash = password_hash.to_string();
        self.with_conn(move |conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let new_user = NewUser {
                id: &id,
                email: &email,
                password_hash: &hash,
                role: role.map(|r| r.as_str()),
            };
            match diesel::insert_into(users::table)
                .values(&new_user)
                .returning(User::as_returning())
                .get_result(conn)
            {
                Ok(u) => Ok(u),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Err(
                    StorageError::Conflict(format!("email already registered: {email}")),
                ),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        use schema::users;
        let email = email.to_string();
        self.with_conn(move |conn| {
            Ok(users::table
                .filter(users::email.eq(&email))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        use schema::users;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            Ok(users::table
                .filter(users::id.eq(&uid))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    /// Sets the role only when none has been chosen yet.
    /// Returns `false` when the user is missing or already has a role.
    pub async fn set_role_if_unset(&self, user_id: &str, role: Role) -> Result<bool, StorageError> {
        use schema::users;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                users::table
                    .filter(users::id.eq(&uid))
                    .filter(users::role.is_null()),
            )
            .set(users::role.eq(Some(role.as_str())))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn list_students(&self) -> Result<Vec<User>, StorageError> {
        use schema::users;
        self.with_conn(|conn| {
            Ok(users::table
                .filter(users::role.eq(Role::Student.as_str()))
                .order(users::email.asc())
                .select(User::as_select())
                .load(conn)?)
        })
        .await
    }

    // Sessions

    pub async fn create_session(&self, jti: &str, user_id: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti.to_string();
        let u = user_id.to_string();
        self.with_conn(move |conn| {
            let new = NewSession {
                jti: &j,
                user_id: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, jti: &str) -> Result<Option<Session>, StorageError> {
        use schema::sessions;
        let j = jti.to_string();
        self.with_conn(move |conn| {
            Ok(sessions::table
                .filter(sessions::jti.eq(&j))
                .select(Session::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn delete_session(&self, jti: &str) -> Result<bool, StorageError> {
        use schema::sessions;
        let j = jti.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(sessions::table.filter(sessions::jti.eq(&j))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti: &str,
        cutoff: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions;
        let j = jti.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated = diesel::update(
                sessions::table
                    .filter(sessions::jti.eq(&j))
                    .filter(sessions::last_used_at.ge(cutoff)),
            )
            .set(sessions::last_used_at.eq(now))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    // Balances

    pub async fn find_balance(&self, user_id: &str) -> Result<Option<BalanceRow>, StorageError> {
        use schema::balances;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            Ok(balances::table
                .filter(balances::user_id.eq(&uid))
                .select(BalanceRow::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    /// Inserts the first balance row for a user.
    /// Returns `None` when a row already exists; the existing row is untouched.
    pub async fn insert_balance(
        &self,
        user_id: &str,
        balance: Balance,
    ) -> Result<Option<BalanceRow>, StorageError> {
        use schema::balances;
        if balance.academic < 0 || balance.social < 0 {
            return Err(StorageError::InvalidInput(
                "balance counters must be non-negative".into(),
            ));
        }
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            let row = NewBalance {
                user_id: &uid,
                academic: balance.academic,
                social: balance.social,
                updated_at: Utc::now().naive_utc(),
            };
            let inserted = diesel::insert_into(balances::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)?;
            if inserted == 0 {
                trace!(user_id = %uid, "insert_balance: row already present");
                return Ok(None);
            }
            Ok(Some(
                balances::table
                    .filter(balances::user_id.eq(&uid))
                    .select(BalanceRow::as_select())
                    .first(conn)?,
            ))
        })
        .await
    }

    /// Adds `reward` to the matching counter in a single UPDATE, so concurrent
    /// increments never overwrite each other. The upper bound is part of the
    /// UPDATE filter, so a counter can never be pushed past `i32::MAX`.
    pub async fn increment_balance(
        &self,
        user_id: &str,
        reward: Reward,
    ) -> Result<Increment, StorageError> {
        use schema::balances;
        if reward.amount <= 0 {
            return Err(StorageError::InvalidInput(format!(
                "reward amount must be positive, got {}",
                reward.amount
            )));
        }
        let uid = user_id.to_string();
        let ceiling = i32::MAX - reward.amount;
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let target = balances::table.filter(balances::user_id.eq(&uid));
            let row = match reward.kind {
                TokenKind::Academic => {
                    diesel::update(target.filter(balances::academic.le(ceiling)))
                        .set((
                            balances::academic.eq(balances::academic + reward.amount),
                            balances::updated_at.eq(now),
                        ))
                        .returning(BalanceRow::as_returning())
                        .get_result(conn)
                        .optional()?
                }
                TokenKind::Social => {
                    diesel::update(target.filter(balances::social.le(ceiling)))
                        .set((
                            balances::social.eq(balances::social + reward.amount),
                            balances::updated_at.eq(now),
                        ))
                        .returning(BalanceRow::as_returning())
                        .get_result(conn)
                        .optional()?
                }
            };
            if let Some(row) = row {
                return Ok(Increment::Applied(row));
            }
            let exists: bool = diesel::select(diesel::dsl::exists(
                balances::table.filter(balances::user_id.eq(&uid)),
            ))
            .get_result(conn)?;
            if exists {
                trace!(user_id = %uid, kind = %reward.kind, "increment_balance: bound reached");
                Ok(Increment::Overflow)
            } else {
                Ok(Increment::Missing)
            }
        })
        .await
    }

    // Notifications

    pub async fn append_notification(
        &self,
        user_id: &str,
        message: &str,
        severity: Severity,
    ) -> Result<Notification, StorageError> {
        use schema::notifications;
        let uid = user_id.to_string();
        let msg = message.to_string();
        self.with_conn(move |conn| {
            let new = NewNotification {
                user_id: &uid,
                message: &msg,
                severity: severity.as_str(),
            };
            Ok(diesel::insert_into(notifications::table)
                .values(&new)
                .returning(Notification::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    /// Newest-first, at most `limit` rows.
    pub async fn list_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError> {
        use schema::notifications;
        let uid = user_id.to_string();
        let limit = limit.max(1) as i64;
        self.with_conn(move |conn| {
            Ok(notifications::table
                .filter(notifications::user_id.eq(&uid))
                .order((notifications::created_at.desc(), notifications::id.desc()))
                .limit(limit)
                .select(Notification::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn unread_notification_count(&self, user_id: &str) -> Result<i64, StorageError> {
        use schema::notifications;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            Ok(notifications::table
                .filter(notifications::user_id.eq(&uid))
                .filter(notifications::is_read.eq(false))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    /// Returns `false` when the notification does not exist or belongs to
    /// another user.
    pub async fn mark_notification_read(&self, user_id: &str, id: i32) -> Result<bool, StorageError> {
        use schema::notifications;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                notifications::table
                    .filter(notifications::id.eq(id))
                    .filter(notifications::user_id.eq(&uid)),
            )
            .set(notifications::is_read.eq(true))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    // Tasks

    pub async fn create_task(&self, input: TaskInput) -> Result<Task, StorageError> {
        self.with_conn(move |conn| insert_task(conn, &input)).await
    }

    /// Newest-first. With `visible_to`, only unassigned tasks and tasks
    /// assigned to that user are returned.
    pub async fn list_tasks(&self, visible_to: Option<&str>) -> Result<Vec<Task>, StorageError> {
        use schema::tasks;
        let visible_to = visible_to.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let mut query = tasks::table
                .order((tasks::created_at.desc(), tasks::id.desc()))
                .select(Task::as_select())
                .into_boxed();
            if let Some(uid) = visible_to {
                query = query.filter(
                    tasks::assignee_id
                        .is_null()
                        .or(tasks::assignee_id.assume_not_null().eq(uid)),
                );
            }
            Ok(query.load(conn)?)
        })
        .await
    }

    pub async fn get_task(&self, task_id: i32) -> Result<Option<Task>, StorageError> {
        use schema::tasks;
        self.with_conn(move |conn| {
            Ok(tasks::table
                .filter(tasks::id.eq(task_id))
                .select(Task::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn delete_task(&self, task_id: i32) -> Result<bool, StorageError> {
        use schema::tasks;
        self.with_conn(move |conn| {
            let deleted = diesel::delete(tasks::table.filter(tasks::id.eq(task_id))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Flips the completion flag in one conditional UPDATE, so a task can be
    /// completed at most once.
    pub async fn complete_task(
        &self,
        task_id: i32,
        user_id: &str,
    ) -> Result<CompleteOutcome, StorageError> {
        use schema::tasks;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated = diesel::update(
                tasks::table
                    .filter(tasks::id.eq(task_id))
                    .filter(tasks::completed.eq(false))
                    .filter(
                        tasks::assignee_id
                            .is_null()
                            .or(tasks::assignee_id.assume_not_null().eq(&uid)),
                    ),
            )
            .set((
                tasks::completed.eq(true),
                tasks::completed_by.eq(Some(uid.as_str())),
                tasks::completed_at.eq(Some(now)),
            ))
            .returning(Task::as_returning())
            .get_result(conn)
            .optional()?;
            if let Some(task) = updated {
                return Ok(CompleteOutcome::Completed(task));
            }
            let existing = tasks::table
                .filter(tasks::id.eq(task_id))
                .select(Task::as_select())
                .first(conn)
                .optional()?;
            Ok(match existing {
                None => CompleteOutcome::NotFound,
                Some(t) if t.completed => CompleteOutcome::AlreadyCompleted,
                Some(_) => CompleteOutcome::NotAssigned,
            })
        })
        .await
    }

    /// Reverts a completion made by `user_id`.
    pub async fn reopen_task(&self, task_id: i32, user_id: &str) -> Result<bool, StorageError> {
        use schema::tasks;
        let uid = user_id.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                tasks::table
                    .filter(tasks::id.eq(task_id))
                    .filter(tasks::completed_by.eq(&uid)),
            )
            .set((
                tasks::completed.eq(false),
                tasks::completed_by.eq(None::<String>),
                tasks::completed_at.eq(None::<NaiveDateTime>),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    // Events

    pub async fn create_event(&self, input: EventInput) -> Result<Event, StorageError> {
        self.with_conn(move |conn| insert_event(conn, &input)).await
    }

    pub async fn list_events(&self) -> Result<Vec<Event>, StorageError> {
        use schema::events;
        self.with_conn(|conn| {
            Ok(events::table
                .order((events::created_at.desc(), events::id.desc()))
                .select(Event::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_event(&self, event_id: i32) -> Result<Option<Event>, StorageError> {
        use schema::events;
        self.with_conn(move |conn| {
            Ok(events::table
                .filter(events::id.eq(event_id))
                .select(Event::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn delete_event(&self, event_id: i32) -> Result<bool, StorageError> {
        use schema::events;
        self.with_conn(move |conn| {
            let deleted =
                diesel::delete(events::table.filter(events::id.eq(event_id))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Statistics

    pub async fn stats(&self, now: NaiveDateTime) -> Result<Stats, StorageError> {
        use diesel::dsl::sum;
        use schema::{balances, events, tasks, users};
        self.with_conn(move |conn| {
            let total_events: i64 = events::table.count().get_result(conn)?;
            let active_events: i64 = events::table
                .filter(events::starts_at.le(now))
                .count()
                .get_result(conn)?;
            let tokens_offered: Option<i64> = events::table
                .select(sum(events::reward_amount))
                .first(conn)?;
            let students: i64 = users::table
                .filter(users::role.eq(Role::Student.as_str()))
                .count()
                .get_result(conn)?;
            let academic_held: Option<i64> = balances::table
                .select(sum(balances::academic))
                .first(conn)?;
            let social_held: Option<i64> = balances::table
                .select(sum(balances::social))
                .first(conn)?;
            let completed_tasks: i64 = tasks::table
                .filter(tasks::completed.eq(true))
                .count()
                .get_result(conn)?;
            let all_tasks: i64 = tasks::table.count().get_result(conn)?;
            Ok(Stats {
                total_events,
                active_events,
                tokens_offered: tokens_offered.unwrap_or(0),
                students,
                academic_held: academic_held.unwrap_or(0),
                social_held: social_held.unwrap_or(0),
                open_tasks: all_tasks - completed_tasks,
                completed_tasks,
            })
        })
        .await
    }
}

fn insert_task(conn: &mut SqliteConnection, t: &TaskInput) -> Result<Task, StorageError> {
    use schema::tasks;
    if !t.reward.is_valid() {
        return Err(StorageError::InvalidInput(format!(
            "reward amount must be positive, got {}",
            t.reward.amount
        )));
    }
    let new = NewTask {
        title: &t.title,
        description: &t.description,
        due_date: t.due_date,
        reward_amount: t.reward.amount,
        reward_kind: t.reward.kind.as_str(),
        assignee_id: t.assignee_id.as_deref(),
        created_by: &t.created_by,
    };
    Ok(diesel::insert_into(tasks::table)
        .values(&new)
        .returning(Task::as_returning())
        .get_result(conn)?)
}

fn insert_event(conn: &mut SqliteConnection, e: &EventInput) -> Result<Event, StorageError> {
    use schema::events;
    if !e.reward.is_valid() {
        return Err(StorageError::InvalidInput(format!(
            "reward amount must be positive, got {}",
            e.reward.amount
        )));
    }
    let new = NewEvent {
        title: &e.title,
        description: &e.description,
        starts_at: e.starts_at,
        location: &e.location,
        reward_amount: e.reward.amount,
        reward_kind: e.reward.kind.as_str(),
        created_by: &e.created_by,
    };
    Ok(diesel::insert_into(events::table)
        .values(&new)
        .returning(Event::as_returning())
        .get_result(conn)?)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
