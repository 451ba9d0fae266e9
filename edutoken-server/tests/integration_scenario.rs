use axum::http::StatusCode;
use edutoken_server::{server, storage};
use edutoken_shared::domain::{Balance, Reward};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const TEACHER_EMAIL: &str = "teacher@school.test";
const TEACHER_PWD: &str = "chalkboard";

struct TestServer {
    base: String,
    client: Client,
    store: storage::Store,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, store, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            store,
            handle,
            _tempdir: dir,
        })
    }

    async fn login(&self, email: &str, password: &str) -> String {
        let body = self
            .request_expect(
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({"email": email, "password": password})),
                StatusCode::OK,
            )
            .await;
        token_of(&body)
    }

    async fn signup(&self, email: &str, role: Option<&str>) -> String {
        let body = self
            .request_expect(
                "POST",
                "/api/v1/auth/signup",
                None,
                Some(json!({"email": email, "password": "secret123", "role": role})),
                StatusCode::OK,
            )
            .await;
        token_of(&body)
    }

    async fn user_id(&self, token: &str) -> String {
        let me = self
            .request_expect("GET", "/api/v1/auth/me", Some(token), None, StatusCode::OK)
            .await;
        me["id"].as_str().unwrap().to_string()
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn token_of(body: &Value) -> String {
    body.get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .expect("token missing from auth response")
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, storage::Store, tokio::task::JoinHandle<()>), std::io::Error> {
    let config = server::AppConfig {
        jwt_secret: "testsecret".into(),
        users: vec![server::UserConfig {
            email: TEACHER_EMAIL.into(),
            password_hash: bcrypt::hash(TEACHER_PWD, 4).unwrap(),
            role: Some(edutoken_shared::auth::Role::Teacher),
        }],
        tasks: vec![],
        events: vec![],
        dev_cors_origin: None,
        listen_port: None,
        notification_window: Some(5),
    };

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");
    store.seed_users(&config.seed_users()).await.expect("seed");

    let state = server::AppState::new(config, store.clone());
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, store, handle))
}

fn balance_of(body: &Value) -> Balance {
    Balance::new(
        body["academic"].as_i64().unwrap() as i32,
        body["social"].as_i64().unwrap() as i32,
    )
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
    let version = server
        .request_expect("GET", "/api/v1/version", None, None, StatusCode::OK)
        .await;
    assert!(version.get("version").and_then(|v| v.as_str()).is_some());
    let token = server.login(TEACHER_EMAIL, TEACHER_PWD).await;
    assert!(!token.is_empty());

    server
        .request_expect(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": TEACHER_EMAIL, "password": "wrong-pass"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": "ghost@school.test", "password": "whatever"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn signup_validates_input() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server.signup("ada@school.test", Some("student")).await;

    let cases = [
        (json!({"email": "ada@school.test", "password": "secret123"}), StatusCode::CONFLICT),
        (json!({"email": "ADA@school.test ", "password": "secret123"}), StatusCode::CONFLICT),
        (json!({"email": "not-an-email", "password": "secret123"}), StatusCode::BAD_REQUEST),
        (json!({"email": "bo@school.test", "password": "12345"}), StatusCode::BAD_REQUEST),
    ];
    for (body, expected) in cases {
        server
            .request_expect("POST", "/api/v1/auth/signup", None, Some(body), expected)
            .await;
    }
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let cases: Vec<(&str, &str, Option<Value>)> = vec![
        ("GET", "/api/v1/auth/me", None),
        ("POST", "/api/v1/auth/role", Some(json!({"role": "student"}))),
        ("POST", "/api/v1/auth/logout", None),
        ("POST", "/api/v1/auth/renew", None),
        ("GET", "/api/v1/tasks", None),
        ("POST", "/api/v1/tasks/1/complete", None),
        ("DELETE", "/api/v1/tasks/1", None),
        ("GET", "/api/v1/events", None),
        ("GET", "/api/v1/events/1/qr", None),
        ("POST", "/api/v1/scan", Some(json!({"payload": "{}"}))),
        ("GET", "/api/v1/users/someone/balance", None),
        ("GET", "/api/v1/students", None),
        ("GET", "/api/v1/stats", None),
        ("GET", "/api/v1/notifications", None),
        ("GET", "/api/v1/notifications/count", None),
        ("POST", "/api/v1/notifications/1/read", None),
    ];

    for (method, path, body) in cases.iter() {
        server
            .request_expect(method, path, None, body.clone(), StatusCode::UNAUTHORIZED)
            .await;
    }
    server
        .request_expect(
            "GET",
            "/api/v1/tasks",
            Some("not-a-jwt"),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn role_is_chosen_once() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let pending = server.signup("pending@school.test", None).await;

    let me = server
        .request_expect("GET", "/api/v1/auth/me", Some(&pending), None, StatusCode::OK)
        .await;
    assert!(me["role"].is_null());
    server
        .request_expect("GET", "/api/v1/tasks", Some(&pending), None, StatusCode::FORBIDDEN)
        .await;
    server
        .request_expect(
            "GET",
            "/api/v1/notifications",
            Some(&pending),
            None,
            StatusCode::OK,
        )
        .await;

    let body = server
        .request_expect(
            "POST",
            "/api/v1/auth/role",
            Some(&pending),
            Some(json!({"role": "student"})),
            StatusCode::OK,
        )
        .await;
    let student = token_of(&body);

    // The pre-role token was swapped out
    server
        .request_expect("GET", "/api/v1/auth/me", Some(&pending), None, StatusCode::UNAUTHORIZED)
        .await;
    server
        .request_expect("GET", "/api/v1/tasks", Some(&student), None, StatusCode::OK)
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/auth/role",
            Some(&student),
            Some(json!({"role": "teacher"})),
            StatusCode::CONFLICT,
        )
        .await;
    let me = server
        .request_expect("GET", "/api/v1/auth/me", Some(&student), None, StatusCode::OK)
        .await;
    assert_eq!(me["role"], "student");
}

#[tokio::test]
async fn logout_and_renew_manage_sessions() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let first = server.signup("ada@school.test", Some("student")).await;
    let body = server
        .request_expect("POST", "/api/v1/auth/renew", Some(&first), None, StatusCode::OK)
        .await;
    let renewed = token_of(&body);
    server
        .request_expect("GET", "/api/v1/auth/me", Some(&first), None, StatusCode::UNAUTHORIZED)
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/auth/logout",
            Some(&renewed),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect("GET", "/api/v1/auth/me", Some(&renewed), None, StatusCode::UNAUTHORIZED)
        .await;
}

#[tokio::test]
async fn task_completion_credits_balance() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher = server.login(TEACHER_EMAIL, TEACHER_PWD).await;
    let alice = server.signup("alice@school.test", Some("student")).await;
    let bob = server.signup("bob@school.test", Some("student")).await;
    let alice_id = server.user_id(&alice).await;
    let bob_id = server.user_id(&bob).await;

    // Prior balance (150, 75)
    server
        .store
        .insert_balance(&alice_id, Balance::new(150, 75))
        .await
        .unwrap();

    let task = server
        .request_expect(
            "POST",
            "/api/v1/tasks",
            Some(&teacher),
            Some(json!({
                "title": "Math Homework",
                "due_date": "2026-10-20",
                "reward": {"amount": 50, "kind": "academic"},
                "assignee_id": alice_id,
            })),
            StatusCode::CREATED,
        )
        .await;
    let task_id = task["id"].as_i64().unwrap();
    let bobs_task = server
        .request_expect(
            "POST",
            "/api/v1/tasks",
            Some(&teacher),
            Some(json!({
                "title": "Lab Report",
                "reward": {"amount": 20, "kind": "academic"},
                "assignee_id": bob_id,
            })),
            StatusCode::CREATED,
        )
        .await;
    let bobs_task_id = bobs_task["id"].as_i64().unwrap();

    let visible = server
        .request_expect("GET", "/api/v1/tasks", Some(&alice), None, StatusCode::OK)
        .await;
    let ids: Vec<i64> = visible
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![task_id]);

    let earned = server
        .request_expect(
            "POST",
            &format!("/api/v1/tasks/{task_id}/complete"),
            Some(&alice),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance_of(&earned["balance"]), Balance::new(200, 75));
    assert!(
        earned["notification"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Earned 50 academic tokens")
    );

    let repeat = [
        (task_id, &alice, StatusCode::CONFLICT),
        (bobs_task_id, &alice, StatusCode::FORBIDDEN),
        (9999, &alice, StatusCode::NOT_FOUND),
        (bobs_task_id, &teacher, StatusCode::FORBIDDEN),
    ];
    for (id, token, expected) in repeat {
        server
            .request_expect(
                "POST",
                &format!("/api/v1/tasks/{id}/complete"),
                Some(token.as_str()),
                None,
                expected,
            )
            .await;
    }

    let seen_by_teacher = server
        .request_expect(
            "GET",
            &format!("/api/v1/users/{alice_id}/balance"),
            Some(&teacher),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance_of(&seen_by_teacher), Balance::new(200, 75));
    server
        .request_expect(
            "GET",
            &format!("/api/v1/users/{alice_id}/balance"),
            Some(&bob),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    let bobs_balance = server
        .request_expect(
            "GET",
            &format!("/api/v1/users/{bob_id}/balance"),
            Some(&bob),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance_of(&bobs_balance), Balance::zero());
    assert!(bobs_balance["updated_at"].is_null());
    assert!(server.store.find_balance(&bob_id).await.unwrap().is_none());

    let feed = server
        .request_expect("GET", "/api/v1/notifications", Some(&alice), None, StatusCode::OK)
        .await;
    let feed = feed.as_array().unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0]["severity"], "success");
    let note_id = feed[0]["id"].as_i64().unwrap();

    server
        .request_expect(
            "POST",
            &format!("/api/v1/notifications/{note_id}/read"),
            Some(&bob),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    server
        .request_expect(
            "POST",
            &format!("/api/v1/notifications/{note_id}/read"),
            Some(&alice),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let count = server
        .request_expect(
            "GET",
            "/api/v1/notifications/count",
            Some(&alice),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(count["unread"].as_i64().unwrap(), 0);

    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/tasks/{bobs_task_id}"),
            Some(&teacher),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/tasks/{bobs_task_id}"),
            Some(&teacher),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn task_creation_is_validated() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher = server.login(TEACHER_EMAIL, TEACHER_PWD).await;
    let student = server.signup("ada@school.test", Some("student")).await;
    let teacher_id = server.user_id(&teacher).await;

    let cases = [
        json!({"title": "  ", "reward": {"amount": 5, "kind": "academic"}}),
        json!({"title": "Essay", "reward": {"amount": 0, "kind": "academic"}}),
        json!({"title": "Essay", "reward": {"amount": 5, "kind": "academic"}, "due_date": "20/10/2026"}),
        json!({"title": "Essay", "reward": {"amount": 5, "kind": "academic"}, "assignee_id": teacher_id}),
    ];
    for body in cases {
        server
            .request_expect("POST", "/api/v1/tasks", Some(&teacher), Some(body), StatusCode::BAD_REQUEST)
            .await;
    }
    server
        .request_expect(
            "POST",
            "/api/v1/tasks",
            Some(&student),
            Some(json!({"title": "Essay", "reward": {"amount": 5, "kind": "academic"}})),
            StatusCode::FORBIDDEN,
        )
        .await;
}

#[tokio::test]
async fn event_scan_flow() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher = server.login(TEACHER_EMAIL, TEACHER_PWD).await;
    let student = server.signup("newbie@school.test", Some("student")).await;
    let student_id = server.user_id(&student).await;

    let event = server
        .request_expect(
            "POST",
            "/api/v1/events",
            Some(&teacher),
            Some(json!({
                "title": "Campus Cleanup Day",
                "starts_at": "2020-01-01",
                "location": "Main yard",
                "reward": {"amount": 25, "kind": "social"},
            })),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(event["status"], "active");
    let event_id = event["id"].as_i64().unwrap();

    let qr = server
        .request_expect(
            "GET",
            &format!("/api/v1/events/{event_id}/qr"),
            Some(&teacher),
            None,
            StatusCode::OK,
        )
        .await;
    let payload = qr["payload"].as_str().unwrap().to_string();
    let decoded: Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(decoded["eventName"], "Campus Cleanup Day");
    assert_eq!(decoded["tokenType"], "social");

    let earned = server
        .request_expect(
            "POST",
            "/api/v1/scan",
            Some(&student),
            Some(json!({"payload": payload})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance_of(&earned["balance"]), Balance::new(0, 25));
    assert_eq!(
        earned["notification"]["message"],
        "Earned 25 social tokens from Campus Cleanup Day"
    );
    let row = server.store.find_balance(&student_id).await.unwrap().unwrap();
    assert_eq!(row.balance(), Balance::new(0, 25));

    // Repeated scans credit again
    let again = server
        .request_expect(
            "POST",
            "/api/v1/scan",
            Some(&student),
            Some(json!({"payload": payload})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance_of(&again["balance"]), Balance::new(0, 50));

    let mut forged = decoded.clone();
    forged["tokenAmount"] = json!(500);
    let mut unknown = decoded.clone();
    unknown["eventId"] = json!("9999");
    let cases = [
        (json!("demo-qr-code"), StatusCode::BAD_REQUEST),
        (json!(event_id.to_string()), StatusCode::BAD_REQUEST),
        (json!(forged.to_string()), StatusCode::BAD_REQUEST),
        (json!(unknown.to_string()), StatusCode::NOT_FOUND),
    ];
    for (payload, expected) in cases {
        server
            .request_expect(
                "POST",
                "/api/v1/scan",
                Some(&student),
                Some(json!({"payload": payload})),
                expected,
            )
            .await;
    }
    let row = server.store.find_balance(&student_id).await.unwrap().unwrap();
    assert_eq!(row.balance(), Balance::new(0, 50));

    server
        .request_expect(
            "POST",
            "/api/v1/scan",
            Some(&teacher),
            Some(json!({"payload": payload})),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "GET",
            &format!("/api/v1/events/{event_id}/qr"),
            Some(&student),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/events/{event_id}"),
            Some(&teacher),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/scan",
            Some(&student),
            Some(json!({"payload": payload})),
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn teacher_statistics_and_roster() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher = server.login(TEACHER_EMAIL, TEACHER_PWD).await;
    let student = server.signup("ada@school.test", Some("student")).await;
    let student_id = server.user_id(&student).await;

    for (title, starts_at, amount) in [
        ("Science Fair", "2020-05-01T10:00:00Z", 30),
        ("Robotics Club", "2099-05-01T10:00:00Z", 15),
    ] {
        server
            .request_expect(
                "POST",
                "/api/v1/events",
                Some(&teacher),
                Some(json!({
                    "title": title,
                    "starts_at": starts_at,
                    "reward": {"amount": amount, "kind": "social"},
                })),
                StatusCode::CREATED,
            )
            .await;
    }
    server
        .store
        .insert_balance(&student_id, Balance::new(10, 4))
        .await
        .unwrap();
    server
        .store
        .create_task(storage::TaskInput {
            title: "Reading Log".into(),
            description: String::new(),
            due_date: None,
            reward: Reward::academic(5),
            assignee_id: None,
            created_by: "teacher".into(),
        })
        .await
        .unwrap();

    let stats = server
        .request_expect("GET", "/api/v1/stats", Some(&teacher), None, StatusCode::OK)
        .await;
    assert_eq!(stats["total_events"], 2);
    assert_eq!(stats["active_events"], 1);
    assert_eq!(stats["upcoming_events"], 1);
    assert_eq!(stats["tokens_offered"], 45);
    assert_eq!(stats["students"], 1);
    assert_eq!(stats["academic_held"], 10);
    assert_eq!(stats["social_held"], 4);
    assert_eq!(stats["open_tasks"], 1);
    assert_eq!(stats["completed_tasks"], 0);

    let students = server
        .request_expect("GET", "/api/v1/students", Some(&teacher), None, StatusCode::OK)
        .await;
    assert_eq!(students.as_array().unwrap().len(), 1);
    assert_eq!(students[0]["email"], "ada@school.test");

    server
        .request_expect("GET", "/api/v1/stats", Some(&student), None, StatusCode::FORBIDDEN)
        .await;
    server
        .request_expect("GET", "/api/v1/students", Some(&student), None, StatusCode::FORBIDDEN)
        .await;
}

#[tokio::test]
async fn notification_window_caps_listing() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let student = server.signup("ada@school.test", Some("student")).await;
    let student_id = server.user_id(&student).await;
    for i in 0..8 {
        server
            .store
            .append_notification(
                &student_id,
                &format!("note {i}"),
                edutoken_shared::domain::Severity::Info,
            )
            .await
            .unwrap();
    }
    let all = server
        .request_expect("GET", "/api/v1/notifications", Some(&student), None, StatusCode::OK)
        .await;
    assert_eq!(all.as_array().unwrap().len(), 5);
    assert_eq!(all[0]["message"], "note 7");
    let two = server
        .request_expect(
            "GET",
            "/api/v1/notifications?limit=2",
            Some(&student),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(two.as_array().unwrap().len(), 2);
    let capped = server
        .request_expect(
            "GET",
            "/api/v1/notifications?limit=500",
            Some(&student),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(capped.as_array().unwrap().len(), 5);
}
