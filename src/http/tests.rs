//! End-to-end tests of the router against in-memory backends.

use super::*;
use crate::cache::MemoryCache;
use crate::config::{AuthConfig, RateLimitConfig, RouteLimit};
use crate::db::{MemoryStore, Store};
use crate::mail::{Email, MailError, Mailer};
use crate::media::{AvatarStore, DisabledAvatarStore, MediaError};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderMap, Request, header};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

const CLIENT: ([u8; 4], u16) = ([10, 0, 0, 1], 40000);

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

struct FakeAvatars;

#[async_trait]
impl AvatarStore for FakeAvatars {
    async fn upload(
        &self,
        user_id: i64,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String, MediaError> {
        crate::media::check_upload(&data, content_type.as_deref())?;
        Ok(format!("https://cdn.test/avatar_{user_id}?bytes={}", data.len()))
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    mailer: Arc<RecordingMailer>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
    text: String,
}

fn auth_config() -> AuthConfig {
    AuthConfig {
        secret_key: "router-test-secret-key-0123456789".into(),
        algorithm: "HS256".into(),
        access_token_ttl_secs: 900,
        refresh_token_ttl_secs: 604_800,
        email_token_ttl_secs: 86_400,
        reset_token_ttl_secs: 600,
        bcrypt_cost: 4,
    }
}

fn build(limits: RateLimitConfig, avatars: SharedAvatarStore, client: SocketAddr) -> TestApp {
    crate::metrics::init();
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new(900));
    let mailer = Arc::new(RecordingMailer::default());
    let auth = AuthService::new(&auth_config(), store.clone(), cache).unwrap();
    let state = AppState {
        store: store.clone(),
        auth: Arc::new(auth),
        mailer: mailer.clone(),
        avatars,
        limiter: Arc::new(RateLimitManager::new(limits)),
        bans: Arc::new(IpBanList::from_entries(&[
            "192.168.1.1".to_string(),
            "192.168.1.2".to_string(),
        ])),
        public_url: None,
    };
    let router = router(state, &["http://localhost:3000".to_string()])
        .layer(MockConnectInfo(client));
    TestApp {
        router,
        store,
        mailer,
    }
}

fn app() -> TestApp {
    build(
        RateLimitConfig::default(),
        Arc::new(FakeAvatars),
        SocketAddr::from(CLIENT),
    )
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
            text,
        }
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> Reply {
        let mut req = Request::get(uri).header(header::HOST, "testserver");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> Reply {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "testserver")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn form(&self, uri: &str, body: &str) -> Reply {
        let req = Request::post(uri)
            .header(header::HOST, "testserver")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    async fn signup(&self, username: &str, email: &str, password: &str) -> Reply {
        self.json(
            "POST",
            "/api/auth/signup",
            None,
            json!({"username": username, "email": email, "password": password}),
        )
        .await
    }

    /// Sign up, confirm directly in the store and log in. Returns (access, refresh).
    async fn registered(&self, email: &str) -> (String, String) {
        let reply = self.signup("tester", email, "password1").await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
        let id = reply.body["user"]["id"].as_i64().unwrap();
        self.store.confirm_email(id).await.unwrap();
        let reply = self
            .form("/api/auth/login", &format!("username={email}&password=password1"))
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.text);
        (
            reply.body["access_token"].as_str().unwrap().to_string(),
            reply.body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    /// Wait for a background e-mail to arrive.
    async fn next_email(&self, count: usize) -> Email {
        for _ in 0..100 {
            if let Some(email) = self.mailer.sent.lock().get(count - 1).cloned() {
                return email;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no e-mail number {count} was sent");
    }
}

fn token_after(html: &str, marker: &str) -> String {
    let start = html.find(marker).unwrap() + marker.len();
    html[start..].split('"').next().unwrap().to_string()
}

fn contact_body(email: &str, birth_date: &str) -> Value {
    json!({
        "first_name": "Grace",
        "last_name": "Hopper",
        "email": email,
        "phone_number": "+1 555 0100",
        "birth_date": birth_date,
        "additional_data": "Navy"
    })
}

#[tokio::test]
async fn root_and_health() {
    let app = app();
    let reply = app.get("/", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"message": "REST APP v1.2"}));

    let reply = app.get("/api/healthchecker", None).await;
    assert_eq!(reply.body, json!({"message": "Welcome to FastAPI!"}));
}

#[tokio::test]
async fn banned_addresses_are_refused() {
    let app = build(
        RateLimitConfig::default(),
        Arc::new(FakeAvatars),
        SocketAddr::from(([192, 168, 1, 2], 5555)),
    );
    let reply = app.get("/", None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body, json!({"detail": "You are banned"}));
}

#[tokio::test]
async fn cors_allows_configured_origin() {
    let app = app();
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/contacts")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let reply = app.send(req).await;
    assert_eq!(
        reply.headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        reply.headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
}

#[tokio::test]
async fn signup_confirm_and_login() {
    let app = app();
    let reply = app.signup("alice", "alice@example.com", "wonderland").await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["detail"], "User successfully created");
    assert_eq!(reply.body["user"]["email"], "alice@example.com");
    assert!(reply.body["user"]["avatar"]
        .as_str()
        .unwrap()
        .starts_with("https://www.gravatar.com/avatar/"));
    assert!(reply.body["user"].get("password_hash").is_none());

    let reply = app.signup("alice2", "alice@example.com", "wonderland").await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["detail"], "Account already exists");

    let reply = app
        .form("/api/auth/login", "username=alice@example.com&password=wonderland")
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Email not confirmed");

    let email = app.next_email(1).await;
    assert_eq!(email.to, "alice@example.com");
    assert_eq!(email.subject, "Confirm your email");
    let token = token_after(&email.html, "http://testserver/api/auth/confirmed_email/");

    let reply = app
        .get(&format!("/api/auth/confirmed_email/{token}"), None)
        .await;
    assert_eq!(reply.body, json!({"message": "Email confirmed"}));
    let reply = app
        .get(&format!("/api/auth/confirmed_email/{token}"), None)
        .await;
    assert_eq!(reply.body, json!({"message": "Your email is already confirmed"}));

    let reply = app
        .form("/api/auth/login", "username=alice@example.com&password=wrong-one")
        .await;
    assert_eq!(reply.body["detail"], "Invalid password");
    let reply = app
        .form("/api/auth/login", "username=nobody@example.com&password=wonderland")
        .await;
    assert_eq!(reply.body["detail"], "Invalid email");

    let reply = app
        .form("/api/auth/login", "username=alice@example.com&password=wonderland")
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["token_type"], "bearer");
    let access = reply.body["access_token"].as_str().unwrap();

    let reply = app.get("/api/users/me", Some(access)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["username"], "alice");
}

#[tokio::test]
async fn invalid_confirmation_tokens() {
    let app = app();
    let reply = app.get("/api/auth/confirmed_email/not-a-token", None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"], "Invalid token for email verification");

    let (access, _) = app.registered("bob@example.com").await;
    let reply = app
        .get(&format!("/api/auth/confirmed_email/{access}"), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Invalid scope for token");
}

#[tokio::test]
async fn signup_validation() {
    let app = app();
    let reply = app.signup("al", "al@example.com", "password1").await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    let reply = app.signup("alice", "not-an-email", "password1").await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    let reply = app
        .json("POST", "/api/auth/signup", None, json!({"username": "alice"}))
        .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(reply.body["detail"].is_string());
}

#[tokio::test]
async fn bearer_auth_failures() {
    let app = app();
    let reply = app.get("/api/users/me", None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Not authenticated");
    assert_eq!(reply.headers.get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

    let reply = app.get("/api/users/me", Some("garbage")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Could not validate credentials");

    let (_, refresh) = app.registered("carol@example.com").await;
    let reply = app.get("/api/users/me", Some(&refresh)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let app = app();
    let (_, refresh) = app.registered("dave@example.com").await;

    let reply = app.get("/api/auth/refresh_token", Some(&refresh)).await;
    assert_eq!(reply.status, StatusCode::OK);
    let rotated = reply.body["refresh_token"].as_str().unwrap().to_string();
    let access = reply.body["access_token"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);
    assert_eq!(app.get("/api/users/me", Some(&access)).await.status, StatusCode::OK);

    // Replaying the old token revokes the rotated one too
    let reply = app.get("/api/auth/refresh_token", Some(&refresh)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Invalid refresh token");
    let reply = app.get("/api/auth/refresh_token", Some(&rotated)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = app.get("/api/auth/refresh_token", Some(&access)).await;
    assert_eq!(reply.body["detail"], "Invalid scope for token");
}

#[tokio::test]
async fn password_reset_flow() {
    let app = app();
    app.registered("erin@example.com").await;

    let reply = app
        .json(
            "POST",
            "/api/auth/reset_password",
            None,
            json!({"email": "nobody@example.com"}),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Invalid email");

    let reply = app
        .json(
            "POST",
            "/api/auth/reset_password",
            None,
            json!({"email": "erin@example.com"}),
        )
        .await;
    assert_eq!(
        reply.body,
        json!({"message": "Password reset email sent", "timeout_link": {"seconds": 600}})
    );

    // mail 1 is the sign-up confirmation
    let email = app.next_email(2).await;
    assert_eq!(email.subject, "Reset password");
    let token = token_after(&email.html, "http://testserver/api/auth/reset_password/");

    let reply = app
        .get(&format!("/api/auth/reset_password/{token}"), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.text.contains("name=\"password\""));

    let reply = app
        .form(&format!("/api/auth/reset_password/{token}"), "password=brand-new-pw")
        .await;
    assert_eq!(reply.body, json!({"status": "ok"}));

    let reply = app
        .form("/api/auth/login", "username=erin@example.com&password=brand-new-pw")
        .await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn profile_updates() {
    let unlimited = RateLimitConfig {
        enabled: false,
        ..RateLimitConfig::default()
    };
    let app = build(unlimited, Arc::new(FakeAvatars), SocketAddr::from(CLIENT));
    let (access, _) = app.registered("frank@example.com").await;
    app.registered("taken@example.com").await;

    let reply = app
        .json(
            "PATCH",
            "/api/users/password",
            Some(&access),
            json!({"old_password": "wrong", "new_password": "another1"}),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["detail"], "Invalid old password");

    let reply = app
        .json(
            "PATCH",
            "/api/users/password",
            Some(&access),
            json!({"old_password": "password1", "new_password": "another1"}),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = app
        .form("/api/auth/login", "username=frank@example.com&password=another1")
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let access = reply.body["access_token"].as_str().unwrap().to_string();

    let reply = app
        .json(
            "PATCH",
            "/api/users/email",
            Some(&access),
            json!({"email": "taken@example.com"}),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn avatar_upload() {
    let app = app();
    let (access, _) = app.registered("gina@example.com").await;

    let body = "--XBOUNDARY\r\n\
                Content-Disposition: form-data; name=\"file\"; filename=\"me.png\"\r\n\
                Content-Type: image/png\r\n\r\n\
                PNGDATA\r\n\
                --XBOUNDARY--\r\n";
    let req = Request::patch("/api/users/avatar")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(Body::from(body))
        .unwrap();
    let reply = app.send(req).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.text);
    let avatar = reply.body["avatar"].as_str().unwrap();
    assert!(avatar.starts_with("https://cdn.test/avatar_"));
    assert!(avatar.ends_with("bytes=7"));

    // The cached profile is refreshed after the change
    let reply = app.get("/api/users/me", Some(&access)).await;
    assert_eq!(reply.body["avatar"].as_str().unwrap(), avatar);
}

#[tokio::test]
async fn avatar_upload_disabled() {
    let app = build(
        RateLimitConfig::default(),
        Arc::new(DisabledAvatarStore),
        SocketAddr::from(CLIENT),
    );
    let (access, _) = app.registered("hank@example.com").await;
    let body = "--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\n\
                Content-Type: image/png\r\n\r\nX\r\n--B--\r\n";
    let req = Request::patch("/api/users/avatar")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=B")
        .body(Body::from(body))
        .unwrap();
    let reply = app.send(req).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn contact_crud() {
    let app = app();
    let (access, _) = app.registered("ivy@example.com").await;
    let token = Some(access.as_str());

    let reply = app
        .json("POST", "/api/contacts/", token, contact_body("grace@navy.mil", "1906-12-09"))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
    let id = reply.body["id"].as_i64().unwrap();
    assert_eq!(reply.body["first_name"], "Grace");

    let reply = app
        .json("POST", "/api/contacts", token, contact_body("grace@navy.mil", "1906-12-09"))
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(
        reply.body["detail"],
        "A contact with this email address already exists"
    );

    let reply = app.get("/api/contacts?limit=5", token).await;
    assert_eq!(reply.body.as_array().unwrap().len(), 1);
    let reply = app.get("/api/contacts?first_name=Alan", token).await;
    assert!(reply.body.as_array().unwrap().is_empty());
    let reply = app.get("/api/contacts?limit=0", token).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = app.get(&format!("/api/contacts/{id}"), token).await;
    assert_eq!(reply.body["email"], "grace@navy.mil");

    let mut replacement = contact_body("grace@yale.edu", "1906-12-09");
    replacement["first_name"] = json!("Amazing Grace");
    let reply = app
        .json("PUT", &format!("/api/contacts/{id}"), token, replacement)
        .await;
    assert_eq!(reply.body["first_name"], "Amazing Grace");
    assert_eq!(reply.body["email"], "grace@yale.edu");

    let reply = app
        .json("PATCH", &format!("/api/contacts/{id}"), token, json!({}))
        .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = app
        .json(
            "PATCH",
            &format!("/api/contacts/{id}"),
            token,
            json!({"phone_number": "+1 555 0199"}),
        )
        .await;
    assert_eq!(reply.body["phone_number"], "+1 555 0199");
    assert_eq!(reply.body["first_name"], "Amazing Grace");

    let reply = app
        .json("DELETE", &format!("/api/contacts/{id}"), token, json!(null))
        .await;
    assert_eq!(reply.body["id"], id);
    let reply = app.get(&format!("/api/contacts/{id}"), token).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["detail"], "Contact not found");

    let reply = app.get("/api/contacts/not-a-number", token).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn contacts_are_private() {
    let app = app();
    let (owner, _) = app.registered("owner@example.com").await;
    let (other, _) = app.registered("other@example.com").await;

    let reply = app
        .json("POST", "/api/contacts", Some(&owner), contact_body("x@example.com", "1990-01-01"))
        .await;
    let id = reply.body["id"].as_i64().unwrap();

    let reply = app.get(&format!("/api/contacts/{id}"), Some(&other)).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    let reply = app.get("/api/contacts", Some(&other)).await;
    assert!(reply.body.as_array().unwrap().is_empty());

    // The same e-mail may appear in different address books
    let reply = app
        .json("POST", "/api/contacts", Some(&other), contact_body("x@example.com", "1990-01-01"))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn birthdays_window() {
    let app = app();
    let (access, _) = app.registered("jane@example.com").await;
    let token = Some(access.as_str());
    for (email, born) in [
        ("a@example.com", "1990-06-02"),
        ("b@example.com", "1985-06-07"),
        ("c@example.com", "2000-06-20"),
    ] {
        let reply = app.json("POST", "/api/contacts", token, contact_body(email, born)).await;
        assert_eq!(reply.status, StatusCode::CREATED);
    }

    let reply = app
        .get("/api/contacts/birthdays?from_date=2024-06-01&to_date=2024-06-30", token)
        .await;
    let emails: Vec<_> = reply
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["email"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(emails, vec!["a@example.com", "b@example.com"]);

    let reply = app
        .get("/api/contacts/birthdays?to_date=2024-06-21", token)
        .await;
    assert_eq!(reply.body.as_array().unwrap().len(), 1);

    let reply = app
        .get("/api/contacts/birthdays?from_date=2024-06-10&to_date=2024-06-01", token)
        .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn route_limits_apply() {
    let limits = RateLimitConfig {
        users_sensitive: RouteLimit::new(2, 60),
        ..RateLimitConfig::default()
    };
    let app = build(limits, Arc::new(FakeAvatars), SocketAddr::from(CLIENT));
    let (access, _) = app.registered("kate@example.com").await;

    for _ in 0..2 {
        let reply = app
            .json(
                "PATCH",
                "/api/users/email",
                Some(&access),
                json!({"email": "kate@example.com"}),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let reply = app
        .json(
            "PATCH",
            "/api/users/email",
            Some(&access),
            json!({"email": "kate@example.com"}),
        )
        .await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.body["detail"], "Too many requests");

    // Other route classes are unaffected
    assert_eq!(app.get("/api/users/me", Some(&access)).await.status, StatusCode::OK);
}
