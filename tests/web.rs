use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sysdweb::sd::auth::{AuthProvider, NoAuth, PasswordList};
use sysdweb::sd::dispatch::Dispatcher;
use sysdweb::sd::journal::JournalReader;
use sysdweb::sd::registry::{ServiceConfig, ServiceRegistry};
use sysdweb::sd::unit::UnitControl;
use sysdweb::sd::web::{build_router, WebState};
use tower::ServiceExt as _;

struct FakeUnits {
    load: &'static str,
    active: &'static str,
    broken: bool,
}

impl FakeUnits {
    fn job(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.broken, "bus gone");
        Ok(())
    }
}

impl UnitControl for FakeUnits {
    fn start_unit(&self, _unit: &str) -> anyhow::Result<()> {
        self.job()
    }
    fn stop_unit(&self, _unit: &str) -> anyhow::Result<()> {
        self.job()
    }
    fn restart_unit(&self, _unit: &str) -> anyhow::Result<()> {
        self.job()
    }
    fn reload_unit(&self, _unit: &str) -> anyhow::Result<()> {
        self.job()
    }
    fn reload_or_restart_unit(&self, _unit: &str) -> anyhow::Result<()> {
        self.job()
    }
    fn load_state(&self, _unit: &str) -> anyhow::Result<String> {
        self.job()?;
        Ok(self.load.to_string())
    }
    fn active_state(&self, _unit: &str) -> anyhow::Result<String> {
        self.job()?;
        Ok(self.active.to_string())
    }
    fn uptime_micros(&self, _unit: &str) -> anyhow::Result<Option<u64>> {
        self.job()?;
        Ok(None)
    }
}

#[derive(Default)]
struct FakeJournal {
    calls: AtomicUsize,
}

impl JournalReader for FakeJournal {
    fn tail(&self, unit: &str, lines: usize) -> anyhow::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..lines.min(3)).map(|i| format!("{unit} line {i} <b>")).collect())
    }
}

struct Harness {
    app: Router,
    journal: Arc<FakeJournal>,
}

fn harness(units: FakeUnits, auth: Arc<dyn AuthProvider>, root: Option<&str>, static_dir: &Path) -> Harness {
    let registry = ServiceRegistry::new([
        ServiceConfig::new("web", "nginx.service", "Nginx"),
        ServiceConfig::new("db", "postgresql.service", "PostgreSQL"),
    ])
    .unwrap();
    let journal = Arc::new(FakeJournal::default());
    let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(units), journal.clone());
    let state = WebState::new(Arc::new(dispatcher), auth, static_dir.to_path_buf())
        .with_hostname("testhost")
        .with_root(root.map(str::to_string));
    Harness {
        app: build_router(state),
        journal,
    }
}

fn running() -> FakeUnits {
    FakeUnits {
        load: "loaded",
        active: "active",
        broken: false,
    }
}

fn open(units: FakeUnits) -> Harness {
    harness(units, Arc::new(NoAuth), None, Path::new("/nonexistent"))
}

async fn get(app: &Router, uri: &str, creds: Option<(&str, &str)>) -> (StatusCode, axum::http::HeaderMap, String) {
    let mut req = Request::builder().uri(uri);
    if let Some((u, p)) = creds {
        req = req.header(header::AUTHORIZATION, format!("Basic {}", BASE64.encode(format!("{u}:{p}"))));
    }
    let resp = app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn services_are_listed_in_config_order() {
    let h = open(running());
    let (status, _, body) = get(&h.app, "/api/v1/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({ "services": ["web", "db"] }));
}

#[tokio::test]
async fn action_results_use_the_action_as_key() {
    let h = open(running());
    let (status, _, body) = get(&h.app, "/api/v1/web/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({ "start": "OK" }));

    let (_, _, body) = get(&h.app, "/api/v1/web/status", None).await;
    assert_eq!(json(&body), serde_json::json!({ "status": "active" }));

    let (_, _, body) = get(&h.app, "/api/v1/web/uptime", None).await;
    assert_eq!(json(&body), serde_json::json!({ "uptime": "00:00:00" }));
}

#[tokio::test]
async fn unknown_service_and_action_are_bad_requests() {
    let h = open(running());
    let (status, _, body) = get(&h.app, "/api/v1/mail/start", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["msg"], "Sorry, but 'mail' is not defined in config.");

    let (status, _, body) = get(&h.app, "/api/v1/web/explode", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["msg"], "Sorry, but cannot perform 'explode' action.");

    let (status, _, _) = get(&h.app, "/api/v1/mail/journal/10", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn journal_endpoint() {
    let h = open(running());
    let (status, _, body) = get(&h.app, "/api/v1/web/journal/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body),
        serde_json::json!({ "journal": ["nginx.service line 0 <b>", "nginx.service line 1 <b>"] })
    );

    let (status, _, body) = get(&h.app, "/api/v1/web/journal/abc", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json(&body)["msg"].as_str().unwrap().contains("abc"));
    assert_eq!(h.journal.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn journal_for_missing_unit_is_not_found() {
    let h = open(FakeUnits {
        load: "not-found",
        active: "inactive",
        broken: false,
    });
    let (status, _, body) = get(&h.app, "/api/v1/web/journal/abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({ "journal": "not-found" }));
    assert_eq!(h.journal.calls.load(Ordering::SeqCst), 0);

    let (status, _, body) = get(&h.app, "/journal/web", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Nginx"));
    assert!(body.contains("unit not found in system."));
}

#[tokio::test]
async fn transport_failures_are_server_errors() {
    let h = open(FakeUnits {
        broken: true,
        ..running()
    });
    let (status, _, body) = get(&h.app, "/api/v1/web/status", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json(&body)["msg"].as_str().unwrap().contains("bus gone"));

    // Control actions report the failure in the outcome instead.
    let (status, _, body) = get(&h.app, "/api/v1/web/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({ "stop": "Fail" }));

    let (status, _, _) = get(&h.app, "/", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn dashboard_renders_every_service() {
    let h = open(running());
    let (status, headers, body) = get(&h.app, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    assert!(body.contains("testhost"));
    assert!(body.contains("Nginx") && body.contains("PostgreSQL"));
    assert!(body.contains(r#"class="success""#));
}

#[tokio::test]
async fn journal_page_escapes_lines() {
    let h = open(running());
    let (status, _, body) = get(&h.app, "/journal/db", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("PostgreSQL"));
    assert!(body.contains("postgresql.service line 2 &lt;b&gt;"));
    assert!(!body.contains("<b>"));

    let (status, _, _) = get(&h.app, "/journal/mail", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn basic_auth_gates_every_route() {
    let auth = PasswordList::parse(&["u:p".to_string()]).unwrap();
    let h = harness(running(), Arc::new(auth), None, Path::new("/nonexistent"));

    for uri in ["/", "/api/v1/services", "/api/v1/web/start", "/css/site.css", "/favicon.ico"] {
        let (status, headers, body) = get(&h.app, uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(headers[header::WWW_AUTHENTICATE], r#"Basic realm="private""#);
        assert_eq!(body, "Access denied");
    }

    let (status, _, body) = get(&h.app, "/api/v1/web/start", Some(("u", "wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "Access denied");

    let (status, _, body) = get(&h.app, "/api/v1/web/start", Some(("u", "p"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({ "start": "OK" }));
}

#[tokio::test]
async fn mounted_under_root_prefix() {
    let h = harness(running(), Arc::new(NoAuth), Some("/sysdweb"), Path::new("/nonexistent"));
    let (status, _, body) = get(&h.app, "/sysdweb/api/v1/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["services"][0], "web");

    let (status, _, body) = get(&h.app, "/sysdweb", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("/sysdweb/journal/web"));

    let (status, _, _) = get(&h.app, "/api/v1/services", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn static_files_are_served_from_the_static_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("css")).unwrap();
    std::fs::create_dir_all(dir.path().join("img")).unwrap();
    std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
    std::fs::write(dir.path().join("img/favicon.ico"), [0u8, 0, 1, 0]).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "nope").unwrap();
    let h = harness(running(), Arc::new(NoAuth), None, dir.path());

    let (status, headers, body) = get(&h.app, "/css/site.css", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/css; charset=utf-8");
    assert_eq!(body, "body{}");

    let (status, headers, _) = get(&h.app, "/favicon.ico", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/x-icon");

    for uri in ["/css/..%2Fsecret.txt", "/css/%2E%2E", "/js/missing.js"] {
        let (status, _, _) = get(&h.app, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}
