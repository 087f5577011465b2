use crate::sd::asyncutil::TaskTracker;
use crate::sd::auth::{self, AuthProvider};
use crate::sd::config::SysdwebConfig;
use crate::sd::dashboard::{self, ViewRecord};
use crate::sd::dispatch::{Action, ActionResult, DispatchError, Dispatcher, Outcome};
use crate::sd::journal::Journalctl;
use crate::sd::unit::SystemdBus;
use anyhow::Context as _;
use askama::Template;
use axum::body::Body;
use axum::extract::{Path as AxumPath, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response as AxumResponse};
use axum::routing::get;
use axum::{middleware, Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct WebState {
    dispatcher: Arc<Dispatcher>,
    auth: Arc<dyn AuthProvider>,
    tasks: TaskTracker,
    hostname: Arc<str>,
    /// Mount prefix without trailing slash; empty when mounted at `/`.
    root: Arc<str>,
    static_dir: Arc<PathBuf>,
}

impl WebState {
    pub fn new(dispatcher: Arc<Dispatcher>, auth: Arc<dyn AuthProvider>, static_dir: PathBuf) -> Self {
        Self {
            dispatcher,
            auth,
            tasks: TaskTracker::new(),
            hostname: local_hostname().into(),
            root: "".into(),
            static_dir: Arc::new(static_dir),
        }
    }

    pub fn with_root(mut self, root: Option<String>) -> Self {
        self.root = root.unwrap_or_default().into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        let hostname: String = hostname.into();
        self.hostname = hostname.into();
        self
    }

    pub fn with_tasks(mut self, tasks: TaskTracker) -> Self {
        self.tasks = tasks;
        self
    }

    /// Run a synchronous dispatcher call on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&Dispatcher) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let d = Arc::clone(&self.dispatcher);
        match self.tasks.run_blocking(move || f(&d)).await {
            Ok(r) => r,
            Err(e) => Err(DispatchError::TransportFailure {
                action: Action::Status,
                unit: "-".to_string(),
                source: e,
            }),
        }
    }
}

fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn build_router(state: WebState) -> Router {
    let auth_state = state.clone();
    let root = state.root.to_string();
    let app = Router::new()
        .route("/", get(index_page))
        .route("/journal/:service", get(journal_page))
        .route("/api/v1/services", get(list_services))
        .route("/api/v1/:service/:action", get(service_action))
        .route("/api/v1/:service/journal/:lines", get(service_journal))
        .route("/favicon.ico", get(favicon))
        .route("/css/:file", get(css_file))
        .route("/fonts/:file", get(font_file))
        .route("/img/:file", get(img_file))
        .route("/js/:file", get(js_file))
        .with_state(state)
        .layer(middleware::from_fn_with_state(auth_state, basic_auth_middleware));

    if root.is_empty() {
        app
    } else {
        Router::new().nest(&root, app)
    }
}

// ---------------- Auth ----------------

async fn basic_auth_middleware(
    State(st): State<WebState>,
    req: Request<Body>,
    next: middleware::Next,
) -> AxumResponse {
    if !st.auth.requires_credentials() {
        return next.run(req).await;
    }
    let creds = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or("missing Authorization header")
        .and_then(|v| v.to_str().map_err(|_| "invalid Authorization header"))
        .and_then(auth::parse_basic_header);
    let (user, pass) = match creds {
        Ok(c) => c,
        Err(reason) => {
            debug!(component = "auth", path = %req.uri().path(), reason, "auth rejected");
            return unauthorized();
        }
    };

    // bcrypt and PAM both block.
    let provider = Arc::clone(&st.auth);
    let who = user.clone();
    match st.tasks.run_blocking(move || provider.authenticate(&who, &pass)).await {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            debug!(component = "auth", %user, path = %req.uri().path(), "invalid credentials");
            unauthorized()
        }
        Err(e) => {
            warn!(component = "auth", %user, error = %format!("{e:#}"), "auth check failed");
            unauthorized()
        }
    }
}

fn unauthorized() -> AxumResponse {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="private""#)],
        "Access denied",
    )
        .into_response()
}

// ---------------- REST API ----------------

fn http_status(e: &DispatchError) -> StatusCode {
    match e {
        DispatchError::NotConfigured(_) | DispatchError::UnsupportedAction(_) => StatusCode::BAD_REQUEST,
        DispatchError::InvalidArgument(_) | DispatchError::TransportFailure { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn api_response(r: Result<ActionResult, DispatchError>) -> AxumResponse {
    match r {
        Ok(res) => Json(res).into_response(),
        Err(e) => {
            let status = http_status(&e);
            if status.is_server_error() {
                warn!(component = "web", error = %e, "api request failed");
            }
            (status, Json(serde_json::json!({ "msg": e.to_string() }))).into_response()
        }
    }
}

async fn list_services(State(st): State<WebState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "services": st.dispatcher.registry().names() }))
}

async fn service_action(
    State(st): State<WebState>,
    AxumPath((service, action)): AxumPath<(String, String)>,
) -> AxumResponse {
    debug!(component = "web", %service, %action, "api action");
    api_response(st.call(move |d| d.dispatch(&service, &action)).await)
}

async fn service_journal(
    State(st): State<WebState>,
    AxumPath((service, lines)): AxumPath<(String, String)>,
) -> AxumResponse {
    api_response(st.call(move |d| d.journal(&service, &lines)).await)
}

// ---------------- Askama pages ----------------

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    hostname: &'a str,
    root: &'a str,
    services: Vec<ViewRecord>,
}

#[derive(Template)]
#[template(path = "journal.html")]
struct JournalTemplate<'a> {
    hostname: &'a str,
    root: &'a str,
    title: &'a str,
    lines: Vec<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    hostname: &'a str,
    root: &'a str,
    code: u16,
    reason: &'a str,
    msg: &'a str,
}

fn render_page<T: Template>(status: StatusCode, t: &T) -> AxumResponse {
    match t.render() {
        Ok(s) => (status, Html(s)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn error_page(st: &WebState, status: StatusCode, msg: &str) -> AxumResponse {
    let t = ErrorTemplate {
        hostname: &st.hostname,
        root: &st.root,
        code: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Error"),
        msg,
    };
    render_page(status, &t)
}

async fn index_page(State(st): State<WebState>) -> AxumResponse {
    match st.call(dashboard::build_dashboard).await {
        Ok(services) => {
            let t = IndexTemplate {
                hostname: &st.hostname,
                root: &st.root,
                services,
            };
            render_page(StatusCode::OK, &t)
        }
        Err(e) => {
            warn!(component = "web", error = %e, "dashboard render failed");
            error_page(&st, http_status(&e), &e.to_string())
        }
    }
}

async fn journal_page(State(st): State<WebState>, AxumPath(service): AxumPath<String>) -> AxumResponse {
    let name = service.clone();
    let res = st.call(move |d| d.run(&name, Action::Journal)).await;
    let title = st
        .dispatcher
        .registry()
        .get(&service)
        .map_or(service.as_str(), |s| s.title.as_str())
        .to_string();
    match res {
        Ok(ActionResult {
            outcome: Outcome::Lines(lines),
            ..
        }) => {
            let t = JournalTemplate {
                hostname: &st.hostname,
                root: &st.root,
                title: &title,
                lines,
            };
            render_page(StatusCode::OK, &t)
        }
        Ok(_) => error_page(
            &st,
            StatusCode::BAD_REQUEST,
            &format!("Sorry, but service '{title}' unit not found in system."),
        ),
        Err(e) => error_page(&st, http_status(&e), &e.to_string()),
    }
}

// ---------------- Static files ----------------

fn content_type(file: &str) -> &'static str {
    let ext = file.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("map" | "json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn not_found() -> AxumResponse {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

async fn static_file(st: &WebState, dir: &str, file: &str) -> AxumResponse {
    if file.is_empty() || file.contains(['/', '\\']) || file.contains("..") {
        return not_found();
    }
    let path = st.static_dir.join(dir).join(file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type(file)),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            Body::from(bytes),
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
        Err(e) => {
            warn!(component = "web", path = %path.display(), error = %e, "static file read failed");
            not_found()
        }
    }
}

async fn favicon(State(st): State<WebState>) -> AxumResponse {
    static_file(&st, "img", "favicon.ico").await
}

async fn css_file(State(st): State<WebState>, AxumPath(file): AxumPath<String>) -> AxumResponse {
    static_file(&st, "css", &file).await
}

async fn font_file(State(st): State<WebState>, AxumPath(file): AxumPath<String>) -> AxumResponse {
    static_file(&st, "fonts", &file).await
}

async fn img_file(State(st): State<WebState>, AxumPath(file): AxumPath<String>) -> AxumResponse {
    static_file(&st, "img", &file).await
}

async fn js_file(State(st): State<WebState>, AxumPath(file): AxumPath<String>) -> AxumResponse {
    static_file(&st, "js", &file).await
}

// ---------------- Server ----------------

/// Wire the systemd adapters to the router and serve until SIGINT/SIGTERM.
pub async fn run(cfg: SysdwebConfig) -> anyhow::Result<()> {
    let registry = Arc::new(cfg.registry()?);
    let auth = auth::provider_from_config(&cfg.auth)?;
    let tasks = TaskTracker::new();

    let scope = cfg.scope;
    let bus = tasks
        .run_blocking(move || SystemdBus::connect(scope))
        .await??;
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        Arc::new(bus),
        Arc::new(Journalctl::new(cfg.scope)),
    ));

    let state = WebState::new(dispatcher, auth, cfg.static_dir.clone())
        .with_root(cfg.root.clone())
        .with_tasks(tasks.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cfg.host, cfg.port))?;
    info!(
        component = "web",
        host = %cfg.host,
        port = cfg.port,
        root = cfg.root.as_deref().unwrap_or("/"),
        scope = ?cfg.scope,
        auth = ?cfg.auth.mode,
        services = cfg.services.len(),
        "sysdweb listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!(
        component = "web",
        in_flight = tasks.active_blocking_count(),
        served = tasks.total_blocking_spawned(),
        "sysdweb stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(component = "web", error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(component = "web", error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => info!(component = "web", "SIGINT received, shutting down"),
        _ = term => info!(component = "web", "SIGTERM received, shutting down"),
    }
}
