//! HTTP frontend for the relay
//!
//! ## Endpoint Map
//!
//! | Route             | Description                                  |
//! |-------------------|----------------------------------------------|
//! | `GET /`           | Status page (public URL, webhook, state)     |
//! | `POST /`          | Webhook delivery from the platform           |
//! | `POST /configure` | Form submit: `url`, `token`, `passphrase`    |
//! | `GET /health`     | Liveness probe                               |
//! | `GET /ping`       | Arms the keepalive with this request's URL   |

use crate::keepalive::KeepaliveScheduler;
use crate::session::RelaySession;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tower_http::trace::TraceLayer;

/// Response body of `GET /health`
pub const HEALTH_TEXT: &str = "App is running fine :)";

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Echo relay</title>
</head>
<body>
  <h1>Echo relay</h1>
  <p>Service URL: <code>{{ url }}</code></p>
  <p>Status: <strong>{{ state }}</strong></p>
  {% if webhook %}<p>Webhook: <code>{{ webhook }}</code></p>{% endif %}
  {% if error %}<p style="color: #b00">Configuration failed: {{ error }}</p>{% endif %}
  {% if not is_running %}
  <form method="post" action="/configure">
    <label>Public URL <input name="url" value="{{ url }}" required></label><br>
    <label>Bot token <input name="token" type="password" required></label><br>
    <label>Passphrase <input name="passphrase" type="password"></label><br>
    <button type="submit">Configure</button>
  </form>
  {% endif %}
</body>
</html>
"#;

/// Shared handles for all routes
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RelaySession>,
    pub keepalive: Arc<KeepaliveScheduler>,
    templates: Arc<minijinja::Environment<'static>>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(session: Arc<RelaySession>, keepalive: Arc<KeepaliveScheduler>) -> Self {
        let mut templates = minijinja::Environment::new();
        // The template is a compile-time constant; a syntax error surfaces on render
        if let Err(e) = templates.add_template("index.html", INDEX_TEMPLATE) {
            tracing::error!(error = %e, "Invalid status page template");
        }

        Self {
            session,
            keepalive,
            templates: Arc::new(templates),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Error from the most recent failed `/configure`, cleared on success
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = error;
    }
}

/// Build the relay HTTP application
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_page).post(webhook))
        .route("/configure", post(configure))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reconstruct the URL the client used, honoring reverse-proxy headers
pub fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let scheme = header_value("x-forwarded-proto")
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());
    let host = header_value("x-forwarded-host")
        .or_else(|| header_value(header::HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    format!("{}://{}{}", scheme, host, path)
}

async fn status_page(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Response {
    let context = minijinja::context! {
        url => request_url(&headers, &uri),
        state => state.session.state().as_str(),
        is_running => state.session.is_running(),
        webhook => state.session.registered_url(),
        error => state.last_error(),
    };

    let rendered = state
        .templates
        .get_template("index.html")
        .and_then(|template| template.render(context));

    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render status page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render status page").into_response()
        }
    }
}

async fn webhook(State(state): State<AppState>, body: String) -> Response {
    let payload: serde_json::Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, body_len = body.len(), "Rejected non-JSON webhook body");
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)).into_response();
        }
    };

    match state.session.submit(payload) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Webhook rejected");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigureForm {
    url: String,
    token: String,
    #[serde(default)]
    passphrase: String,
}

async fn configure(State(state): State<AppState>, Form(form): Form<ConfigureForm>) -> Redirect {
    let passphrase = Some(form.passphrase.as_str()).filter(|p| !p.is_empty());

    match state
        .session
        .configure(&form.token, &form.url, passphrase)
        .await
    {
        Ok(url) => {
            tracing::info!(webhook = %url, "Configured from status page");
            state.set_last_error(None);
        }
        Err(e) => {
            tracing::warn!(url = %form.url, error = %e, "Configuration from status page failed");
            state.set_last_error(Some(e.to_string()));
        }
    }

    Redirect::to("/")
}

async fn health() -> &'static str {
    HEALTH_TEXT
}

async fn ping(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> StatusCode {
    state.keepalive.arm(&request_url(&headers, &uri));
    StatusCode::OK
}
