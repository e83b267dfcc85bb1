use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use clap::Parser;
use compactor::{HeaderSource, Orchestrator, identify_provider};

mod args;
mod logger;

use args::Args;

/// Wraps an [`axum::http::HeaderMap`] so the compactor crate's
/// provider-identification logic can read it without this binary's
/// header type leaking into that crate.
struct AxumHeaders<'a>(&'a HeaderMap);

impl HeaderSource for AxumHeaders<'_> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    http: reqwest::Client,
    upstream: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(&args);

    log::info!("loading configuration from {}", args.config.display());
    let config = config::Config::load(&args.config).with_context(|| format!("failed to load {}", args.config.display()))?;

    let orchestrator = compactor::build(config).context("failed to build the compaction core")?;

    let state =
        AppState { orchestrator, http: reqwest::Client::new(), upstream: args.upstream.trim_end_matches('/').to_string() };

    let app = Router::new().fallback(any(handle_request)).with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen_address)
        .await
        .with_context(|| format!("failed to bind to {}", args.listen_address))?;

    log::info!("gateway listening on http://{}", args.listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server loop failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("received ctrl-c, shutting down gracefully");
    }
}

/// Single entry point for every request the gateway receives: parses
/// the body, runs it through the preemptive manager, and either
/// answers directly with a synthetic response or forwards the
/// (possibly rewritten) body upstream.
async fn handle_request(State(state): State<AppState>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return forward(&state, &uri, &headers, body).await;
    };

    let provider = identify_provider(&AxumHeaders(&headers), uri.path());
    let registry = compactor::AdapterRegistry::default();
    let model = registry.get(provider).extract_model(&value).unwrap_or_default();

    let header_pairs: Vec<(String, String)> =
        headers.iter().filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string()))).collect();

    match state.orchestrator.process_request(&header_pairs, &value, &model, provider).await {
        Ok(result) => {
            if let Some(synthetic) = result.synthetic_response {
                let mut response = Json(synthetic).into_response();
                for (name, value) in result.response_headers {
                    if let (Ok(name), Ok(value)) =
                        (axum::http::HeaderName::try_from(name), axum::http::HeaderValue::from_str(&value))
                    {
                        response.headers_mut().insert(name, value);
                    }
                }
                response
            } else {
                let rewritten = serde_json::to_vec(&result.modified_body).unwrap_or_else(|_| body.to_vec());
                forward(&state, &uri, &headers, Bytes::from(rewritten)).await
            }
        }
        Err(err) => {
            log::error!("preemptive manager failed, passing request through untouched: {err}");
            forward(&state, &uri, &headers, body).await
        }
    }
}

/// Forwards a request upstream unchanged, relaying status, headers and
/// body back to the client. This is the reverse-proxy transport the
/// preemptive manager sits in front of; it carries no retry or
/// circuit-breaking logic of its own.
async fn forward(state: &AppState, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Response {
    let url = format!("{}{}", state.upstream, uri.path_and_query().map(|p| p.as_str()).unwrap_or(uri.path()));

    let mut request = state.http.post(&url).body(body);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        request = request.header(name, value);
    }

    match request.send().await {
        Ok(upstream_response) => {
            let status = StatusCode::from_u16(upstream_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let response_headers = upstream_response.headers().clone();
            let body = upstream_response.bytes().await.unwrap_or_default();

            let mut response = (status, body).into_response();
            *response.headers_mut() = response_headers;
            response
        }
        Err(err) => {
            log::error!("failed to reach upstream {url}: {err}");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}
