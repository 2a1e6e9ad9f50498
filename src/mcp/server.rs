//! MCP Server implementation
//!
//! Binds the dispatcher to the HTTP surface: discovery, invocation,
//! cancellation, the JSON-RPC binding and the liveness/readiness probes.

use super::dispatcher::{Dispatcher, DispatcherConfig};
use super::errors::{ErrorBody, ErrorKind};
use super::jsonrpc::{self, RpcCalls, SESSION_HEADER};
use crate::capability::{CapabilityKind, CapabilityRegistry, InvocationResult};
use crate::config::{spawn_config_watcher, BrandingConfig, Config, ConfigOverrides};
use crate::error::{AytchError, Result};
use crate::providers::{CredentialSource, EnvCredentials, ProviderRegistry};
use crate::startup::{build_capability_registry, StartupLogger};
use actix_web::http::StatusCode;
use actix_web::{middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity reported by discovery and `initialize`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub version: String,
}

impl ServerInfo {
    pub fn from_branding(branding: &BrandingConfig) -> Self {
        Self {
            name: branding.name.clone(),
            description: branding.description.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Response envelope of `/mcp/invoke`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    Ok { payload: Value },
    Error { error: ErrorBody },
}

impl Envelope {
    pub fn error<S: Into<String>>(code: ErrorKind, message: S) -> Self {
        Envelope::Error {
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

/// Shared state handed to every request handler
#[derive(Debug)]
pub struct AppState {
    pub info: ServerInfo,
    pub dispatcher: Arc<Dispatcher>,
    /// JSON-RPC calls in flight, by session and JSON-RPC id
    pub rpc_calls: RpcCalls,
}

/// MCP Server that handles protocol communication
pub struct McpServer {
    config: Config,
    state: web::Data<AppState>,
    providers: Arc<ProviderRegistry>,
    watch: Option<(PathBuf, ConfigOverrides)>,
}

impl McpServer {
    /// Build both registries from configuration using environment credentials
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with_credentials(config, Arc::new(EnvCredentials))
    }

    /// Build both registries from configuration with explicit credentials
    ///
    /// Fails when no provider initializes; an unusable active provider only
    /// warns, since `/ready` reports it and a reload can fix it.
    pub fn from_config_with_credentials(config: &Config, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let providers = ProviderRegistry::with_credentials(&config.llm, credentials, &config.branding.name)?;
        let snapshot = providers.snapshot();
        if snapshot.ready_count() == 0 {
            let reasons: Vec<String> = snapshot
                .status()
                .into_iter()
                .filter_map(|s| s.reason.map(|r| format!("{}: {}", s.id, r)))
                .collect();
            return Err(AytchError::startup(format!(
                "no LLM provider could be initialized ({})",
                reasons.join("; ")
            )));
        }
        if let Err(e) = snapshot.resolve_active() {
            warn!("{}", e);
        }

        let capabilities = build_capability_registry(config)?;
        Ok(Self::with_registries(config.clone(), capabilities, Arc::new(providers)))
    }

    /// Assemble a server from prebuilt registries
    pub fn with_registries(config: Config, capabilities: CapabilityRegistry, providers: Arc<ProviderRegistry>) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::new(capabilities),
            providers.clone(),
            DispatcherConfig::from_server(&config.server),
        );
        let state = web::Data::new(AppState {
            info: ServerInfo::from_branding(&config.branding),
            dispatcher: Arc::new(dispatcher),
            rpc_calls: RpcCalls::new(),
        });
        Self {
            config,
            state,
            providers,
            watch: None,
        }
    }

    /// Watch `location` for configuration changes once started
    pub fn with_hot_reload(mut self, location: PathBuf, overrides: ConfigOverrides) -> Self {
        self.watch = Some((location, overrides));
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.state.info
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.state.dispatcher.clone()
    }

    pub fn providers(&self) -> Arc<ProviderRegistry> {
        self.providers.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handler state for mounting [`configure_routes`] in an `App`
    pub fn app_data(&self) -> web::Data<AppState> {
        self.state.clone()
    }

    /// Discovery document listing every registered capability
    pub fn discovery(&self) -> Value {
        discovery_document(&self.state)
    }

    pub fn log_startup_summary(&self) {
        StartupLogger::log_summary(
            &self.config,
            &self.state.info,
            self.state.dispatcher.capabilities(),
            &self.providers.snapshot(),
        );
    }

    /// Serve until the HTTP server shuts down
    pub async fn start(self) -> Result<()> {
        let host = self.config.server.host.clone();
        let port = self.config.server.port;
        let max_request_size = self.config.server.max_request_size;

        self.log_startup_summary();

        let watcher = match (&self.watch, self.config.server.hot_reload) {
            (Some((location, overrides)), true) => Some(spawn_config_watcher(
                location.clone(),
                overrides.clone(),
                self.providers.clone(),
            )),
            (None, true) => {
                warn!("Hot reload requested but no configuration location is known");
                None
            }
            _ => None,
        };

        let state = self.state.clone();
        info!("Starting MCP server on {}:{}", host, port);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(web::PayloadConfig::new(max_request_size))
                .app_data(web::JsonConfig::default().limit(max_request_size))
                .wrap(Logger::default())
                .configure(configure_routes)
        })
        .bind((host.as_str(), port))
        .map_err(|e| AytchError::startup(format!("Failed to bind {}:{}: {}", host, port, e)))?
        .run();

        let result = server.await.map_err(AytchError::from);
        if let Some(handle) = watcher {
            handle.abort();
        }
        info!("MCP server stopped");
        result
    }
}

/// Mount every route; expects `web::Data<AppState>` in app data
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/.well-known/mcp", web::get().to(discovery_handler))
        .route("/.well-known/mcp/{kind}", web::get().to(discovery_kind_handler))
        .route("/mcp/invoke", web::post().to(invoke_handler))
        .route("/mcp/cancel/{request_id}", web::post().to(cancel_handler))
        .route("/mcp/jsonrpc", web::post().to(jsonrpc_handler))
        .route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check));
}

fn discovery_document(state: &AppState) -> Value {
    let capabilities = state.dispatcher.capabilities();
    json!({
        "name": state.info.name,
        "description": state.info.description,
        "version": state.info.version,
        "resources": capabilities.list(CapabilityKind::Resource),
        "tools": capabilities.list(CapabilityKind::Tool),
        "prompts": capabilities.list(CapabilityKind::Prompt),
    })
}

fn envelope_response(status: StatusCode, envelope: Envelope) -> HttpResponse {
    HttpResponse::build(status).json(envelope)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn discovery_handler(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(discovery_document(&state))
}

pub async fn discovery_kind_handler(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match path.parse::<CapabilityKind>() {
        Ok(kind) => {
            let mut body = serde_json::Map::new();
            body.insert(kind.plural().to_string(), json!(state.dispatcher.capabilities().list(kind)));
            HttpResponse::Ok().json(body)
        }
        Err(message) => envelope_response(StatusCode::NOT_FOUND, Envelope::error(ErrorKind::NotFound, message)),
    }
}

/// `POST /mcp/invoke`
///
/// A cancelled request answers 499 with no envelope.
pub async fn invoke_handler(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return envelope_response(
                StatusCode::BAD_REQUEST,
                Envelope::error(ErrorKind::MalformedRequest, format!("Malformed request: {}", e)),
            )
        }
    };

    let outcome = state.dispatcher.dispatch_value(value).await;
    debug!("[{}] finished in state {:?}", outcome.request_id, outcome.state());
    match outcome.result {
        InvocationResult::Success(payload) => envelope_response(StatusCode::OK, Envelope::Ok { payload }),
        InvocationResult::Failure { kind, message } => envelope_response(status_for(kind), Envelope::error(kind, message)),
        InvocationResult::Cancelled => HttpResponse::build(status_for(ErrorKind::Cancelled)).finish(),
    }
}

/// `POST /mcp/cancel/{request_id}`
pub async fn cancel_handler(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let request_id = path.into_inner();
    if state.dispatcher.cancel(&request_id) {
        HttpResponse::Ok().json(json!({"status": "cancelled", "request_id": request_id}))
    } else {
        envelope_response(
            StatusCode::NOT_FOUND,
            Envelope::error(ErrorKind::NotFound, format!("no in-flight request '{}'", request_id)),
        )
    }
}

/// `POST /mcp/jsonrpc`; notifications and cancelled calls answer 204
///
/// The `Mcp-Session-Id` header scopes JSON-RPC ids; `initialize` issues one.
pub async fn jsonrpc_handler(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let session = req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string);

    match jsonrpc::handle(&state.dispatcher, &state.rpc_calls, &state.info, session.as_deref(), &body).await {
        Some(response) => {
            let mut builder = HttpResponse::Ok();
            if let Some(session) = response.session.clone().or(session) {
                builder.insert_header((SESSION_HEADER, session));
            }
            builder.json(response)
        }
        None => HttpResponse::NoContent().finish(),
    }
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}

pub async fn readiness_check(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.dispatcher.providers().snapshot();
    let provider = snapshot.active_id();
    match snapshot.resolve_active() {
        Ok(_) => HttpResponse::Ok().json(json!({"status": "ready", "provider": provider})),
        Err(e) => HttpResponse::ServiceUnavailable().json(json!({
            "status": "not_ready",
            "provider": provider,
            "reason": e.to_string(),
        })),
    }
}
