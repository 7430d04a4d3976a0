//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module cache la configuration du routage Axum derrière quelques
//! méthodes d'enregistrement :
//!
//! - routes JSON avec `add_route()`
//! - handlers avec état avec `add_handler_with_state()`
//! - sous-routers avec `add_router()`
//! - API documentées (OpenAPI/Swagger) avec `add_openapi()`
//! - répertoires servis depuis le disque avec `add_static_dir()`
//! - redirections avec `add_redirect()`
//!
//! L'arrêt est gracieux : Ctrl+C ou [`Server::shutdown`] ferment l'écoute
//! et laissent les requêtes en cours se terminer.

use crate::logs::{LogState, LogsApiDoc, create_logs_router, init_logging, log_dump, log_sse};
use axum::handler::Handler;
use axum::http::{HeaderValue, header};
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use pmoconfig::get_config;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, set_header::SetResponseHeader};
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const DEFAULT_SERVER_NAME: &str = "PMO-Radio-Server";

/// Info serveur sérialisable
#[derive(Clone, Serialize, utoipa::ToSchema)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    log_state: Option<LogState>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - Hôte annoncé (ex: "localhost")
    /// * `http_port` - Port HTTP à écouter
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            shutdown: CancellationToken::new(),
            log_state: None,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new(DEFAULT_SERVER_NAME, config.get_base_url(), config.get_http_port())
    }

    async fn mount(&self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, route)
        };
    }

    /// Ajoute une route JSON dynamique
    ///
    /// La closure est appelée à chaque requête GET sur `path`.
    ///
    /// ```rust,no_run
    /// # use pmoserver::Server;
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mut server = Server::new("Test", "localhost", 3000);
    /// server.add_route("/api/status", || async {
    ///     serde_json::json!({ "status": "online" })
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };

        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler GET avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Sert un répertoire du disque sous `path`
    ///
    /// Les réponses portent `Cache-Control: no-cache` : le contenu (playlist
    /// HLS, segments) est réécrit en continu.
    pub async fn add_static_dir(&mut self, path: &str, dir: impl AsRef<Path>) {
        let service = SetResponseHeader::overriding(
            ServeDir::new(dir.as_ref()),
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );

        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).fallback_service(service)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest_service(&normalized, service)
        };
    }

    /// Ajoute une redirection HTTP permanente (308)
    pub async fn add_redirect(&mut self, from: &str, to: &str) {
        let target = to.to_string();
        let handler = get(move || async move { Redirect::permanent(&target) });
        self.mount(from, Router::new().route("/", handler)).await;
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        self.mount(path, sub_router).await;
    }

    /// Ajoute une API documentée avec OpenAPI et Swagger UI
    ///
    /// Pour `name = "radio"` :
    ///
    /// - les routes de `api_router` sont servies sous `/api/radio`
    /// - la documentation est servie sous `/swagger-ui/radio`
    /// - la spécification JSON sous `/api-docs/radio.json`
    pub async fn add_openapi(
        &mut self,
        api_router: Router,
        openapi: utoipa::openapi::OpenApi,
        name: &str,
    ) {
        let base_path = format!("/api/{}", name);
        let nested_router = Router::new().nest(&base_path, api_router);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r)
            .merge(nested_router)
            .merge(swagger_ui(name, openapi));
    }

    /// Router courant, tel qu'il serait servi par [`Server::start`]
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Démarre le serveur HTTP
    ///
    /// L'écoute se fait sur toutes les interfaces. Une erreur de bind est
    /// journalisée et termine la tâche serveur.
    pub async fn start(&mut self) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        info!(
            "Server {} running at http://{}:{}",
            self.name, self.base_url, self.http_port
        );

        let router = self.router.read().await.clone();
        let shutdown = self.shutdown.clone();
        let server_task = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Cannot bind HTTP listener on {}: {}", addr, e);
                    shutdown.cancel();
                    return;
                }
            };
            if let Err(e) = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("HTTP server error: {}", e);
            }
        });

        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                res = signal::ctrl_c() => {
                    if let Err(e) = res {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        // sans gestionnaire de signal, seul shutdown() arrête le serveur
                        shutdown.cancelled().await;
                        return;
                    }
                    info!("Ctrl+C reçu, arrêt gracieux");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            let _ = signal_task.await;
            let _ = server_task.await;
        }));
    }

    /// Demande l'arrêt du serveur
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Jeton annulé à l'arrêt du serveur (Ctrl+C ou [`Server::shutdown`])
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.http_port,
        }
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Initialise le système de logging et enregistre les routes de logs
    ///
    /// Routes : `/log-sse`, `/log-dump`, `GET|POST /api/log_setup` et la
    /// documentation sous `/swagger-ui/logs`.
    pub async fn init_logging(&mut self) {
        let log_state = init_logging();

        self.add_handler_with_state("/log-sse", log_sse, log_state.clone())
            .await;
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.add_router("/api", create_logs_router(log_state.clone()))
            .await;

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).merge(swagger_ui("logs", LogsApiDoc::openapi()));
        drop(r);

        self.log_state = Some(log_state);
    }
}

fn swagger_ui(name: &str, openapi: utoipa::openapi::OpenApi) -> SwaggerUi {
    SwaggerUi::new(format!("/swagger-ui/{}", name)).url(format!("/api-docs/{}.json", name), openapi)
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            base_url: config.get_base_url(),
            http_port: config.get_http_port(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}
