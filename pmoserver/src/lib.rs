//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour monter les routes HTTP de
//! PMORadio : API JSON documentées, répertoires servis depuis le disque,
//! logs temps réel.
//!
//! ## Architecture
//!
//! - [`server`] : serveur principal et builder
//! - [`logs`] : buffer de logs, diffusion SSE et réglage du niveau à chaud
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_logging().await;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!     server.add_static_dir("/static", "/tmp/hls").await;
//!
//!     server.start().await;
//!     server.wait().await;
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
