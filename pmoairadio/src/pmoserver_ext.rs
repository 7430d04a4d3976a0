//! Extension pmoserver pour la radio
//!
//! Ce module fournit un trait d'extension pour monter la radio sur un
//! serveur pmoserver : API documentée, skip historique et flux HLS.

use crate::api::{create_api_router, skip, RadioApiDoc, RadioApiState};
use crate::station::RadioStation;
use axum::{routing::get, Router};
use utoipa::OpenApi;

/// Trait d'extension pour pmoserver::Server
pub trait AiRadioExt {
    /// Monte la radio sur le serveur
    ///
    /// # Routes créées
    ///
    /// - API: `/api/radio/*`
    ///   - `/skip` (GET, POST)
    ///   - `/current`, `/playlist`, `/recent`, `/playlist.m3u`
    /// - Swagger: `/swagger-ui/radio`
    /// - `/skip` (GET, POST), chemin historique du contrôle
    /// - `/static/*` : index `stream.m3u8` et segments HLS
    async fn init_ai_radio(&mut self, station: &RadioStation) -> RadioApiState;
}

impl AiRadioExt for pmoserver::Server {
    async fn init_ai_radio(&mut self, station: &RadioStation) -> RadioApiState {
        let state = station.api_state();

        self.add_openapi(create_api_router(state.clone()), RadioApiDoc::openapi(), "radio")
            .await;

        let legacy = Router::new()
            .route("/skip", get(skip).post(skip))
            .with_state(state.clone());
        self.add_router("/", legacy).await;

        self.add_static_dir("/static", station.segments_dir()).await;

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SKIP_IDLE;
    use crate::config::RadioConfig;
    use crate::station::StationDirs;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn routes_are_mounted() {
        let root = tempfile::tempdir().unwrap();
        let station = RadioStation::new(
            RadioConfig::default(),
            StationDirs {
                music: root.path().join("music"),
                segments: root.path().join("static"),
                work: root.path().join("work"),
            },
        )
        .await
        .unwrap();
        std::fs::write(station.segments_dir().join("stream.m3u8"), "#EXTM3U\n").unwrap();

        let mut server = pmoserver::Server::new("test", "localhost", 0);
        server.init_ai_radio(&station).await;
        let router = server.router().await;

        for uri in ["/skip", "/api/radio/skip"] {
            let response = router
                .clone()
                .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], SKIP_IDLE.as_bytes());
        }

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/static/stream.m3u8").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let response = router
            .oneshot(Request::builder().uri("/api-docs/radio.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
