use pmoairadio::{AiRadioExt, INDEX_FILE, RadioStation};
use pmoserver::ServerBuilder;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Infrastructure HTTP ==========
    let mut server = ServerBuilder::new_configured().build();
    server.init_logging().await;

    let server_info = server.info();
    server
        .add_route("/api/server", move || {
            let info = server_info.clone();
            async move {
                serde_json::json!({
                    "name": info.name,
                    "version": env!("CARGO_PKG_VERSION"),
                    "http_port": info.http_port,
                })
            }
        })
        .await;

    // ========== PHASE 2 : Radio ==========
    info!("📻 Building radio station...");
    let mut station = RadioStation::from_config().await?;
    if !station.ffmpeg_available().await {
        warn!("⚠️ ffmpeg not found, every track will fail until it is installed");
    }

    server.init_ai_radio(&station).await;
    server.add_redirect("/", "/swagger-ui/radio").await;

    // ========== PHASE 3 : Démarrage ==========
    info!("🌐 Starting HTTP server...");
    server.start().await;
    station.start(server.shutdown_token());

    let info = server.info();
    info!(
        "✅ PMORadio is ready! Stream at http://{}:{}/static/{}",
        info.base_url, info.http_port, INDEX_FILE
    );
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    info!("Stopping playback...");
    station.stop().await;
    Ok(())
}
