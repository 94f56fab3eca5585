use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use wellcam_common::config::Config;
use wellcam_device::actuator::ActuatorController;
use wellcam_device::camera::{self, FrameSource};
use wellcam_device::dispatch::CommandDispatcher;
use wellcam_device::encoder::StreamEncoder;
use wellcam_device::server::{self, ListenerPair};
use wellcam_device::streamer::MultipartStreamer;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        control_port = config.server.control_port,
        camera = ?config.camera.source,
        pixel_format = ?config.camera.pixel_format,
        actuator = ?config.actuator.backend,
        "starting wellcam"
    );

    let driver = match camera::open_driver(&config.camera) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to open camera");
            std::process::exit(1);
        }
    };
    info!(driver = driver.name(), frame_buffers = config.camera.frame_buffers, "camera ready");
    let source = Arc::new(FrameSource::new(driver, config.camera.frame_buffers));

    let actuator = match ActuatorController::from_config(&config.actuator) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!(error = %e, "failed to initialise actuators");
            std::process::exit(1);
        }
    };

    let streamer = Arc::new(MultipartStreamer::new(
        source,
        StreamEncoder::new(config.stream.jpeg_quality),
        config.stream.boundary.clone(),
    ));
    let dispatcher = CommandDispatcher::new(actuator);

    let listeners = match ListenerPair::bind(&config.server).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind listeners");
            std::process::exit(1);
        }
    };

    let result = listeners
        .serve(
            server::control_router(dispatcher),
            server::stream_router(streamer, config.stream.channel_depth),
        )
        .await;
    if let Err(e) = result {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
