use anyhow::Result;
use parleyd::{
    load_config, CommandRateLimiter, CpalSource, DaemonServer, EnergyClassifier, HttpPipeline,
    PlaybackSink, RodioPlayback, Session, SessionDeps,
};
use shared::default_socket_path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!("parley daemon (parleyd) starting...");

    let config = load_config()?;

    let playback: Option<Arc<dyn PlaybackSink>> = if config.playback.enabled {
        Some(Arc::new(RodioPlayback::new()))
    } else {
        info!("Response playback disabled");
        None
    };

    let deps = SessionDeps {
        source: Arc::new(CpalSource::new(config.audio.clone())),
        classifier: Arc::new(EnergyClassifier::new(config.vad.energy_reference)),
        pipeline: Arc::new(HttpPipeline::new(&config.pipeline)?),
        playback,
    };

    let rate_limiter = CommandRateLimiter::from_config(&config.rate_limit);
    let session = Session::new(config, deps);
    let server = DaemonServer::new(default_socket_path(), session.clone(), rate_limiter);

    let shutdown = CancellationToken::new();
    let server_run = server.run(shutdown.clone());
    tokio::pin!(server_run);

    let result = tokio::select! {
        result = &mut server_run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            shutdown.cancel();
            server_run.await
        }
    };
    if let Err(e) = result {
        error!("Socket server failed: {}", e);
    }

    session.stop().await;
    info!("parleyd stopped");

    Ok(())
}
