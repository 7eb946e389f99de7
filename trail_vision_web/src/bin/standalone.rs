use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use trail_vision::{PipelineConfig, track_video};
use trail_vision_web::{ProcessFn, ServerConfig, start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Bind address and upload directory from env or defaults
    let cfg = ServerConfig::from_env();
    let config = PipelineConfig::load(None).context("failed to load pipeline configuration")?;
    config.validate().context("invalid pipeline configuration")?;

    let process: ProcessFn = Arc::new(move |video: &Path| track_video(video, &config));
    let (_addr, handle) = start_server(cfg, process).await?;
    // Park forever
    handle.await.ok();
    Ok(())
}
