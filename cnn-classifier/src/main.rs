//! Runs the four training stages against `config/config.yaml` and
//! `params.yaml` in the working directory.

use anyhow::Context as _;
use cnn_classifier::prelude::*;
use std::sync::Arc;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _guard = init_logging(&LoggingConfig::default())?;

    let configs = ConfigurationManager::from_default_paths()
        .context("loading config/config.yaml and params.yaml")?;
    let ctx = StageContext::new(Arc::new(configs), Arc::new(NdarrayFramework::new()))
        .with_event_sink(Arc::new(LoggingEventSink::default()));

    let run = Pipeline::training().run(&ctx).await?;
    info!(run_id = %run.run_id, duration_ms = run.duration_ms(), "Training run finished");
    Ok(())
}
