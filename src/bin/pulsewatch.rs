use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pulsewatch::{
    actors::{alert::AlertHook, retention::RetentionTask},
    alerts::ThresholdEvaluator,
    api::{ApiState, spawn_api_server},
    config::{Config, StorageConfig, read_config_file},
    pipeline::Pipeline,
    sampler::{Sampler, SystemSource},
    storage::{MemorySink, PersistenceSink},
    util::resolve_host_id,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults apply when omitted
    #[arg(short)]
    file: Option<String>,

    /// Override the API bind address
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("pulsewatch", LevelFilter::DEBUG),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(file) => read_config_file(file).with_context(|| format!("failed to load {file}"))?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.api.bind_addr = bind;
    }

    let host_id = resolve_host_id(config.host_id.as_deref());
    info!("sampling host {host_id}");

    let (sink, retention) = open_sink(&config.storage).await?;

    let sampler = Sampler::new(
        Box::new(SystemSource::new()),
        host_id,
        config.sampling.fatal_failure_threshold,
    );

    let hook: Option<Arc<dyn AlertHook>> = if config.alerts.rules.is_empty() {
        None
    } else {
        info!("evaluating {} alert rules", config.alerts.rules.len());
        Some(Arc::new(ThresholdEvaluator::new(config.alerts.rules.clone())))
    };

    let pipeline = Pipeline::start(&config, sampler, Arc::clone(&sink), hook);

    let retention_task = retention.map(|task| task.spawn(pipeline.cancellation().child_token()));

    let state = ApiState::new(&pipeline, Arc::clone(&sink));
    let (addr, server_task) = match spawn_api_server(
        config.api.bind_addr,
        state,
        pipeline.cancellation().child_token(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            pipeline.shutdown().await;
            return Err(e.context(format!("failed to bind {}", config.api.bind_addr)));
        }
    };
    info!("streaming on ws://{addr}/api/v1/stream");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c");

    pipeline.shutdown().await;

    if let Some(task) = retention_task
        && let Err(e) = task.await
    {
        error!("retention task failed: {e}");
    }
    if let Err(e) = server_task.await {
        error!("API server task failed: {e}");
    }
    if let Err(e) = sink.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}

async fn open_sink(
    storage: &StorageConfig,
) -> anyhow::Result<(Arc<dyn PersistenceSink>, Option<RetentionTask>)> {
    match storage {
        StorageConfig::None => {
            info!("persistence disabled, keeping samples in memory");
            Ok((Arc::new(MemorySink::new()), None))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
            cleanup_interval_hours,
        } => {
            let sink: Arc<dyn PersistenceSink> = Arc::new(
                pulsewatch::storage::sqlite::SqliteSink::new(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?,
            );
            let retention = RetentionTask::new(
                Arc::clone(&sink),
                *retention_days,
                std::time::Duration::from_secs(u64::from(*cleanup_interval_hours).max(1) * 3600),
            );
            Ok((sink, Some(retention)))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the storage-sqlite feature is disabled")
        }
    }
}
