use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use farm_notify::config::NotifierConfig;
use farm_notify::database::{self, repositories};
use farm_notify::logging;
use farm_notify::notification::{
    ChannelRegistry, DigestCompiler, EventProcessor, FsMetadataSource, Outbox, SlackChannel,
    SlackConfig, StalenessWindows,
};
use farm_notify::scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = NotifierConfig::from_env().context("Invalid configuration")?;
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.clone());

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let feed = Arc::new(repositories::SqlxFeedRepository::new(pool.clone()));
    let rules = Arc::new(repositories::SqlxRuleRepository::new(pool.clone()));
    let store = Arc::new(repositories::SqlxNotificationRepository::new(pool.clone()));

    let slack = SlackChannel::new(SlackConfig {
        base_url: config.slackbot_url.clone(),
        ..Default::default()
    })?;
    let channels = ChannelRegistry::new().with(Arc::new(slack));

    let outbox = Arc::new(Outbox::new(store.clone(), config.service.clone()));
    let processor = EventProcessor::new(
        rules.clone(),
        store.clone(),
        outbox.clone(),
        StalenessWindows::default(),
    );
    let digest = DigestCompiler::new(
        feed.clone(),
        rules,
        store,
        Arc::new(FsMetadataSource::new(
            config.render_root.clone(),
            config.vri_marker.clone(),
        )),
        channels.clone(),
        config.digest,
        config.service.clone(),
    );

    let scheduler = Scheduler::new(
        feed,
        processor,
        outbox,
        digest,
        channels,
        SchedulerConfig::from(&config),
        cancel.clone(),
    );

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            cancel.cancel();
        }
    });

    info!(
        database = %config.database_url,
        slackbot = %config.slackbot_url,
        "farm-notify started"
    );
    scheduler.run().await?;

    pool.close().await;
    Ok(())
}
