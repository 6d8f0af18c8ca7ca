use anyhow::Context;
use config::Config;
use log::LevelFilter;
use pipeline::{Dispatcher, Pipeline};
use publisher::MqttPublisher;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use store::SqliteStore;

mod config;
mod error;
mod forecast;
mod measurement;
mod mqtt;
mod pipeline;
mod publisher;
mod store;
mod trend;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    TermLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run().await {
        log::error!("{e:#}");
    }

    Ok(())
}

pub async fn run() -> Result<(), anyhow::Error> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let store = SqliteStore::open(&config.db_file)
        .with_context(|| format!("Failed to open database {}", config.db_file.display()))?;
    store
        .init(&config.device)
        .context("Failed to initialize database")?;

    let (client, eventloop) = mqtt::connect(&config);
    let pipeline = Pipeline::new(
        config.device.clone(),
        store,
        MqttPublisher::new(client.clone()),
        config.query_timeout,
        config.publish_retries,
    );

    log::info!(
        "Forecasting for {} via {}:{}",
        config.device,
        config.mqtt_host,
        config.mqtt_port
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to wait for Ctrl+C signal: {e}");
        }
    };
    let stats = mqtt::run(
        client,
        eventloop,
        Dispatcher::new(pipeline),
        config.device.input_topic(),
        shutdown,
    )
    .await;

    log::info!(
        "Stopped: {} forecast(s) published, {} message(s) dropped",
        stats.published,
        stats.dropped
    );

    Ok(())
}
