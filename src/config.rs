use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::measurement::DeviceId;
use crate::store::DB_FILE;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PUBLISH_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct Config {
    pub device: DeviceId,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub keep_alive: Duration,
    pub db_file: PathBuf,
    pub query_timeout: Duration,
    pub publish_retries: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let required = |key: &str| lookup(key).with_context(|| format!("{key} is not set"));

        let device = DeviceId::parse(&required("DEVICE_ID")?).context("Invalid DEVICE_ID")?;
        let (mqtt_host, mqtt_port) =
            parse_server(&required("MQTT_SERVER")?).context("Invalid MQTT_SERVER")?;
        let mqtt_client_id =
            lookup("MQTT_CLIENT_ID").unwrap_or_else(|| format!("zambretti-{device}"));
        let keep_alive = parse_or(&lookup, "MQTT_KEEP_ALIVE_SECS", DEFAULT_KEEP_ALIVE.as_secs())
            .map(Duration::from_secs)?;
        let db_file = lookup("DB_FILE").map_or_else(|| PathBuf::from(DB_FILE), PathBuf::from);
        let query_timeout = parse_or(&lookup, "QUERY_TIMEOUT_SECS", DEFAULT_QUERY_TIMEOUT.as_secs())
            .map(Duration::from_secs)?;
        let publish_retries = parse_or(&lookup, "PUBLISH_RETRIES", DEFAULT_PUBLISH_RETRIES)?;

        Ok(Config {
            device,
            mqtt_host,
            mqtt_port,
            mqtt_client_id,
            keep_alive,
            db_file,
            query_timeout,
            publish_retries,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key}: {v:?}")),
        None => Ok(default),
    }
}

/// Accepts `mqtt://host[:port]`, `tcp://host[:port]` or `host[:port]`.
fn parse_server(server: &str) -> Result<(String, u16), anyhow::Error> {
    let rest = server
        .strip_prefix("mqtt://")
        .or_else(|| server.strip_prefix("tcp://"))
        .unwrap_or(server)
        .trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .with_context(|| format!("Invalid port {port:?}"))?,
        ),
        None => (rest, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() {
        return Err(anyhow::anyhow!("Missing host in {server:?}"));
    }

    Ok((host.to_owned(), port))
}
