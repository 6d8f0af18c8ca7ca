use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Outbound channel for forecasts. The last published value on a topic is
/// kept for late subscribers.
#[async_trait]
pub trait ForecastPublisher: Send + Sync {
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ForecastPublisher for MqttPublisher {
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}
