use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tokio::task::{JoinError, JoinSet};

use crate::error::PipelineError;
use crate::forecast::{self, Forecast};
use crate::measurement::{self, DeviceId, PRESSURE_SERIES, Reading};
use crate::publisher::ForecastPublisher;
use crate::store::{ReferenceStore, StoreError, TREND_WINDOW};

const PUBLISH_MIN_DELAY: Duration = Duration::from_millis(100);
const PUBLISH_MAX_DELAY: Duration = Duration::from_secs(2);

/// Turns one inbound payload into one retained forecast publish.
pub struct Pipeline<S, P> {
    device: DeviceId,
    store: S,
    publisher: P,
    query_timeout: Duration,
    publish_retries: usize,
}

impl<S, P> Pipeline<S, P>
where
    S: ReferenceStore,
    P: ForecastPublisher,
{
    pub fn new(
        device: DeviceId,
        store: S,
        publisher: P,
        query_timeout: Duration,
        publish_retries: usize,
    ) -> Self {
        Self {
            device,
            store,
            publisher,
            query_timeout,
            publish_retries,
        }
    }

    pub async fn process(&self, payload: &[u8]) -> Result<Forecast, PipelineError> {
        let pressure =
            measurement::decode_pressure(payload).map_err(PipelineError::MalformedPayload)?;
        let current = Reading {
            device: self.device.clone(),
            timestamp: Utc::now(),
            pressure,
        };

        let cutoff = current.timestamp - TREND_WINDOW;
        let query = self
            .store
            .reference_reading(&self.device, PRESSURE_SERIES, cutoff);
        let reference = tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| StoreError::Timeout(self.query_timeout))??
            .ok_or_else(|| PipelineError::NoReferenceReading {
                device: self.device.clone(),
            })?;

        let forecast = forecast::forecast(&reference, &current);
        let topic = self.device.output_topic();
        let glyph = forecast.code.glyph();

        (|| self.publisher.publish_retained(&topic, glyph))
            .retry(self.publish_backoff())
            .notify(|e, dur| {
                log::warn!("{e}");
                log::info!("Retrying publish to {topic} in {dur:?}");
            })
            .await?;

        log::info!(
            "{} {} ({}: {}, {} {:.1} hPa at {} -> {:.1} hPa)",
            self.device,
            glyph,
            forecast.code,
            forecast.code.description(),
            forecast.trend,
            reference.pressure,
            reference.timestamp.to_rfc3339(),
            current.pressure
        );

        Ok(forecast)
    }

    fn publish_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(PUBLISH_MIN_DELAY)
            .with_max_delay(PUBLISH_MAX_DELAY)
            .with_max_times(self.publish_retries)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub published: u64,
    pub dropped: u64,
}

/// Runs one pipeline task per inbound message and collects their results.
pub struct Dispatcher<S, P> {
    pipeline: Arc<Pipeline<S, P>>,
    tasks: JoinSet<Result<Forecast, PipelineError>>,
    stats: Stats,
}

impl<S, P> Dispatcher<S, P>
where
    S: ReferenceStore + 'static,
    P: ForecastPublisher + 'static,
{
    pub fn new(pipeline: Pipeline<S, P>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tasks: JoinSet::new(),
            stats: Stats::default(),
        }
    }

    pub fn dispatch(&mut self, payload: Vec<u8>) {
        self.reap();
        let pipeline = Arc::clone(&self.pipeline);
        self.tasks
            .spawn(async move { pipeline.process(&payload).await });
    }

    /// Records tasks that have already finished, without waiting.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    /// Waits for every in-flight task.
    pub async fn drain(&mut self) -> Stats {
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn record(&mut self, result: Result<Result<Forecast, PipelineError>, JoinError>) {
        match result {
            Ok(Ok(_)) => self.stats.published += 1,
            Ok(Err(e)) => {
                self.stats.dropped += 1;
                if e.is_retryable() {
                    log::warn!("Dropped message: {e}");
                } else {
                    log::error!("Dropped message: {e}");
                }
            }
            Err(e) => {
                self.stats.dropped += 1;
                log::error!("Pipeline task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;
    use rumqttc::{AsyncClient, MqttOptions};

    use super::*;
    use crate::forecast::ForecastCode;
    use crate::publisher::{MqttPublisher, PublishError};
    use crate::trend::Trend;

    #[derive(Default)]
    pub(crate) struct FakeStore {
        reference: Option<f64>,
        delay: Option<Duration>,
        broken: bool,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl ReferenceStore for FakeStore {
        async fn reference_reading(
            &self,
            device: &DeviceId,
            series: &str,
            cutoff: DateTime<Utc>,
        ) -> Result<Option<Reading>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            assert_eq!(series, PRESSURE_SERIES);
            assert!(cutoff <= Utc::now() - TREND_WINDOW);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.broken {
                return Err(StoreError::Worker("disk on fire".to_owned()));
            }
            Ok(self.reference.map(|pressure| Reading {
                device: device.clone(),
                timestamp: cutoff,
                pressure,
            }))
        }
    }

    #[derive(Default)]
    pub(crate) struct FakePublisher {
        failures: AtomicUsize,
        published: Mutex<Vec<(String, String)>>,
    }

    impl FakePublisher {
        fn failing(times: usize) -> Self {
            Self {
                failures: AtomicUsize::new(times),
                ..Default::default()
            }
        }

        fn published(&self) -> Vec<(String, String)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ForecastPublisher for FakePublisher {
        async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return disconnected_publisher()
                    .publish_retained(topic, payload)
                    .await;
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_owned()));
            Ok(())
        }
    }

    // Publishing fails once the client's event loop is gone.
    fn disconnected_publisher() -> MqttPublisher {
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 1);
        drop(eventloop);
        MqttPublisher::new(client)
    }

    pub(crate) fn device() -> DeviceId {
        DeviceId::parse("station").unwrap()
    }

    fn pipeline(store: FakeStore, publisher: FakePublisher) -> Pipeline<FakeStore, FakePublisher> {
        Pipeline::new(device(), store, publisher, Duration::from_secs(1), 3)
    }

    pub(crate) fn store_with(reference: f64) -> FakeStore {
        FakeStore {
            reference: Some(reference),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publishes_retained_glyph() {
        let p = pipeline(store_with(1055.0), FakePublisher::default());

        let f = p.process(br#"{"hPa_0": 1050.0}"#).await.unwrap();
        assert_eq!(f.trend, Trend::Falling);
        assert_eq!(f.code, ForecastCode::A);
        assert_eq!(
            p.publisher.published(),
            vec![("station/rcv".to_owned(), "☀️".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_rising_pressure() {
        let p = pipeline(store_with(995.0), FakePublisher::default());

        let f = p.process(br#"{"hPa_0": 1000.0}"#).await.unwrap();
        assert_eq!(f.trend, Trend::Rising);
        assert_eq!(f.code, ForecastCode::G);
        assert_eq!(p.publisher.published()[0].1, "⛅");
    }

    #[tokio::test]
    async fn test_missing_reference_does_not_publish() {
        let p = pipeline(FakeStore::default(), FakePublisher::default());

        let err = p.process(br#"{"hPa_0": 1012.0}"#).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoReferenceReading { .. }));
        assert!(!err.is_retryable());
        assert!(p.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_skips_store() {
        let p = pipeline(store_with(1012.0), FakePublisher::default());

        let payloads: [&[u8]; 3] = [br#"{"temperature": 20.1}"#, b"", b"{"];
        for payload in payloads {
            let err = p.process(payload).await.unwrap_err();
            assert!(matches!(err, PipelineError::MalformedPayload(_)));
        }
        assert_eq!(p.store.queries.load(Ordering::SeqCst), 0);
        assert!(p.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let store = FakeStore {
            broken: true,
            ..Default::default()
        };
        let p = pipeline(store, FakePublisher::default());

        let err = p.process(br#"{"hPa_0": 1012.0}"#).await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert!(p.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = FakeStore {
            reference: Some(1012.0),
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let p = Pipeline::new(
            device(),
            store,
            FakePublisher::default(),
            Duration::from_millis(20),
            0,
        );

        let err = p.process(br#"{"hPa_0": 1012.0}"#).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StoreUnavailable(StoreError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_retried_until_success() {
        let p = pipeline(store_with(1012.0), FakePublisher::failing(2));

        p.process(br#"{"hPa_0": 1012.0}"#).await.unwrap();
        assert_eq!(p.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_retries() {
        let p = Pipeline::new(
            device(),
            store_with(1012.0),
            FakePublisher::failing(5),
            Duration::from_secs(1),
            1,
        );

        let err = p.process(br#"{"hPa_0": 1012.0}"#).await.unwrap_err();
        assert!(matches!(err, PipelineError::PublishFailure(_)));
        assert!(p.publisher.published().is_empty());
        assert_eq!(p.publisher.failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dispatcher_collects_results() {
        let mut dispatcher = Dispatcher::new(pipeline(store_with(1012.0), FakePublisher::default()));

        dispatcher.dispatch(br#"{"hPa_0": 1012.0}"#.to_vec());
        dispatcher.dispatch(b"garbage".to_vec());
        dispatcher.dispatch(br#"{"hPa_0": 980.0}"#.to_vec());

        let stats = dispatcher.drain().await;
        assert_eq!(
            stats,
            Stats {
                published: 2,
                dropped: 1
            }
        );
        assert_eq!(dispatcher.in_flight(), 0);

        let mut glyphs: Vec<String> = dispatcher
            .pipeline
            .publisher
            .published()
            .into_iter()
            .map(|(_, glyph)| glyph)
            .collect();
        glyphs.sort();
        let mut expected = vec!["🌤️".to_owned(), "🌧️".to_owned()];
        expected.sort();
        assert_eq!(glyphs, expected);
    }
}
