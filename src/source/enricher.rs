use crate::error::{RelayError, Result};
use crate::metadata::MetadataCache;
use crate::source::{EnrichedMessage, Event};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Joins raw stream events with their application metadata
#[derive(Clone)]
pub struct Enricher {
    cache: Arc<MetadataCache>,
}

impl Enricher {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self { cache }
    }

    pub async fn enrich(&self, event: Event) -> Result<EnrichedMessage> {
        let app = self.cache.resolve(event.app_id).await?;
        Ok(EnrichedMessage::new(event, &app))
    }

    /// Enrich events one at a time, in arrival order, until cancelled
    ///
    /// An event whose application cannot be resolved is dropped and the
    /// error reported; the loop carries on with the next event.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<Event>,
        messages: mpsc::Sender<EnrichedMessage>,
        errors: mpsc::Sender<RelayError>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let event_id = event.id;
            let message = match self.enrich(event).await {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(event_id = event_id, error = %e, "Dropping event, enrichment failed");
                    if let Err(send_err) = errors.try_send(e) {
                        tracing::warn!(error = %send_err, "Error channel unavailable");
                    }
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = messages.send(message) => {
                    if sent.is_err() {
                        tracing::debug!("Message channel closed, enricher stopping");
                        break;
                    }
                }
            }
        }

        tracing::debug!("Enricher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FakeSource, app};
    use std::time::Duration;

    fn event(id: u32, app_id: u32) -> Event {
        Event {
            id,
            app_id,
            title: format!("event {id}"),
            ..Event::default()
        }
    }

    #[tokio::test]
    async fn test_enrich_attaches_app_metadata() {
        let cache = Arc::new(MetadataCache::new(FakeSource::new(vec![app(7, "Backup")])));
        let enricher = Enricher::new(cache);

        let message = enricher.enrich(event(1, 7)).await.unwrap();
        assert_eq!(message.app_name, "Backup");
        assert_eq!(message.app_description, "Backup description");
        assert_eq!(message.app_id(), 7);
        assert_eq!(message.event.title, "event 1");
    }

    #[tokio::test]
    async fn test_enrich_unknown_app_fails() {
        let cache = Arc::new(MetadataCache::new(FakeSource::new(vec![])));
        let enricher = Enricher::new(cache);

        let err = enricher.enrich(event(1, 42)).await.unwrap_err();
        assert!(matches!(err, RelayError::Lookup(42)));
    }

    #[tokio::test]
    async fn test_run_preserves_order_and_reports_failures() {
        let source = FakeSource::new(vec![app(1, "A"), app(2, "B")]);
        let enricher = Enricher::new(Arc::new(MetadataCache::new(source.clone())));

        let (event_tx, event_rx) = mpsc::channel(10);
        let (msg_tx, mut msg_rx) = mpsc::channel(10);
        let (err_tx, mut err_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let handle = tokio::spawn(async move { enricher.run(event_rx, msg_tx, err_tx, token).await });

        for e in [event(1, 1), event(2, 99), event(3, 2), event(4, 1)] {
            event_tx.send(e).await.unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let msg = tokio::time::timeout(Duration::from_secs(1), msg_rx.recv())
                .await
                .unwrap()
                .unwrap();
            ids.push(msg.event.id);
        }
        assert_eq!(ids, vec![1, 3, 4]);

        let err = err_rx.recv().await.unwrap();
        assert!(matches!(err, RelayError::Lookup(99)));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_input_closes() {
        let enricher = Enricher::new(Arc::new(MetadataCache::new(FakeSource::new(vec![]))));
        let (event_tx, event_rx) = mpsc::channel::<Event>(1);
        let (msg_tx, _msg_rx) = mpsc::channel(1);
        let (err_tx, _err_rx) = mpsc::channel(1);

        drop(event_tx);
        tokio::time::timeout(
            Duration::from_secs(1),
            enricher.run(event_rx, msg_tx, err_tx, CancellationToken::new()),
        )
        .await
        .unwrap();
    }
}
