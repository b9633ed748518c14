//! Control loop fanning enriched messages out to Telegram

use crate::error::RelayError;
use crate::logging::log_error;
use crate::router::RoutingTable;
use crate::source::EnrichedMessage;
use crate::telegram::TelegramClient;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Dispatcher {
    routing: Arc<ArcSwap<RoutingTable>>,
    telegram: TelegramClient,
}

impl Dispatcher {
    pub fn new(routing: Arc<ArcSwap<RoutingTable>>, telegram: TelegramClient) -> Self {
        Self { routing, telegram }
    }

    /// Multiplex cancellation, pipeline errors and messages until cancelled
    ///
    /// Deliveries are spawned and never awaited here.
    pub async fn run(
        &self,
        mut messages: mpsc::Receiver<EnrichedMessage>,
        mut errors: mpsc::Receiver<RelayError>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(error) = errors.recv() => log_error("relay_pipeline", &error),
                message = messages.recv() => match message {
                    Some(message) => {
                        self.dispatch(message, &cancel);
                    }
                    None => {
                        tracing::debug!("Message channel closed");
                        break;
                    }
                },
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Route one message and start a delivery per chat of the chosen target
    pub fn dispatch(
        &self,
        message: EnrichedMessage,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let table = self.routing.load_full();
        let (target, options) = table.route(message.app_id());

        tracing::debug!(
            app_id = message.app_id(),
            target = %target.name,
            chats = target.chat_ids.len(),
            "Dispatching message"
        );

        let message = Arc::new(message);
        target
            .chat_ids
            .iter()
            .map(|chat_id| {
                let client = self.telegram.clone();
                let message = Arc::clone(&message);
                let token = target.token.clone();
                let chat_id = chat_id.clone();
                let options = options.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!(chat_id = %chat_id, "Delivery abandoned on shutdown");
                        }
                        _ = client.send(&message, &token, &chat_id, &options) => {}
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FormattingOptions, Target};
    use crate::source::Event;
    use crate::telegram::ChatId;
    use mockito::Matcher;
    use std::time::Duration;

    fn message(app_id: u32) -> EnrichedMessage {
        EnrichedMessage {
            event: Event {
                app_id,
                title: "Disk".to_string(),
                body: "full".to_string(),
                ..Event::default()
            },
            app_name: "Monitor".to_string(),
            app_description: String::new(),
        }
    }

    fn routing() -> Arc<ArcSwap<RoutingTable>> {
        let ops = Target {
            name: "ops".to_string(),
            token: "ops-token".to_string(),
            chat_ids: vec![ChatId::new("1"), ChatId::new("2")],
            app_ids: vec![5],
            format: None,
        };
        let default = Target {
            name: "default".to_string(),
            token: "default-token".to_string(),
            chat_ids: vec![ChatId::new("100")],
            app_ids: vec![],
            format: None,
        };
        Arc::new(ArcSwap::from_pointee(RoutingTable::new(
            vec![ops],
            default,
            FormattingOptions::default(),
        )))
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_per_chat() {
        let mut server = mockito::Server::new_async().await;
        let chat1 = server
            .mock("POST", "/botops-token/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({"chat_id": "1"})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let chat2 = server
            .mock("POST", "/botops-token/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({"chat_id": "2"})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (err_tx, mut err_rx) = mpsc::channel(10);
        let dispatcher = Dispatcher::new(routing(), TelegramClient::new(server.url(), err_tx));

        let handles = dispatcher.dispatch(message(5), &CancellationToken::new());
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.await.unwrap();
        }

        chat1.assert_async().await;
        chat2.assert_async().await;
        assert!(err_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_unclaimed_app_uses_default() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botdefault-token/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({"chat_id": "100"})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (err_tx, _err_rx) = mpsc::channel(10);
        let dispatcher = Dispatcher::new(routing(), TelegramClient::new(server.url(), err_tx));

        for handle in dispatcher.dispatch(message(9), &CancellationToken::new()) {
            handle.await.unwrap();
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_dispatch_sees_swapped_routing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botnew-token/sendMessage")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let routing = routing();
        let (err_tx, _err_rx) = mpsc::channel(10);
        let dispatcher =
            Dispatcher::new(routing.clone(), TelegramClient::new(server.url(), err_tx));

        let replacement = Target {
            name: "default".to_string(),
            token: "new-token".to_string(),
            chat_ids: vec![ChatId::new("7")],
            app_ids: vec![],
            format: None,
        };
        routing.store(Arc::new(RoutingTable::new(
            vec![],
            replacement,
            FormattingOptions::default(),
        )));

        for handle in dispatcher.dispatch(message(5), &CancellationToken::new()) {
            handle.await.unwrap();
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_run_delivers_and_keeps_going_after_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botdefault-token/sendMessage")
            .with_status(200)
            .create_async()
            .await;

        let (err_tx, err_rx) = mpsc::channel(10);
        let (msg_tx, msg_rx) = mpsc::channel(10);
        let dispatcher = Dispatcher::new(
            routing(),
            TelegramClient::new(server.url(), err_tx.clone()),
        );
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let handle = tokio::spawn(async move { dispatcher.run(msg_rx, err_rx, token).await });

        err_tx.send(RelayError::Lookup(3)).await.unwrap();
        msg_tx.send(message(9)).await.unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if mock.matched_async().await {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher should exit on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_exits_when_cancelled_while_idle() {
        let (err_tx, err_rx) = mpsc::channel(1);
        let (_msg_tx, msg_rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(routing(), TelegramClient::new("http://127.0.0.1:1", err_tx));
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), dispatcher.run(msg_rx, err_rx, cancel))
            .await
            .unwrap();
    }
}
