// Best-effort notification dispatcher.
//
// State-changing registry operations hand a NotificationEvent here after
// their response is already on the wire. Deliveries run on a bounded
// worker pool fed by an mpsc queue, so a slow or unreachable subscriber
// never delays request handling; a full queue drops deliveries instead
// of blocking. There is no retry, no acknowledgment, and no ordering
// guarantee between deliveries.
use bytes::Bytes;
use herald_broker::{NotificationEvent, Registry};
use herald_wire::{self as wire, Notification};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::BrokerConfig;

#[derive(Debug)]
struct Delivery {
    client_id: String,
    payload: Bytes,
    kind: &'static str,
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::Sender<Delivery>,
}

impl Dispatcher {
    /// Spawn the worker pool and return the dispatch handle.
    pub fn start(registry: Arc<Registry>, config: &BrokerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.notify_queue_depth);
        // tokio mpsc receivers are single-consumer; workers share one
        // behind an async mutex and take deliveries as they free up.
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let delivery_timeout = Duration::from_millis(config.notify_timeout_ms);
        for worker in 0..config.notify_workers.max(1) {
            let rx = Arc::clone(&rx);
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                loop {
                    let delivery = rx.lock().await.recv().await;
                    let Some(delivery) = delivery else { break };
                    deliver(&registry, delivery, delivery_timeout).await;
                }
                tracing::debug!(worker, "notification worker stopped");
            });
        }
        Self { queue: tx }
    }

    /// Encode the notification once and enqueue one delivery per target.
    /// Never blocks the caller: overflow drops the delivery.
    pub fn dispatch(&self, event: NotificationEvent) {
        let payload = match event.notification.encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode notification");
                return;
            }
        };
        let kind = notification_kind(&event.notification);
        for client_id in event.targets {
            let delivery = Delivery {
                client_id,
                payload: payload.clone(),
                kind,
            };
            match self.queue.try_send(delivery) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(delivery)) => {
                    metrics::counter!("herald_notify_dropped_total").increment(1);
                    tracing::warn!(
                        client = %delivery.client_id,
                        kind,
                        "notification queue full; dropping delivery"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}

// One transient connection per delivery: connect, write one frame, close.
// Every failure mode is swallowed here; nothing propagates to clients.
async fn deliver(registry: &Registry, delivery: Delivery, deadline: Duration) {
    let Some(endpoint) = registry.endpoint_of(&delivery.client_id) else {
        // No endpoint registered at delivery time: skip, never retry.
        tracing::debug!(client = %delivery.client_id, "no notification endpoint; skipping");
        return;
    };
    let attempt = async {
        let mut stream = TcpStream::connect(endpoint).await?;
        wire::write_frame(&mut stream, &delivery.payload).await?;
        stream.shutdown().await?;
        anyhow::Ok(())
    };
    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(())) => {
            metrics::counter!("herald_notify_sent_total").increment(1);
            tracing::debug!(
                client = %delivery.client_id,
                endpoint = %endpoint,
                kind = delivery.kind,
                "notification delivered"
            );
        }
        Ok(Err(err)) => {
            metrics::counter!("herald_notify_failed_total").increment(1);
            tracing::debug!(
                client = %delivery.client_id,
                endpoint = %endpoint,
                error = %err,
                "notification delivery failed"
            );
        }
        Err(_) => {
            metrics::counter!("herald_notify_failed_total").increment(1);
            tracing::debug!(
                client = %delivery.client_id,
                endpoint = %endpoint,
                "notification delivery timed out"
            );
        }
    }
}

fn notification_kind(notification: &Notification) -> &'static str {
    match notification {
        Notification::NewChannel { .. } => "new_channel",
        Notification::ChannelDeleted { .. } => "channel_deleted",
        Notification::NewNews { .. } => "new_news",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            bind: "127.0.0.1:0".parse().expect("addr"),
            metrics_bind: "127.0.0.1:0".parse().expect("addr"),
            max_frame_bytes: wire::DEFAULT_MAX_FRAME_BYTES,
            notify_workers: 2,
            notify_queue_depth: 64,
            notify_timeout_ms: 500,
        }
    }

    async fn recv_notification(listener: &TcpListener) -> Result<Notification> {
        let (mut stream, _) = listener.accept().await.context("accept")?;
        let frame = wire::read_frame(&mut stream, wire::DEFAULT_MAX_FRAME_BYTES)
            .await
            .context("read frame")?
            .context("empty connection")?;
        Notification::decode(&frame).context("decode")
    }

    #[tokio::test]
    async fn dispatch_delivers_to_registered_endpoint() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let registry = Arc::new(Registry::new());
        let control: SocketAddr = "127.0.0.1:50000".parse()?;
        registry.register("alice", "secret", control, port).expect("register");

        let dispatcher = Dispatcher::start(Arc::clone(&registry), &test_config());
        let notification = Notification::ChannelDeleted {
            channel_name: "tech".to_string(),
            message: "gone".to_string(),
        };
        dispatcher.dispatch(NotificationEvent {
            notification: notification.clone(),
            targets: vec!["alice".to_string()],
        });

        let received = timeout(Duration::from_secs(2), recv_notification(&listener))
            .await
            .context("delivery")??;
        assert_eq!(received, notification);
        Ok(())
    }

    #[tokio::test]
    async fn failed_delivery_does_not_affect_other_targets() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let good_port = listener.local_addr()?.port();
        // A port nothing is listening on.
        let dead = TcpListener::bind("127.0.0.1:0").await?;
        let dead_port = dead.local_addr()?.port();
        drop(dead);

        let registry = Arc::new(Registry::new());
        let control: SocketAddr = "127.0.0.1:50000".parse()?;
        registry.register("gone", "secret", control, dead_port).expect("register");
        registry.register("alive", "secret", control, good_port).expect("register");

        let dispatcher = Dispatcher::start(Arc::clone(&registry), &test_config());
        let notification = Notification::ChannelDeleted {
            channel_name: "tech".to_string(),
            message: "gone".to_string(),
        };
        dispatcher.dispatch(NotificationEvent {
            notification: notification.clone(),
            targets: vec!["gone".to_string(), "alive".to_string()],
        });

        let received = timeout(Duration::from_secs(2), recv_notification(&listener))
            .await
            .context("delivery")??;
        assert_eq!(received, notification);
        Ok(())
    }

    #[tokio::test]
    async fn targets_without_endpoint_are_skipped() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let registry = Arc::new(Registry::new());
        let control: SocketAddr = "127.0.0.1:50000".parse()?;
        // Port 0 means "never advertised a listener".
        registry.register("mute", "secret", control, 0).expect("register");
        registry.register("alice", "secret", control, port).expect("register");

        let dispatcher = Dispatcher::start(Arc::clone(&registry), &test_config());
        let notification = Notification::ChannelDeleted {
            channel_name: "tech".to_string(),
            message: "gone".to_string(),
        };
        dispatcher.dispatch(NotificationEvent {
            notification: notification.clone(),
            targets: vec!["mute".to_string(), "ghost".to_string(), "alice".to_string()],
        });

        let received = timeout(Duration::from_secs(2), recv_notification(&listener))
            .await
            .context("delivery")??;
        assert_eq!(received, notification);
        Ok(())
    }
}
