// High-level client for talking to a herald broker.
//
// Requests and responses share one TCP connection and are strictly
// serialized: an async mutex owns the stream, so a response is always
// matched to the request that produced it. Push notifications arrive on
// a separate listener the client advertises at register/login time.
use anyhow::{Context, Result, anyhow, bail};
use herald_wire::{self as wire, ChannelSummary, Notification, Request, Response};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

// Bounded buffer between the accept loop and the application.
const NOTIFICATION_QUEUE_DEPTH: usize = 64;

/// Client-side configuration.
///
/// ```
/// use herald_client::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert_eq!(config.request_timeout.as_secs(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Round-trip budget per request; expiry is a transport error.
    pub request_timeout: Duration,
    // Cap accepted on inbound frames (responses and notifications).
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_frame_bytes: wire::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

pub struct Client {
    stream: tokio::sync::Mutex<TcpStream>,
    config: ClientConfig,
    // Set after a successful register/login; authenticated calls use it.
    username: Mutex<Option<String>>,
}

impl Client {
    pub async fn connect(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to broker at {addr}"))?;
        Ok(Self {
            stream: tokio::sync::Mutex::new(stream),
            config,
            username: Mutex::new(None),
        })
    }

    pub fn username(&self) -> Option<String> {
        self.username.lock().clone()
    }

    async fn round_trip(&self, request: &Request) -> Result<Response> {
        let payload = request.encode().context("encode request")?;
        let mut stream = self.stream.lock().await;
        timeout(self.config.request_timeout, async {
            wire::write_frame(&mut *stream, &payload)
                .await
                .context("send request")?;
            let frame = wire::read_frame(&mut *stream, self.config.max_frame_bytes)
                .await
                .context("read response")?
                .ok_or_else(|| anyhow!("connection closed before response"))?;
            Response::decode(&frame).context("decode response")
        })
        .await
        .context("request timed out")?
    }

    fn authenticated_username(&self) -> Result<String> {
        self.username
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("not authenticated: register or login first"))
    }

    pub async fn register(
        &self,
        username: &str,
        credential: &str,
        notification_port: u16,
    ) -> Result<Response> {
        let response = self
            .round_trip(&Request::Register {
                username: username.to_string(),
                credential: credential.to_string(),
                notification_port,
            })
            .await?;
        if response.is_success() {
            *self.username.lock() = Some(username.to_string());
        }
        Ok(response)
    }

    /// Log in; on success the response carries the channel snapshot.
    pub async fn login(
        &self,
        username: &str,
        credential: &str,
        notification_port: u16,
    ) -> Result<Response> {
        let response = self
            .round_trip(&Request::Login {
                username: username.to_string(),
                credential: credential.to_string(),
                notification_port,
            })
            .await?;
        if response.is_success() {
            *self.username.lock() = Some(username.to_string());
        }
        Ok(response)
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelSummary>> {
        let username = self.authenticated_username()?;
        let response = self.round_trip(&Request::ListChannels { username }).await?;
        if !response.is_success() {
            bail!("list channels failed: {}", response.message);
        }
        Ok(response.channels.unwrap_or_default())
    }

    pub async fn create_channel(&self, channel_name: &str, description: &str) -> Result<Response> {
        let username = self.authenticated_username()?;
        self.round_trip(&Request::CreateChannel {
            username,
            channel_name: channel_name.to_string(),
            description: description.to_string(),
        })
        .await
    }

    pub async fn delete_channel(&self, channel_name: &str) -> Result<Response> {
        let username = self.authenticated_username()?;
        self.round_trip(&Request::DeleteChannel {
            username,
            channel_name: channel_name.to_string(),
        })
        .await
    }

    pub async fn subscribe(&self, channel_name: &str) -> Result<Response> {
        let username = self.authenticated_username()?;
        self.round_trip(&Request::Subscribe {
            username,
            channel_name: channel_name.to_string(),
        })
        .await
    }

    pub async fn unsubscribe(&self, channel_name: &str) -> Result<Response> {
        let username = self.authenticated_username()?;
        self.round_trip(&Request::Unsubscribe {
            username,
            channel_name: channel_name.to_string(),
        })
        .await
    }

    pub async fn publish_news(&self, channel_name: &str, content: &str) -> Result<Response> {
        let username = self.authenticated_username()?;
        self.round_trip(&Request::PublishNews {
            username,
            channel_name: channel_name.to_string(),
            content: content.to_string(),
        })
        .await
    }

    pub async fn subscriptions(&self) -> Result<Vec<ChannelSummary>> {
        let username = self.authenticated_username()?;
        let response = self
            .round_trip(&Request::GetSubscriptions { username })
            .await?;
        if !response.is_success() {
            bail!("get subscriptions failed: {}", response.message);
        }
        Ok(response.subscriptions.unwrap_or_default())
    }
}

/// Listener for broker push notifications.
///
/// The broker opens one transient connection per notification; each
/// connection carries exactly one frame. Decoded notifications are
/// forwarded through the returned receiver.
pub struct NotificationListener {
    local_addr: SocketAddr,
    accept_task: tokio::task::JoinHandle<()>,
}

impl NotificationListener {
    pub async fn bind(config: &ClientConfig) -> Result<(Self, mpsc::Receiver<Notification>)> {
        let listener = TcpListener::bind("0.0.0.0:0")
            .await
            .context("bind notification listener")?;
        let local_addr = listener.local_addr().context("notification listener addr")?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);
        let max_frame_bytes = config.max_frame_bytes;
        let accept_task = tokio::spawn(accept_loop(listener, tx, max_frame_bytes));
        Ok((Self { local_addr, accept_task }, rx))
    }

    /// Port to advertise as `notification_port` in register/login.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Notification>,
    max_frame_bytes: usize,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::debug!(error = %err, "notification accept failed");
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_notification(stream, tx, max_frame_bytes).await {
                tracing::debug!(error = %err, peer = %peer, "notification connection failed");
            }
        });
    }
}

async fn handle_notification(
    mut stream: TcpStream,
    tx: mpsc::Sender<Notification>,
    max_frame_bytes: usize,
) -> Result<()> {
    let Some(frame) = wire::read_frame(&mut stream, max_frame_bytes).await? else {
        return Ok(());
    };
    let notification = Notification::decode(&frame).context("decode notification")?;
    // A dropped receiver just means the application stopped listening.
    let _ = tx.send(notification).await;
    Ok(())
}
