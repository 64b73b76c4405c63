// TCP control plane: accept loop and per-connection request handling.
//
// One task per accepted connection; the registry is the only shared
// state. Malformed requests are answered with an error response and the
// connection keeps serving; framer errors (oversized or truncated
// frames) terminate the connection only. A clean close leaves the
// client's session and subscriptions in place.
use anyhow::{Context, Result};
use herald_broker::{NotificationEvent, Registry};
use herald_wire::{self as wire, Request, Response};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};

use crate::config::BrokerConfig;
use crate::notify::Dispatcher;

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    config: BrokerConfig,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept connection")?;
        let conn = CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(conn, peer = %peer, "client connected");
        let registry = Arc::clone(&registry);
        let dispatcher = dispatcher.clone();
        let max_frame_bytes = config.max_frame_bytes;
        tokio::spawn(async move {
            match handle_connection(stream, peer, registry, dispatcher, max_frame_bytes).await {
                Ok(()) => tracing::info!(conn, peer = %peer, "client disconnected"),
                Err(err) => tracing::warn!(conn, peer = %peer, error = %err, "connection failed"),
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    max_frame_bytes: usize,
) -> Result<()> {
    loop {
        let frame = match wire::read_frame(&mut stream, max_frame_bytes).await? {
            Some(frame) => frame,
            // Clean close; the session is intentionally retained so a
            // reconnect with the same username takes over delivery.
            None => return Ok(()),
        };
        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(err) => {
                // Malformed input is answered, not fatal.
                tracing::debug!(peer = %peer, error = %err, "invalid request");
                write_response(&mut stream, &Response::error("Invalid request format")).await?;
                continue;
            }
        };
        metrics::counter!("herald_requests_total").increment(1);
        tracing::debug!(peer = %peer, request = request_kind(&request), "request received");

        // A fault inside a handler must never take the broker down.
        let (response, event) =
            match std::panic::catch_unwind(AssertUnwindSafe(|| apply(&registry, &request, peer))) {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(peer = %peer, "request handler panicked");
                    (Response::error("Internal server error"), None)
                }
            };
        write_response(&mut stream, &response).await?;
        // The response is already on the wire; fan-out happens off-path.
        if let Some(event) = event {
            dispatcher.dispatch(event);
        }
    }
}

// Route one request through the registry. Pure dispatch: every arm maps a
// registry result onto the response envelope, and state-changing arms
// forward the registry's notification event.
fn apply(
    registry: &Registry,
    request: &Request,
    peer: SocketAddr,
) -> (Response, Option<NotificationEvent>) {
    match request {
        Request::Register {
            username,
            credential,
            notification_port,
        } => {
            let response = match registry.register(username, credential, peer, *notification_port) {
                Ok(()) => Response::success("Registration successful"),
                Err(err) => Response::error(err.to_string()),
            };
            (response, None)
        }
        Request::Login {
            username,
            credential,
            notification_port,
        } => {
            let response = match registry.login(username, credential, peer, *notification_port) {
                Ok(channels) => Response::success("Login successful").with_channels(channels),
                Err(err) => Response::error(err.to_string()),
            };
            (response, None)
        }
        Request::ListChannels { .. } => (
            Response::success("").with_channels(registry.list()),
            None,
        ),
        Request::CreateChannel {
            username,
            channel_name,
            description,
        } => match registry.create(channel_name, description, username) {
            Ok(event) => (
                Response::success(format!("Channel '{channel_name}' created")),
                Some(event),
            ),
            Err(err) => (Response::error(err.to_string()), None),
        },
        Request::DeleteChannel {
            username,
            channel_name,
        } => match registry.delete(channel_name, username) {
            Ok(event) => (
                Response::success(format!("Channel '{channel_name}' deleted")),
                Some(event),
            ),
            Err(err) => (Response::error(err.to_string()), None),
        },
        Request::Subscribe {
            username,
            channel_name,
        } => {
            let response = match registry.subscribe(channel_name, username) {
                Ok(()) => Response::success(format!("Subscribed to channel '{channel_name}'")),
                Err(err) => Response::error(err.to_string()),
            };
            (response, None)
        }
        Request::Unsubscribe {
            username,
            channel_name,
        } => {
            let response = match registry.unsubscribe(channel_name, username) {
                Ok(()) => Response::success(format!("Unsubscribed from channel '{channel_name}'")),
                Err(err) => Response::error(err.to_string()),
            };
            (response, None)
        }
        Request::PublishNews {
            username,
            channel_name,
            content,
        } => match registry.publish(channel_name, content, username) {
            Ok(event) => (
                Response::success("News published successfully"),
                Some(event),
            ),
            Err(err) => (Response::error(err.to_string()), None),
        },
        Request::GetSubscriptions { username } => (
            Response::success("").with_subscriptions(registry.subscriptions_of(username)),
            None,
        ),
    }
}

async fn write_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let payload = response.encode().context("encode response")?;
    wire::write_frame(stream, &payload)
        .await
        .context("write response")?;
    Ok(())
}

fn request_kind(request: &Request) -> &'static str {
    match request {
        Request::Register { .. } => "register",
        Request::Login { .. } => "login",
        Request::ListChannels { .. } => "list_channels",
        Request::CreateChannel { .. } => "create_channel",
        Request::DeleteChannel { .. } => "delete_channel",
        Request::Subscribe { .. } => "subscribe",
        Request::Unsubscribe { .. } => "unsubscribe",
        Request::PublishNews { .. } => "publish_news",
        Request::GetSubscriptions { .. } => "get_subscriptions",
    }
}
