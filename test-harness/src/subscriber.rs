// Test harness subscriber: subscribes to a channel and prints notifications.
use anyhow::{Context, Result, bail};
use clap::Parser;
use herald_client::{Client, ClientConfig, NotificationListener};
use herald_wire::Notification;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "subscriber")]
#[command(about = "Test harness subscriber for the herald broker")]
struct Args {
    /// Broker address (host:port)
    #[arg(long, default_value = "127.0.0.1:3333")]
    broker: String,

    /// Username to register or log in as
    #[arg(long, default_value = "subscriber")]
    username: String,

    /// Credential for register/login
    #[arg(long, default_value = "secret")]
    credential: String,

    /// Channel to subscribe to
    #[arg(long, default_value = "test-channel")]
    channel: String,

    /// Timeout for receiving notifications in seconds (0 = no timeout)
    #[arg(long, default_value = "60")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        broker = %args.broker,
        username = %args.username,
        channel = %args.channel,
        "Starting subscriber"
    );

    let config = ClientConfig::default();
    let (listener, mut notifications) = NotificationListener::bind(&config).await?;
    info!(port = listener.port(), "Notification listener ready");

    let addr = args
        .broker
        .parse::<std::net::SocketAddr>()
        .context("invalid broker address")?;
    let client = Client::connect(addr, config)
        .await
        .context("connect to broker")?;

    let response = client
        .register(&args.username, &args.credential, listener.port())
        .await?;
    if !response.is_success() {
        if !response.message.contains("already exists") {
            bail!("register failed: {}", response.message);
        }
        let response = client
            .login(&args.username, &args.credential, listener.port())
            .await?;
        if !response.is_success() {
            bail!("login failed: {}", response.message);
        }
    }

    let response = client.subscribe(&args.channel).await?;
    if !response.is_success() {
        bail!("subscribe failed: {}", response.message);
    }
    info!(channel = %args.channel, "Subscribed");

    let start_time = Instant::now();
    let mut received = 0u64;
    let timeout_duration = if args.timeout > 0 {
        Some(Duration::from_secs(args.timeout))
    } else {
        None
    };

    loop {
        let next = if let Some(timeout_dur) = timeout_duration {
            match timeout(timeout_dur, notifications.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("Timeout waiting for notifications, stopping");
                    break;
                }
            }
        } else {
            notifications.recv().await
        };
        let Some(notification) = next else {
            info!("Notification listener closed");
            break;
        };
        received += 1;
        match notification {
            Notification::NewChannel { channel, message } => {
                info!(channel = %channel.name, creator = %channel.creator, %message, "new_channel");
            }
            Notification::ChannelDeleted { channel_name, message } => {
                info!(channel = %channel_name, %message, "channel_deleted");
                if channel_name == args.channel {
                    info!("Subscribed channel deleted, stopping");
                    break;
                }
            }
            Notification::NewNews { channel_name, news, message } => {
                info!(
                    channel = %channel_name,
                    author = %news.author,
                    timestamp = %news.timestamp,
                    content = %news.content,
                    %message,
                    "new_news"
                );
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        received,
        elapsed = format!("{:.2}s", elapsed.as_secs_f64()),
        "Subscriber completed"
    );
    Ok(())
}
