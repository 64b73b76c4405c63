// Test harness publisher: creates a channel and publishes news into it.
use anyhow::{Context, Result, bail};
use clap::Parser;
use herald_client::{Client, ClientConfig, NotificationListener};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "publisher")]
#[command(about = "Test harness publisher for the herald broker")]
struct Args {
    /// Broker address (host:port)
    #[arg(long, default_value = "127.0.0.1:3333")]
    broker: String,

    /// Username to register or log in as
    #[arg(long, default_value = "publisher")]
    username: String,

    /// Credential for register/login
    #[arg(long, default_value = "secret")]
    credential: String,

    /// Channel to create and publish into
    #[arg(long, default_value = "test-channel")]
    channel: String,

    /// Channel description used on creation
    #[arg(long, default_value = "harness channel")]
    description: String,

    /// Number of news items to publish
    #[arg(long, default_value = "10")]
    count: u64,

    /// Delay between publishes in milliseconds
    #[arg(long, default_value = "100")]
    interval_ms: u64,
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
        count = args.count,
        "Starting publisher"
    );

    let config = ClientConfig::default();
    let (listener, _notifications) = NotificationListener::bind(&config).await?;
    let addr = args
        .broker
        .parse::<std::net::SocketAddr>()
        .context("invalid broker address")?;
    let client = Client::connect(addr, config)
        .await
        .context("connect to broker")?;

    // Register, falling back to login when the username is taken.
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
        info!(username = %args.username, "Logged in");
    } else {
        info!(username = %args.username, "Registered");
    }

    let response = client.create_channel(&args.channel, &args.description).await?;
    if !response.is_success() && !response.message.contains("already exists") {
        bail!("create channel failed: {}", response.message);
    }
    info!(channel = %args.channel, "Channel ready");

    let start_time = Instant::now();
    let mut published = 0u64;
    let mut rejected = 0u64;
    for seq in 0..args.count {
        let content = format!("news #{seq} from {}", args.username);
        let response = client.publish_news(&args.channel, &content).await?;
        if response.is_success() {
            published += 1;
        } else {
            rejected += 1;
            warn!(seq, message = %response.message, "Publish rejected");
        }
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    let elapsed = start_time.elapsed();
    info!(
        published,
        rejected,
        elapsed = format!("{:.2}s", elapsed.as_secs_f64()),
        "Publisher completed"
    );
    Ok(())
}
