// Request/response behavior over the wire: error envelopes, contractual
// message substrings, and state-conflict handling.
use anyhow::{Context, Result, ensure};
use broker::config::BrokerConfig;
use broker::notify::Dispatcher;
use broker::tcp;
use herald_broker::Registry;
use herald_client::{Client, ClientConfig, NotificationListener};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

async fn start_broker() -> Result<SocketAddr> {
    let registry = Arc::new(Registry::new());
    let config = BrokerConfig {
        bind: "127.0.0.1:0".parse()?,
        metrics_bind: "127.0.0.1:0".parse()?,
        max_frame_bytes: herald_wire::DEFAULT_MAX_FRAME_BYTES,
        notify_workers: 2,
        notify_queue_depth: 64,
        notify_timeout_ms: 1000,
    };
    let dispatcher = Dispatcher::start(Arc::clone(&registry), &config);
    let listener = TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(tcp::serve(listener, registry, dispatcher, config));
    Ok(addr)
}

async fn registered_client(addr: SocketAddr, username: &str) -> Result<Client> {
    let config = ClientConfig::default();
    let (listener, _rx) = NotificationListener::bind(&config).await?;
    let client = Client::connect(addr, config).await?;
    let response = client.register(username, "secret", listener.port()).await?;
    ensure!(response.is_success(), "register failed: {}", response.message);
    // The listener task dies with the guard; port stays advertised.
    drop(listener);
    Ok(client)
}

#[tokio::test]
async fn duplicate_registration_is_rejected() -> Result<()> {
    let addr = start_broker().await?;
    let _alice = registered_client(addr, "alice").await?;

    let client = Client::connect(addr, ClientConfig::default()).await?;
    let response = client.register("alice", "other", 0).await?;
    assert!(!response.is_success());
    assert!(response.message.contains("already exists"));
    Ok(())
}

#[tokio::test]
async fn login_validates_credentials_and_returns_snapshot() -> Result<()> {
    let addr = start_broker().await?;
    let alice = registered_client(addr, "alice").await?;
    alice.create_channel("Tech", "Tech news").await?;
    alice.create_channel("Sports", "Sports news").await?;

    let client = Client::connect(addr, ClientConfig::default()).await?;
    let response = client.login("alice", "wrong", 0).await?;
    assert!(!response.is_success());
    assert_eq!(response.message, "Invalid credentials");

    let response = client.login("ghost", "secret", 0).await?;
    assert_eq!(response.message, "Invalid credentials");

    let response = client.login("alice", "secret", 0).await?;
    ensure!(response.is_success(), "{}", response.message);
    let channels = response.channels.context("login carries channels")?;
    let names: Vec<_> = channels.into_iter().map(|channel| channel.name).collect();
    assert_eq!(names, vec!["Tech", "Sports"]);
    Ok(())
}

#[tokio::test]
async fn only_the_creator_may_delete_or_publish() -> Result<()> {
    let addr = start_broker().await?;
    let alice = registered_client(addr, "alice").await?;
    let bob = registered_client(addr, "bob").await?;
    alice.create_channel("Tech", "Tech news").await?;

    let response = bob.publish_news("Tech", "hostile takeover").await?;
    assert!(!response.is_success());
    assert_eq!(response.message, "Only the channel creator can publish news");

    let response = bob.delete_channel("Tech").await?;
    assert!(!response.is_success());
    assert_eq!(response.message, "Only the channel creator can delete it");

    // Channel state is untouched by the failed attempts.
    let channels = bob.list_channels().await?;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].creator, "alice");
    Ok(())
}

#[tokio::test]
async fn forbidden_content_is_blocked_with_contractual_message() -> Result<()> {
    let addr = start_broker().await?;
    let alice = registered_client(addr, "alice").await?;
    alice.create_channel("Tech", "Tech news").await?;

    for content in ["This contains spam", "free VIRUS download", "a phishing link"] {
        let response = alice.publish_news("Tech", content).await?;
        assert!(!response.is_success());
        assert!(
            response.message.contains("forbidden words"),
            "message was: {}",
            response.message
        );
    }

    let response = alice.publish_news("Tech", "perfectly fine news").await?;
    ensure!(response.is_success(), "{}", response.message);
    Ok(())
}

#[tokio::test]
async fn operations_on_missing_channels_fail_cleanly() -> Result<()> {
    let addr = start_broker().await?;
    let alice = registered_client(addr, "alice").await?;

    for response in [
        alice.subscribe("ghost").await?,
        alice.unsubscribe("ghost").await?,
        alice.publish_news("ghost", "hello").await?,
        alice.delete_channel("ghost").await?,
    ] {
        assert!(!response.is_success());
        assert_eq!(response.message, "Channel does not exist");
    }
    Ok(())
}

#[tokio::test]
async fn duplicate_channel_creation_preserves_the_original() -> Result<()> {
    let addr = start_broker().await?;
    let alice = registered_client(addr, "alice").await?;
    let bob = registered_client(addr, "bob").await?;

    alice.create_channel("Tech", "Tech news").await?;
    let response = bob.create_channel("Tech", "impostor description").await?;
    assert!(!response.is_success());
    assert!(response.message.contains("already exists"));

    let channels = bob.list_channels().await?;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].description, "Tech news");
    assert_eq!(channels[0].creator, "alice");
    Ok(())
}

#[tokio::test]
async fn subscriptions_follow_subscribe_and_unsubscribe() -> Result<()> {
    let addr = start_broker().await?;
    let alice = registered_client(addr, "alice").await?;
    let bob = registered_client(addr, "bob").await?;

    alice.create_channel("Tech", "Tech news").await?;
    alice.create_channel("Sports", "Sports news").await?;
    bob.subscribe("Tech").await?;
    bob.subscribe("Sports").await?;

    let names: Vec<_> = bob
        .subscriptions()
        .await?
        .into_iter()
        .map(|channel| channel.name)
        .collect();
    assert_eq!(names, vec!["Tech", "Sports"]);

    bob.unsubscribe("Tech").await?;
    let names: Vec<_> = bob
        .subscriptions()
        .await?
        .into_iter()
        .map(|channel| channel.name)
        .collect();
    assert_eq!(names, vec!["Sports"]);

    assert!(alice.subscriptions().await?.is_empty());
    Ok(())
}
