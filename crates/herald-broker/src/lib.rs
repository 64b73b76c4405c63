// In-process state machine for the herald pub/sub broker.
// One coarse lock guards the user, session, and channel tables; every
// operation is a single critical section and returns owned snapshots, so
// no caller can observe a partial update. The registry never performs
// network I/O: state-changing operations hand back a NotificationEvent
// for the dispatcher to deliver.
use herald_wire::{ChannelSummary, NewsItem, Notification};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

mod credentials;
mod filter;

pub use credentials::{CredentialVerifier, Sha256Credentials};
pub use filter::{ContentFilter, DEFAULT_FORBIDDEN_WORDS};

// Matches the timestamp shape clients render verbatim.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type Result<T> = std::result::Result<T, Error>;

// Display strings are part of the protocol contract: callers match on
// "already exists", "Invalid credentials" and "forbidden words".
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Username already exists")]
    UserExists(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Channel already exists")]
    ChannelExists(String),
    #[error("Channel does not exist")]
    ChannelNotFound(String),
    #[error("Only the channel creator can {0}")]
    NotCreator(ChannelAction),
    #[error("News content contains forbidden words and has been blocked")]
    ForbiddenContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    Delete,
    Publish,
}

impl fmt::Display for ChannelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAction::Delete => write!(f, "delete it"),
            ChannelAction::Publish => write!(f, "publish news"),
        }
    }
}

/// Fan-out unit handed to the notification dispatcher.
///
/// `targets` are client ids snapshotted inside the critical section of
/// the operation that produced the event; endpoints are resolved at
/// delivery time via [`Registry::endpoint_of`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub notification: Notification,
    pub targets: Vec<String>,
}

#[derive(Debug)]
struct User {
    credential_digest: String,
}

#[derive(Debug, Clone)]
struct Session {
    address: SocketAddr,
    notification_port: u16,
}

impl Session {
    // Port 0 means the client never advertised a listener.
    fn endpoint(&self) -> Option<SocketAddr> {
        (self.notification_port != 0)
            .then(|| SocketAddr::new(self.address.ip(), self.notification_port))
    }
}

#[derive(Debug)]
struct Channel {
    name: String,
    description: String,
    creator: String,
    subscribers: HashSet<String>,
    news: Vec<NewsItem>,
}

impl Channel {
    fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            creator: self.creator.clone(),
            subscriber_count: self.subscribers.len(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, User>,
    sessions: HashMap<String, Session>,
    channels: HashMap<String, Channel>,
    // Creation order; keeps listing stable absent create/delete.
    channel_order: Vec<String>,
}

impl State {
    fn summaries(&self) -> Vec<ChannelSummary> {
        self.channel_order
            .iter()
            .filter_map(|name| self.channels.get(name))
            .map(Channel::summary)
            .collect()
    }

    fn all_clients(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }
}

/// Channel/session registry for the herald broker.
///
/// ```
/// use herald_broker::Registry;
///
/// let registry = Registry::new();
/// let addr = "127.0.0.1:50000".parse().expect("addr");
/// registry
///     .register("alice", "secret", addr, 4100)
///     .expect("register");
/// let event = registry
///     .create("tech", "tech news", "alice")
///     .expect("create");
/// assert_eq!(event.targets, vec!["alice".to_string()]);
/// registry.subscribe("tech", "alice").expect("subscribe");
/// assert_eq!(registry.list()[0].subscriber_count, 1);
/// ```
pub struct Registry {
    state: Mutex<State>,
    filter: ContentFilter,
    credentials: Box<dyn CredentialVerifier>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            filter: ContentFilter::default(),
            credentials: Box::new(Sha256Credentials),
        }
    }

    pub fn with_filter(mut self, filter: ContentFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_credentials(mut self, credentials: Box<dyn CredentialVerifier>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Create a user and its session. Fails if the username is taken.
    pub fn register(
        &self,
        username: &str,
        credential: &str,
        address: SocketAddr,
        notification_port: u16,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.users.contains_key(username) {
            return Err(Error::UserExists(username.to_string()));
        }
        let credential_digest = self.credentials.digest(credential);
        state
            .users
            .insert(username.to_string(), User { credential_digest });
        state.sessions.insert(
            username.to_string(),
            Session {
                address,
                notification_port,
            },
        );
        Ok(())
    }

    /// Verify credentials, upsert the session (reconnects arrive with a
    /// fresh ephemeral port) and return the current channel snapshot.
    pub fn login(
        &self,
        username: &str,
        credential: &str,
        address: SocketAddr,
        notification_port: u16,
    ) -> Result<Vec<ChannelSummary>> {
        let mut state = self.state.lock();
        let matches = state
            .users
            .get(username)
            .map(|user| self.credentials.verify(credential, &user.credential_digest))
            .unwrap_or(false);
        if !matches {
            return Err(Error::InvalidCredentials);
        }
        state.sessions.insert(
            username.to_string(),
            Session {
                address,
                notification_port,
            },
        );
        Ok(state.summaries())
    }

    /// Idempotent upsert of a client's notification endpoint.
    pub fn update_endpoint(&self, client_id: &str, address: SocketAddr, notification_port: u16) {
        let mut state = self.state.lock();
        state.sessions.insert(
            client_id.to_string(),
            Session {
                address,
                notification_port,
            },
        );
    }

    /// Resolve a client's notification endpoint at delivery time.
    /// Unknown clients and clients that advertised port 0 yield `None`;
    /// the dispatcher skips those instead of retrying.
    pub fn endpoint_of(&self, client_id: &str) -> Option<SocketAddr> {
        let state = self.state.lock();
        state.sessions.get(client_id).and_then(Session::endpoint)
    }

    pub fn list(&self) -> Vec<ChannelSummary> {
        self.state.lock().summaries()
    }

    /// Create a channel; the event targets every known client.
    pub fn create(&self, name: &str, description: &str, creator: &str) -> Result<NotificationEvent> {
        let mut state = self.state.lock();
        if state.channels.contains_key(name) {
            return Err(Error::ChannelExists(name.to_string()));
        }
        let channel = Channel {
            name: name.to_string(),
            description: description.to_string(),
            creator: creator.to_string(),
            subscribers: HashSet::new(),
            news: Vec::new(),
        };
        let summary = channel.summary();
        state.channels.insert(name.to_string(), channel);
        state.channel_order.push(name.to_string());
        Ok(NotificationEvent {
            notification: Notification::NewChannel {
                channel: summary,
                message: format!("New channel '{name}' created by {creator}"),
            },
            targets: state.all_clients(),
        })
    }

    /// Delete a channel; creator-only. The event targets every known client.
    pub fn delete(&self, name: &str, requester: &str) -> Result<NotificationEvent> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get(name)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        if channel.creator != requester {
            return Err(Error::NotCreator(ChannelAction::Delete));
        }
        state.channels.remove(name);
        state.channel_order.retain(|entry| entry != name);
        Ok(NotificationEvent {
            notification: Notification::ChannelDeleted {
                channel_name: name.to_string(),
                message: format!("Channel '{name}' has been deleted by {requester}"),
            },
            targets: state.all_clients(),
        })
    }

    /// Add a subscriber; subscribing twice is a no-op success.
    pub fn subscribe(&self, name: &str, client_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        channel.subscribers.insert(client_id.to_string());
        Ok(())
    }

    /// Remove a subscriber; unsubscribing a non-subscriber is a no-op success.
    pub fn unsubscribe(&self, name: &str, client_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        channel.subscribers.remove(client_id);
        Ok(())
    }

    /// Append news to a channel; creator-only, content-filtered.
    /// The event targets the subscriber snapshot taken here: anyone who
    /// unsubscribes after this commit receives nothing from later publishes.
    pub fn publish(&self, name: &str, content: &str, requester: &str) -> Result<NotificationEvent> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        if channel.creator != requester {
            return Err(Error::NotCreator(ChannelAction::Publish));
        }
        if !self.filter.allows(content) {
            return Err(Error::ForbiddenContent);
        }
        let news = NewsItem {
            content: content.to_string(),
            author: requester.to_string(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        channel.news.push(news.clone());
        let targets = channel.subscribers.iter().cloned().collect();
        Ok(NotificationEvent {
            notification: Notification::NewNews {
                channel_name: name.to_string(),
                news,
                message: format!("New news in channel '{name}'"),
            },
            targets,
        })
    }

    /// Channels where the client is currently subscribed, in listing order.
    pub fn subscriptions_of(&self, client_id: &str) -> Vec<ChannelSummary> {
        let state = self.state.lock();
        state
            .channel_order
            .iter()
            .filter_map(|name| state.channels.get(name))
            .filter(|channel| channel.subscribers.contains(client_id))
            .map(Channel::summary)
            .collect()
    }

    /// Snapshot of a channel's append-only news log, oldest first.
    pub fn news_of(&self, name: &str) -> Option<Vec<NewsItem>> {
        let state = self.state.lock();
        state.channels.get(name).map(|channel| channel.news.clone())
    }
}
