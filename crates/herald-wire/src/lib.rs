// Wire format for framing herald messages on a TCP byte stream.
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Every frame is a 4-byte big-endian length prefix followed by a UTF-8
// JSON payload; the prefix never counts itself.
pub const LEN_PREFIX: usize = 4;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("frame too large: {length} bytes (cap {max}); refusing")]
    FrameTooLarge { length: usize, max: usize },
    #[error("stream closed mid-frame")]
    Truncated,
    #[error("failed to serialize message")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize message")]
    Deserialize(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one framed payload from `reader`.
///
/// Returns `Ok(None)` when the peer closes cleanly at a frame boundary.
/// The length prefix is validated against `max_frame_bytes` before any
/// payload allocation happens, so a hostile peer cannot force an
/// unbounded buffer.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        // EOF before a complete prefix is a normal close.
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let length = u32::from_be_bytes(prefix) as usize;
    if length > max_frame_bytes {
        return Err(Error::FrameTooLarge {
            length,
            max: max_frame_bytes,
        });
    }
    let mut payload = BytesMut::zeroed(length);
    reader.read_exact(&mut payload[..]).await.map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(err)
        }
    })?;
    Ok(Some(payload.freeze()))
}

/// Write one framed payload to `writer` (prefix, payload, flush).
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        length: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&length.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

fn encode_json<T: Serialize>(value: &T) -> Result<Bytes> {
    let payload = serde_json::to_vec(value).map_err(Error::Serialize)?;
    Ok(Bytes::from(payload))
}

fn decode_json<'de, T: Deserialize<'de>>(payload: &'de [u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(Error::Deserialize)
}

/// Snapshot of one channel as exposed to clients.
///
/// The raw subscriber set never crosses the wire; only its size does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub name: String,
    pub description: String,
    pub creator: String,
    pub subscriber_count: usize,
}

/// One published news item, immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub content: String,
    pub author: String,
    pub timestamp: String,
}

/// Client requests on the control connection.
///
/// ```
/// use herald_wire::Request;
///
/// let request = Request::Subscribe {
///     username: "alice".to_string(),
///     channel_name: "tech".to_string(),
/// };
/// let payload = request.encode().expect("encode");
/// let decoded = Request::decode(&payload).expect("decode");
/// assert_eq!(request, decoded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Register {
        username: String,
        credential: String,
        notification_port: u16,
    },
    Login {
        username: String,
        credential: String,
        notification_port: u16,
    },
    ListChannels {
        username: String,
    },
    CreateChannel {
        username: String,
        channel_name: String,
        description: String,
    },
    DeleteChannel {
        username: String,
        channel_name: String,
    },
    Subscribe {
        username: String,
        channel_name: String,
    },
    Unsubscribe {
        username: String,
        channel_name: String,
    },
    PublishNews {
        username: String,
        channel_name: String,
        content: String,
    },
    GetSubscriptions {
        username: String,
    },
}

impl Request {
    pub fn encode(&self) -> Result<Bytes> {
        encode_json(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode_json(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Response envelope: every request yields exactly one of these.
///
/// Collection fields are present only on the variants that carry them
/// (`login`/`list_channels` responses carry `channels`,
/// `get_subscriptions` carries `subscriptions`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub channels: Option<Vec<ChannelSummary>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subscriptions: Option<Vec<ChannelSummary>>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            channels: None,
            subscriptions: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            channels: None,
            subscriptions: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<ChannelSummary>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<ChannelSummary>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn encode(&self) -> Result<Bytes> {
        encode_json(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode_json(payload)
    }
}

/// Push messages delivered on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    NewChannel {
        channel: ChannelSummary,
        message: String,
    },
    ChannelDeleted {
        channel_name: String,
        message: String,
    },
    NewNews {
        channel_name: String,
        news: NewsItem,
        message: String,
    },
}

impl Notification {
    pub fn encode(&self) -> Result<Bytes> {
        encode_json(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode_json(payload)
    }
}
