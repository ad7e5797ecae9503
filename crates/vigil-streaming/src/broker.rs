//! Vigil Message Broker
//!
//! In-process publish/subscribe bus for raw sensor readings. Subscribers
//! register an MQTT-style topic filter (`+` matches one level, `#` matches
//! the remainder) and only see messages whose topic it accepts.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use vigil_common::VigilError;

// =============================================================================
// Message
// =============================================================================

/// A raw reading as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }

    /// Payload as text for logging; invalid UTF-8 is replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// =============================================================================
// Topic Filter
// =============================================================================

/// Parsed subscription filter such as `iot/+/+` or `iot/#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    levels: Vec<String>,
}

impl TopicFilter {
    pub fn parse(filter: &str) -> Result<Self, ChannelError> {
        if filter.is_empty() {
            return Err(ChannelError::InvalidFilter(filter.to_string()));
        }

        let levels: Vec<String> = filter.split('/').map(str::to_string).collect();
        for (i, level) in levels.iter().enumerate() {
            let wildcard_misused = (level.contains('#') && (level != "#" || i != levels.len() - 1))
                || (level.contains('+') && level != "+");
            if wildcard_misused {
                return Err(ChannelError::InvalidFilter(filter.to_string()));
            }
        }
        Ok(Self { levels })
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('/');
        for level in &self.levels {
            match level.as_str() {
                "#" => return true,
                "+" => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                exact => {
                    if parts.next() != Some(exact) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.levels.join("/"))
    }
}

// =============================================================================
// Message Broker
// =============================================================================

/// Fan-out bus over a tokio broadcast channel.
pub struct MessageBroker {
    sender: broadcast::Sender<Message>,
    stats: RwLock<BrokerStats>,
}

impl MessageBroker {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self {
            sender,
            stats: RwLock::new(BrokerStats::default()),
        }
    }

    /// Publish a message. Returns how many subscribers were reachable;
    /// publishing with nobody listening is not an error.
    pub fn publish(&self, message: Message) -> Result<usize, ChannelError> {
        if message.topic.is_empty() || message.topic.contains(&['+', '#'][..]) {
            return Err(ChannelError::InvalidTopic(message.topic));
        }

        let receivers = self.sender.send(message).unwrap_or(0);

        let mut stats = self.stats.write();
        stats.messages_published += 1;
        stats.last_published = Some(Utc::now());
        Ok(receivers)
    }

    pub fn subscribe(&self, filter: &str) -> Result<BrokerReceiver, ChannelError> {
        let filter = TopicFilter::parse(filter)?;
        let receiver = self.sender.subscribe();
        self.stats.write().subscriptions += 1;
        Ok(BrokerReceiver { receiver, filter })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BrokerStats {
        self.stats.read().clone()
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

// =============================================================================
// Broker Receiver
// =============================================================================

/// A subscription handle; dropping it unsubscribes.
pub struct BrokerReceiver {
    receiver: broadcast::Receiver<Message>,
    filter: TopicFilter,
}

impl BrokerReceiver {
    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Receive the next message whose topic matches the filter.
    pub async fn recv(&mut self) -> Result<Message, ChannelError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if self.filter.matches(&message.topic) {
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ChannelError::Closed),
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(ChannelError::Lagged(n)),
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Option<Message>, ChannelError> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if self.filter.matches(&message.topic) {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(ChannelError::Closed),
                Err(broadcast::error::TryRecvError::Lagged(n)) => return Err(ChannelError::Lagged(n)),
            }
        }
    }
}

// =============================================================================
// Broker Statistics
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerStats {
    pub messages_published: u64,
    pub subscriptions: u64,
    pub last_published: Option<DateTime<Utc>>,
}

// =============================================================================
// Channel Error
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    InvalidFilter(String),
    InvalidTopic(String),
    Closed,
    Lagged(u64),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFilter(s) => write!(f, "Invalid topic filter: {}", s),
            Self::InvalidTopic(s) => write!(f, "Invalid publish topic: {}", s),
            Self::Closed => write!(f, "Broker is closed"),
            Self::Lagged(n) => write!(f, "Receiver lagged by {} messages", n),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<ChannelError> for VigilError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::InvalidFilter(_) | ChannelError::InvalidTopic(_) => {
                VigilError::Validation(err.to_string())
            }
            ChannelError::Closed | ChannelError::Lagged(_) => VigilError::Internal(err.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
