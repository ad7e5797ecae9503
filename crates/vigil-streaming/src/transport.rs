//! Vigil Transport
//!
//! Connection seam between the ingestion pipeline and a message source.
//! The pipeline only sees this trait; the in-process broker is one
//! implementation and an external MQTT client would be another.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::broker::{BrokerReceiver, ChannelError, Message, MessageBroker};
use async_trait::async_trait;
use std::sync::Arc;
use vigil_common::VigilError;

// =============================================================================
// Transport Trait
// =============================================================================

/// A subscribable message source.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError>;

    /// Wait for the next message. `ConnectionLost` means the caller should
    /// reconnect and resubscribe; `Lagged` reports skipped messages on a
    /// subscription that is still live.
    async fn recv(&mut self) -> Result<Message, TransportError>;

    async fn disconnect(&mut self);
}

// =============================================================================
// Transport Error
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    ConnectFailed(String),
    NotConnected,
    InvalidFilter(String),
    ConnectionLost(String),
    Lagged(u64),
}

impl TransportError {
    /// True when the pipeline should go back through `Connecting`.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::NotConnected | Self::ConnectionLost(_))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "Connect failed: {}", msg),
            Self::NotConnected => write!(f, "Transport is not connected"),
            Self::InvalidFilter(filter) => write!(f, "Invalid subscription filter: {}", filter),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Lagged(skipped) => write!(f, "Subscriber lagged, {} messages skipped", skipped),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for VigilError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidFilter(_) => VigilError::Configuration(err.to_string()),
            _ => VigilError::Internal(err.to_string()),
        }
    }
}

// =============================================================================
// Broker Transport
// =============================================================================

/// Transport over the in-process [`MessageBroker`].
pub struct BrokerTransport {
    broker: Arc<MessageBroker>,
    connected: bool,
    receiver: Option<BrokerReceiver>,
}

impl BrokerTransport {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        Self {
            broker,
            connected: false,
            receiver: None,
        }
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let receiver = self.broker.subscribe(filter).map_err(|e| match e {
            ChannelError::InvalidFilter(f) => TransportError::InvalidFilter(f),
            other => TransportError::ConnectFailed(other.to_string()),
        })?;
        self.receiver = Some(receiver);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message, TransportError> {
        let receiver = self.receiver.as_mut().ok_or(TransportError::NotConnected)?;
        match receiver.recv().await {
            Ok(message) => Ok(message),
            Err(ChannelError::Lagged(skipped)) => Err(TransportError::Lagged(skipped)),
            Err(e) => {
                self.receiver = None;
                self.connected = false;
                Err(TransportError::ConnectionLost(e.to_string()))
            }
        }
    }

    async fn disconnect(&mut self) {
        self.receiver = None;
        self.connected = false;
    }
}

// =============================================================================
// Tests
// =============================================================================
