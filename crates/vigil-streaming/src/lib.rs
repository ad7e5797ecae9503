//! Vigil Streaming - Reading Ingestion
//!
//! Publish/subscribe intake of live sensor readings and the managed
//! pipeline that turns them into stored observations.
//!
//! Key Features:
//! - In-process broker with `+` / `#` topic filters
//! - Transport trait for plugging in external message sources
//! - Topic addressing and payload parsing
//! - Bounded insert retries and reconnect backoff
//! - Start / stop / health contract for the pipeline task
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod backoff;
pub mod broker;
pub mod payload;
pub mod pipeline;
pub mod topic;
pub mod transport;

pub use backoff::Backoff;
pub use broker::{BrokerReceiver, BrokerStats, ChannelError, Message, MessageBroker, TopicFilter};
pub use payload::{ReadingError, ReadingPayload};
pub use pipeline::{IngestionPipeline, PipelineHandle, PipelineHealth, PipelineMonitor, PipelineState};
pub use topic::TopicAddress;
pub use transport::{BrokerTransport, Transport, TransportError};
