//! MuxCore - correlated request/response multiplexing
//!
//! Many concurrent callers share one long-lived connection. Each message
//! carries a correlation key; replies are grouped with their request by key
//! and handed back to the caller that is waiting on that key.
//!
//! # Core Concepts
//!
//! - **Correlation key**: carved out of every payload by a [`CorrelationStrategy`]
//! - **Group**: the request echo plus its replies, held by the [`Aggregator`]
//! - **Release**: a [`ReleaseStrategy`] decides when a group is complete
//! - **Discard**: the [`Reaper`] evicts groups that miss their deadline
//! - **Pending call**: one waiter per in-flight call, resolved exactly once
//!
//! # Modules
//!
//! - [`key`] - correlation key extraction
//! - [`aggregator`] - group table, release strategies, output processors
//! - [`reaper`] - timeout sweeper and discard sink
//! - [`gateway`] - caller facade and dispatcher
//! - [`transport`] - transport boundary and in-memory transport
//! - [`handler`] - handler and discard policy boundary
//! - [`observer`] - connection event notifications
//! - [`config`] - configuration

pub mod aggregator;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod key;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod reaper;
pub mod transport;

// Re-export commonly used types
pub use aggregator::{
    AdmitResult, Aggregator, Group, GroupId, GroupState, OutputProcessor, PositionOutputProcessor, ReleaseStrategy,
    SizeReleaseStrategy,
};
pub use config::MuxConfig;
pub use error::{CallResult, MuxError};
pub use gateway::{CallId, Dispatcher, Gateway, GatewayBuilder};
pub use handler::{DiscardPolicy, FailOnDiscard, Handler};
pub use key::{CorrelationKey, CorrelationStrategy, PrefixExtractor};
pub use message::{Direction, Message};
pub use metrics::MuxMetrics;
pub use observer::{ConnectionEvent, ConnectionObserver, LoggingObserver};
pub use reaper::{DiscardSink, Reaper};
pub use transport::{MemoryTransport, Transport, TransportEvent};
