//! Baton node: wires the relay engines into a running process.
//!
//! The node owns:
//! - the storage backend (LMDB, or in-memory for throwaway deployments)
//! - [`BatonService`], the authorizing facade over the engines and gatekeeper
//! - the broadcast notifier feeding WebSocket subscribers
//! - the periodic rotation task
//! - logging, metrics and shutdown plumbing

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod notifier;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::BatonNode;
pub use notifier::{BroadcastNotifier, TopicEvent};
pub use scheduler::spawn_rotation_loop;
pub use service::{BatonService, LiveToken};
pub use shutdown::{ShutdownController, ShutdownSignal};
