//! Caller-facing side of the engine
//!
//! The [`Gateway`] accepts requests, the [`Dispatcher`] routes them out and
//! routes results back, and the pending call table holds one waiter per
//! outstanding call.

mod core;
mod dispatcher;
mod pending;

pub use self::core::{Gateway, GatewayBuilder};
pub use dispatcher::Dispatcher;
pub use pending::CallId;
