//! TcpMux - muxcore over TCP
//!
//! Length-header framed TCP client transport and server, the echo service
//! used for demonstration, and the configuration and CLI for the `tm` binary.

pub mod cli;
pub mod client;
pub mod config;
pub mod echo;
pub mod framing;
pub mod server;

pub use client::TcpTransport;
pub use config::Config;
pub use echo::EchoService;
pub use framing::{FrameError, LengthHeader};
pub use server::Server;
