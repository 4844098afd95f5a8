//! # Redline
//!
//! A pooled client for RESP2 key-value servers, built on tokio.
//!
//! A [`Client`] owns a bounded [`Pool`] of TCP connections. Ordinary calls
//! lease a connection for exactly one command/reply exchange. Sessions
//! ([`Pipeline`], [`Transaction`], [`PubSub`]) keep one leased connection for
//! their whole lifetime and hand it back when they are closed or dropped.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod idle;
pub mod pipeline;
pub mod pool;
pub mod pubsub;
pub mod resp;
pub mod transaction;

pub use client::Client;
pub use config::Config;
pub use error::{RedlineError, RedlineResult};
pub use pipeline::Pipeline;
pub use pool::{Pool, PoolStats, PooledConnection};
pub use pubsub::{Message, MessageKind, PubSub};
pub use resp::RespValue;
pub use transaction::{Transaction, TxState};
