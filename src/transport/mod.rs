//! Transport contracts and the concrete substrates implementing them.
//!
//! A transport bridges a substrate (TCP socket, durable queue) into the
//! server's inbound-frame callbacks. Fundamentally different substrates
//! present the same interface to the dispatcher: the socket transport is
//! callback-driven, the queue transport polls a blocking pop, and neither
//! is special-cased anywhere above this layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::server::Server;
use crate::session::Client;
use crate::types::Result;

pub mod queue;
pub mod tcp;

pub use queue::{QueueClientTransport, QueueServerTransport};
pub use tcp::{TcpClientTransport, TcpServerTransport};

/// Reply path back to the peer that sent a request.
///
/// Implementations track the destination themselves: a socket connection
/// writes to its own stream, a queue reply sender pushes to the reply
/// queue named in the request's envelope.
#[async_trait]
pub trait Sendable: Send + Sync {
    /// Deliver one encoded frame toward its destination.
    async fn send_data(&self, data: Vec<u8>) -> Result<()>;
}

/// Server-side transport: binds a substrate and feeds decoded inbound
/// frames to [`Server::on_request`]/[`Server::on_notify`].
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Establish the listening state and start delivering frames to
    /// `server` from a spawned task. Returns once the substrate is bound;
    /// ongoing delivery happens out-of-band.
    ///
    /// Fails with [`Error::Bind`](crate::Error::Bind) if the substrate
    /// cannot be acquired.
    async fn listen(&self, server: Arc<Server>) -> Result<()>;

    /// Stop future delivery and release substrate resources. Safe to call
    /// from outside the delivery loop; must not deadlock it.
    async fn close(&self) -> Result<()>;
}

/// Client-side transport: carries requests toward a server and feeds
/// decoded replies into the owning session's pending-request table.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Substrate-assigned value identifying this client, used to route
    /// replies back.
    fn identifier(&self) -> &str;

    /// Begin delivering decoded reply frames to `session.on_response`.
    async fn open(&self, session: Arc<Client>) -> Result<()>;

    /// Deliver one encoded frame toward the server.
    async fn send_data(&self, data: Vec<u8>) -> Result<()>;

    /// Stop future delivery and release substrate resources.
    async fn close(&self) -> Result<()>;
}
