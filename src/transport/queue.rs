//! Queue-backed reference transport.
//!
//! Proves the transport contract is substrate-agnostic: instead of socket
//! callbacks, a long-lived worker blocking-pops a shared durable queue and
//! translates each popped item into the same inbound-frame callbacks the
//! socket transport uses. Nothing above this layer special-cases it.
//!
//! Each item on a queue is an envelope wrapping the RPC frame:
//!
//! ```text
//! [payload:bin, channel_tag:u32, reply_to:str]   request direction
//! [payload:bin, channel_tag:u32, nil]            reply direction
//! ```
//!
//! `channel_tag` distinguishes this protocol's traffic from unrelated
//! consumers sharing the queue namespace; foreign tags are skipped with a
//! warning, never treated as fatal. `reply_to` names the per-client queue
//! that carries the response back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::queue::QueueSubstrate;
use crate::server::Server;
use crate::session::Client;
use crate::transport::{ClientTransport, Sendable, ServerTransport};
use crate::types::{ClientId, Error, Result, RpcConfig};

/// Sentinel marking envelopes that belong to this protocol.
pub const CHANNEL_TAG: u32 = 535;

/// Inbound queue for a named service.
pub fn inbound_queue(service: &str) -> String {
    format!("rpc:{}", service)
}

/// Per-client reply queue.
pub fn reply_queue(identifier: &str) -> String {
    format!("rpc-reply:{}", identifier)
}

/// Substrate-level wrapper around an encoded RPC frame.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Envelope(
    #[serde(with = "serde_bytes")] Vec<u8>,
    u32,
    Option<String>,
);

impl Envelope {
    fn encode(payload: Vec<u8>, reply_to: Option<String>) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&Envelope(payload, CHANNEL_TAG, reply_to))?)
    }

    fn payload(&self) -> &[u8] {
        &self.0
    }

    fn channel_tag(&self) -> u32 {
        self.1
    }

    fn reply_to(&self) -> Option<&str> {
        self.2.as_deref()
    }
}

/// Server side of the queue transport.
///
/// `listen` spawns an unbounded pop loop on the service's inbound queue.
/// Substrate read failures are caught per iteration and never terminate
/// the loop; only `close` does.
pub struct QueueServerTransport {
    substrate: Arc<dyn QueueSubstrate>,
    service: String,
    config: RpcConfig,
    cancel: CancellationToken,
}

impl QueueServerTransport {
    pub fn new(
        substrate: Arc<dyn QueueSubstrate>,
        service: impl Into<String>,
        config: RpcConfig,
    ) -> Self {
        Self {
            substrate,
            service: service.into(),
            config,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl ServerTransport for QueueServerTransport {
    async fn listen(&self, server: Arc<Server>) -> Result<()> {
        let queue = inbound_queue(&self.service);

        // Probe the substrate so an unreachable broker surfaces at listen
        // time rather than as an endless retry loop. An item popped by the
        // probe is handed to the delivery task, not lost.
        let probed = self
            .substrate
            .pop(&queue, std::time::Duration::ZERO)
            .await
            .map_err(|e| Error::bind(format!("queue {} unreachable: {}", queue, e)))?;
        tracing::info!("rpc listening on queue {}", queue);

        let substrate = self.substrate.clone();
        let cancel = self.cancel.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            if let Some(raw) = probed {
                deliver(&substrate, &server, &raw).await;
            }
            pop_loop(substrate, queue, server, cancel, config).await;
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

async fn pop_loop(
    substrate: Arc<dyn QueueSubstrate>,
    queue: String,
    server: Arc<Server>,
    cancel: CancellationToken,
    config: RpcConfig,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("queue listener {} shutting down", queue);
                break;
            }
            popped = substrate.pop(&queue, config.pop_timeout()) => {
                match popped {
                    Ok(Some(raw)) => deliver(&substrate, &server, &raw).await,
                    Ok(None) => {} // pop timed out, try again
                    Err(e) => {
                        tracing::warn!("queue {} read failed: {}", queue, e);
                        tokio::time::sleep(config.retry_backoff()).await;
                    }
                }
            }
        }
    }
}

/// Unwrap one popped envelope and route its frame into the server.
async fn deliver(substrate: &Arc<dyn QueueSubstrate>, server: &Arc<Server>, raw: &[u8]) {
    let envelope: Envelope = match rmp_serde::from_slice(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("undecodable envelope: {}", e);
            return;
        }
    };
    if envelope.channel_tag() != CHANNEL_TAG {
        tracing::warn!("foreign channel tag {} ignored", envelope.channel_tag());
        return;
    }

    match Message::decode(envelope.payload()) {
        Ok(Message::Request { id, method, params }) => {
            let Some(reply_to) = envelope.reply_to() else {
                tracing::warn!("request {} carries no reply queue, dropped", id);
                return;
            };
            // The reply destination is bound per request, so interleaved
            // requests from different clients reply to the right queues.
            let sender = Arc::new(QueueReplySender {
                substrate: substrate.clone(),
                queue: reply_to.to_string(),
            });
            server.on_request(sender, id, method, params).await;
        }
        Ok(Message::Notify { method, params }) => {
            server.on_notify(method, params).await;
        }
        Ok(Message::Response { id, .. }) => {
            tracing::warn!("response frame (id {}) on server queue", id);
        }
        Err(e) => {
            tracing::warn!("undecodable frame in envelope: {}", e);
        }
    }
}

/// Reply path for one queue-delivered request.
struct QueueReplySender {
    substrate: Arc<dyn QueueSubstrate>,
    queue: String,
}

#[async_trait]
impl Sendable for QueueReplySender {
    async fn send_data(&self, data: Vec<u8>) -> Result<()> {
        let enveloped = Envelope::encode(data, None)?;
        self.substrate.push(&self.queue, enveloped).await
    }
}

/// Client side of the queue transport.
///
/// Allocates a collision-resistant identifier, derives its reply queue
/// from it, and polls that queue from a long-lived background worker.
pub struct QueueClientTransport {
    substrate: Arc<dyn QueueSubstrate>,
    service_queue: String,
    identifier: String,
    reply_to: String,
    config: RpcConfig,
    cancel: CancellationToken,
}

impl QueueClientTransport {
    pub fn new(
        substrate: Arc<dyn QueueSubstrate>,
        service: impl Into<String>,
        config: RpcConfig,
    ) -> Self {
        let identifier = ClientId::new().to_string();
        let reply_to = reply_queue(&identifier);
        Self {
            substrate,
            service_queue: inbound_queue(&service.into()),
            identifier,
            reply_to,
            config,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl ClientTransport for QueueClientTransport {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn open(&self, session: Arc<Client>) -> Result<()> {
        let substrate = self.substrate.clone();
        let reply_to = self.reply_to.clone();
        let cancel = self.cancel.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    popped = substrate.pop(&reply_to, config.pop_timeout()) => {
                        match popped {
                            Ok(Some(raw)) => forward_reply(&session, &raw).await,
                            Ok(None) => {} // pop timed out, keep polling
                            Err(e) => {
                                tracing::warn!("reply queue {} read failed: {}", reply_to, e);
                                tokio::time::sleep(config.retry_backoff()).await;
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn send_data(&self, data: Vec<u8>) -> Result<()> {
        let enveloped = Envelope::encode(data, Some(self.reply_to.clone()))?;
        self.substrate.push(&self.service_queue, enveloped).await
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

async fn forward_reply(session: &Arc<Client>, raw: &[u8]) {
    let envelope: Envelope = match rmp_serde::from_slice(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("undecodable reply envelope: {}", e);
            return;
        }
    };
    if envelope.channel_tag() != CHANNEL_TAG {
        tracing::warn!("foreign channel tag {} ignored", envelope.channel_tag());
        return;
    }

    match Message::decode(envelope.payload()) {
        Ok(Message::Response { id, error, result }) => {
            session.on_response(id, error, result).await;
        }
        Ok(other) => {
            tracing::warn!("unexpected frame on reply queue: {:?}", other);
        }
        Err(e) => {
            tracing::warn!("undecodable frame in reply envelope: {}", e);
        }
    }
}

impl std::fmt::Debug for QueueServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueServerTransport")
            .field("service", &self.service)
            .finish()
    }
}

impl std::fmt::Debug for QueueClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClientTransport")
            .field("identifier", &self.identifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queue_names_follow_the_convention() {
        assert_eq!(inbound_queue("calc"), "rpc:calc");
        assert_eq!(reply_queue("abc"), "rpc-reply:abc");
    }

    #[test]
    fn envelope_round_trip() {
        let frame = Message::Notify {
            method: "log".to_string(),
            params: vec![json!("x")],
        }
        .encode()
        .unwrap();

        let enveloped = Envelope::encode(frame.clone(), Some("rpc-reply:me".into())).unwrap();
        let decoded: Envelope = rmp_serde::from_slice(&enveloped).unwrap();

        assert_eq!(decoded.payload(), frame.as_slice());
        assert_eq!(decoded.channel_tag(), CHANNEL_TAG);
        assert_eq!(decoded.reply_to(), Some("rpc-reply:me"));
    }

    #[test]
    fn reply_envelope_has_no_routing_key() {
        let enveloped = Envelope::encode(b"data".to_vec(), None).unwrap();
        let decoded: Envelope = rmp_serde::from_slice(&enveloped).unwrap();
        assert_eq!(decoded.reply_to(), None);
    }

    #[test]
    fn client_transports_get_distinct_identifiers() {
        let substrate = Arc::new(crate::queue::MemoryQueue::new());
        let a = QueueClientTransport::new(substrate.clone(), "svc", RpcConfig::default());
        let b = QueueClientTransport::new(substrate, "svc", RpcConfig::default());
        assert_ne!(a.identifier(), b.identifier());
    }
}
