//! TCP socket transports — accept loop and per-connection delivery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::message::{read_frame, write_frame, Message};
use crate::server::Server;
use crate::session::Client;
use crate::transport::{ClientTransport, Sendable, ServerTransport};
use crate::types::{Error, Result, RpcConfig};

/// Server-side TCP transport: one accept loop, one delivery task per
/// connection, all tied to a cancellation token so `close` stops future
/// delivery without touching in-flight replies.
#[derive(Debug)]
pub struct TcpServerTransport {
    addr: SocketAddr,
    config: RpcConfig,
    cancel: CancellationToken,
}

impl TcpServerTransport {
    pub fn new(addr: SocketAddr, config: RpcConfig) -> Self {
        Self {
            addr,
            config,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl ServerTransport for TcpServerTransport {
    async fn listen(&self, server: Arc<Server>) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::bind(format!("{}: {}", self.addr, e)))?;
        tracing::info!("rpc listening on {}", self.addr);

        let cancel = self.cancel.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            accept_loop(listener, server, cancel, config).await;
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    server: Arc<Server>,
    cancel: CancellationToken,
    config: RpcConfig,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("tcp listener shutting down");
                break;
            }
            accept = listener.accept() => {
                let (stream, peer) = match accept {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                tracing::debug!("rpc connection from {}", peer);
                let server = server.clone();
                let cancel = cancel.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, server, cancel, config).await {
                        tracing::warn!("connection from {} error: {}", peer, e);
                    }
                });
            }
        }
    }
}

/// Handle a single connection: read frames → decode → route to the server.
async fn handle_connection(
    stream: TcpStream,
    server: Arc<Server>,
    cancel: CancellationToken,
    config: RpcConfig,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let sender = Arc::new(ConnectionSender {
        writer: Mutex::new(writer),
        write_timeout: config.write_timeout(),
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = tokio::time::timeout(
                config.read_timeout(),
                read_frame(&mut reader, config.max_frame_bytes),
            ) => {
                let payload = match frame {
                    Err(_elapsed) => {
                        tracing::debug!(
                            "read timeout ({}s), dropping connection",
                            config.read_timeout_secs,
                        );
                        break;
                    }
                    Ok(result) => match result? {
                        Some(payload) => payload,
                        None => break, // clean EOF
                    },
                };

                // Decode failures are local to this connection; skip the
                // frame and keep reading.
                match Message::decode(&payload) {
                    Ok(Message::Request { id, method, params }) => {
                        server.on_request(sender.clone(), id, method, params).await;
                    }
                    Ok(Message::Notify { method, params }) => {
                        server.on_notify(method, params).await;
                    }
                    Ok(Message::Response { id, .. }) => {
                        tracing::warn!("response frame (id {}) on server connection", id);
                    }
                    Err(e) => {
                        tracing::warn!("undecodable frame: {}", e);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Reply path of one accepted connection.
struct ConnectionSender {
    writer: Mutex<OwnedWriteHalf>,
    write_timeout: Duration,
}

#[async_trait]
impl Sendable for ConnectionSender {
    async fn send_data(&self, data: Vec<u8>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(self.write_timeout, write_frame(&mut *writer, &data))
            .await
            .map_err(|_| Error::substrate("write timeout, dropping reply"))??;
        Ok(())
    }
}

/// Client-side TCP transport. Connects on `open`, then reads reply frames
/// in a background task and forwards them to the session.
pub struct TcpClientTransport {
    addr: SocketAddr,
    identifier: String,
    config: RpcConfig,
    cancel: CancellationToken,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpClientTransport {
    pub fn new(addr: SocketAddr, config: RpcConfig) -> Self {
        Self {
            addr,
            identifier: format!("tcp:{}", addr),
            config,
            cancel: CancellationToken::new(),
            writer: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientTransport for TcpClientTransport {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn open(&self, session: Arc<Client>) -> Result<()> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| Error::bind(format!("{}: {}", self.addr, e)))?;
        let (mut reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        let cancel = self.cancel.clone();
        let max_frame_bytes = self.config.max_frame_bytes;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = read_frame(&mut reader, max_frame_bytes) => {
                        let payload = match frame {
                            Ok(Some(payload)) => payload,
                            Ok(None) => break, // server closed the connection
                            Err(e) => {
                                tracing::warn!("reply read failed: {}", e);
                                break;
                            }
                        };
                        match Message::decode(&payload) {
                            Ok(Message::Response { id, error, result }) => {
                                session.on_response(id, error, result).await;
                            }
                            Ok(other) => {
                                tracing::warn!("unexpected frame on client connection: {:?}", other);
                            }
                            Err(e) => {
                                tracing::warn!("undecodable reply frame: {}", e);
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn send_data(&self, data: Vec<u8>) -> Result<()> {
        let mut slot = self.writer.lock().await;
        let writer = slot
            .as_mut()
            .ok_or_else(|| Error::substrate("transport not connected"))?;
        tokio::time::timeout(self.config.write_timeout(), write_frame(writer, &data))
            .await
            .map_err(|_| Error::substrate("write timeout"))??;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        *self.writer.lock().await = None;
        Ok(())
    }
}

impl std::fmt::Debug for TcpClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClientTransport")
            .field("addr", &self.addr)
            .finish()
    }
}
