//! RPC server: owns transports, routes inbound frames to the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::dispatch::Dispatcher;
use crate::responder::Responder;
use crate::transport::{Sendable, ServerTransport, TcpServerTransport};
use crate::types::{Error, Result, RpcConfig};

/// One RPC endpoint: zero or more transports feeding a single dispatcher.
///
/// Transports call [`on_request`](Server::on_request) and
/// [`on_notify`](Server::on_notify) concurrently from their own delivery
/// tasks; the server performs no synchronization beyond routing.
/// `serve`/`listen`/`close` are expected to be called from a single
/// controlling context, not from within delivery tasks.
pub struct Server {
    dispatcher: RwLock<Option<Arc<dyn Dispatcher>>>,
    transports: Mutex<Vec<Arc<dyn ServerTransport>>>,
    config: RpcConfig,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Self::with_config(RpcConfig::default())
    }

    pub fn with_config(config: RpcConfig) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: RwLock::new(None),
            transports: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Bind the dispatcher that resolves incoming method names.
    ///
    /// Fails with [`Error::Configuration`] if a dispatcher is already
    /// bound; `close` unbinds it.
    pub async fn serve(&self, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
        let mut slot = self.dispatcher.write().await;
        if slot.is_some() {
            return Err(Error::configuration(
                "dispatcher already bound; close() the server first",
            ));
        }
        *slot = Some(dispatcher);
        Ok(())
    }

    /// Start a transport's delivery loop bound to this server and add it
    /// to the active set. If `dispatcher` is given, it is served first.
    pub async fn listen(
        self: Arc<Self>,
        transport: Arc<dyn ServerTransport>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Result<()> {
        if let Some(dispatcher) = dispatcher {
            self.serve(dispatcher).await?;
        }
        transport.listen(Arc::clone(&self)).await?;
        self.transports.lock().await.push(transport);
        Ok(())
    }

    /// Convenience form of [`listen`](Server::listen) constructing the
    /// default TCP transport from an address.
    pub async fn listen_addr(
        self: Arc<Self>,
        addr: SocketAddr,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Result<()> {
        let transport = Arc::new(TcpServerTransport::new(addr, self.config.clone()));
        self.listen(transport, dispatcher).await
    }

    /// Close every active transport and unbind the dispatcher.
    ///
    /// Each close failure is logged and ignored so one bad transport never
    /// blocks the rest of the teardown. Idempotent.
    pub async fn close(&self) {
        let transports: Vec<_> = self.transports.lock().await.drain(..).collect();
        for transport in transports {
            if let Err(e) = transport.close().await {
                tracing::warn!("transport close failed: {}", e);
            }
        }
        *self.dispatcher.write().await = None;
    }

    /// Inbound request from any transport. Builds a Responder bound to
    /// the originating reply path and forwards to the dispatcher.
    pub async fn on_request(
        &self,
        sendable: Arc<dyn Sendable>,
        id: u32,
        method: String,
        params: Vec<Value>,
    ) {
        let responder = Responder::new(sendable, id);
        let dispatcher = self.dispatcher.read().await.clone();
        match dispatcher {
            Some(dispatcher) => {
                dispatcher
                    .dispatch_request(&method, params, responder)
                    .await;
            }
            None => {
                let err = Error::no_handler(format!("request {} for {}", id, method));
                tracing::warn!("{}", err);
                responder.error(Value::String(err.to_string())).await;
            }
        }
    }

    /// Inbound notification from any transport. No reply is ever
    /// produced; handler errors surface only via logging.
    pub async fn on_notify(&self, method: String, params: Vec<Value>) {
        let dispatcher = self.dispatcher.read().await.clone();
        match dispatcher {
            Some(dispatcher) => dispatcher.dispatch_notify(&method, params).await,
            None => tracing::warn!("notify {} dropped, no dispatcher bound", method),
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish()
    }
}
