//! Client session: pending-request table and call/notify surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::message::Message;
use crate::transport::ClientTransport;
use crate::types::{Error, Result};

type PendingReply = oneshot::Sender<(Option<Value>, Option<Value>)>;

/// Caller-side session over one [`ClientTransport`].
///
/// Allocates request ids from an atomic counter and correlates replies via
/// a pending-request table. Ids may wrap; a slot is freed as soon as its
/// call resolves or is abandoned, so reuse is safe.
pub struct Client {
    transport: Arc<dyn ClientTransport>,
    pending: Mutex<HashMap<u32, PendingReply>>,
    next_id: AtomicU32,
}

impl Client {
    /// Open the transport's reply delivery and return the ready session.
    pub async fn connect(transport: Arc<dyn ClientTransport>) -> Result<Arc<Self>> {
        let client = Arc::new(Self {
            transport: Arc::clone(&transport),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        });
        transport.open(Arc::clone(&client)).await?;
        Ok(client)
    }

    /// Transport-assigned identity of this client.
    pub fn identifier(&self) -> &str {
        self.transport.identifier()
    }

    /// Call a remote method and await its response.
    ///
    /// A non-nil error payload in the response surfaces as
    /// [`Error::Remote`]. No deadline is applied; see
    /// [`call_timeout`](Client::call_timeout).
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let (_id, rx) = self.send_request(method, params).await?;
        Self::resolve(
            rx.await
                .map_err(|_| Error::substrate("transport closed while awaiting reply"))?,
        )
    }

    /// [`call`](Client::call) with a caller-side deadline. On expiry the
    /// pending entry is removed and any late reply for the abandoned id is
    /// discarded by [`on_response`](Client::on_response).
    pub async fn call_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value> {
        let (id, rx) = self.send_request(method, params).await?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(reply)) => Self::resolve(reply),
            Ok(Err(_)) => Err(Error::substrate("transport closed while awaiting reply")),
            Err(_) => {
                self.abandon(id).await;
                Err(Error::timeout(format!(
                    "request {} ({}) did not reply within {:?}",
                    id, method, deadline
                )))
            }
        }
    }

    /// Send a notification. Fire-and-forget: no id, no reply, ever.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        let data = Message::Notify {
            method: method.to_string(),
            params,
        }
        .encode()?;
        self.transport.send_data(data).await
    }

    /// Reply delivery from the transport. Resolves the pending call for
    /// `id`; replies for unknown (abandoned or never-issued) ids are
    /// discarded.
    pub async fn on_response(&self, id: u32, error: Option<Value>, result: Option<Value>) {
        match self.pending.lock().await.remove(&id) {
            Some(tx) => {
                // A dropped receiver means the caller gave up; nothing to do.
                let _ = tx.send((error, result));
            }
            None => tracing::debug!("reply for unknown request {} discarded", id),
        }
    }

    /// Close the underlying transport. Pending calls resolve with a
    /// substrate error once their reply channels drop.
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(u32, oneshot::Receiver<(Option<Value>, Option<Value>)>)> {
        let (id, rx) = self.register().await;

        let data = Message::Request {
            id,
            method: method.to_string(),
            params,
        }
        .encode()?;

        if let Err(e) = self.transport.send_data(data).await {
            self.abandon(id).await;
            return Err(e);
        }
        Ok((id, rx))
    }

    fn resolve((error, result): (Option<Value>, Option<Value>)) -> Result<Value> {
        match error {
            Some(err) => Err(Error::Remote(err)),
            None => Ok(result.unwrap_or(Value::Null)),
        }
    }

    async fn register(&self) -> (u32, oneshot::Receiver<(Option<Value>, Option<Value>)>) {
        let mut pending = self.pending.lock().await;
        // Skip ids still in flight; with u32 space this terminates long
        // before the table could plausibly be that full.
        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        (id, rx)
    }

    async fn abandon(&self, id: u32) {
        self.pending.lock().await.remove(&id);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("identifier", &self.identifier())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Transport that records outbound frames and lets the test inject
    /// replies by holding onto the session handle.
    #[derive(Debug, Default)]
    struct LoopbackTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ClientTransport for LoopbackTransport {
        fn identifier(&self) -> &str {
            "loopback"
        }

        async fn open(&self, _session: Arc<Client>) -> Result<()> {
            Ok(())
        }

        async fn send_data(&self, data: Vec<u8>) -> Result<()> {
            self.sent.lock().await.push(data);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn call_resolves_when_response_arrives() {
        let transport = Arc::new(LoopbackTransport::default());
        let client = Client::connect(transport.clone()).await.unwrap();

        let caller = {
            let client = client.clone();
            tokio::spawn(async move { client.call("echo", vec![json!("hi")]).await })
        };

        // Wait for the request frame, then feed the matching reply back.
        let id = loop {
            let sent = transport.sent.lock().await;
            if let Some(frame) = sent.first() {
                let Message::Request { id, method, params } = Message::decode(frame).unwrap()
                else {
                    panic!("expected a request");
                };
                assert_eq!(method, "echo");
                assert_eq!(params, vec![json!("hi")]);
                break id;
            }
            drop(sent);
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        client.on_response(id, None, Some(json!("hi"))).await;
        assert_eq!(caller.await.unwrap().unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn error_payload_surfaces_as_remote_error() {
        let transport = Arc::new(LoopbackTransport::default());
        let client = Client::connect(transport.clone()).await.unwrap();

        let caller = {
            let client = client.clone();
            tokio::spawn(async move { client.call("boom", vec![]).await })
        };

        while transport.sent.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        client.on_response(0, Some(json!("went wrong")), None).await;

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
    }

    #[tokio::test]
    async fn notify_has_no_id_and_no_pending_entry() {
        let transport = Arc::new(LoopbackTransport::default());
        let client = Client::connect(transport.clone()).await.unwrap();

        client.notify("log", vec![json!("x")]).await.unwrap();

        let sent = transport.sent.lock().await;
        let decoded = Message::decode(&sent[0]).unwrap();
        assert_eq!(
            decoded,
            Message::Notify {
                method: "log".to_string(),
                params: vec![json!("x")],
            }
        );
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn late_reply_for_abandoned_id_is_discarded() {
        let transport = Arc::new(LoopbackTransport::default());
        let client = Client::connect(transport.clone()).await.unwrap();

        let err = client
            .call_timeout("slow", vec![], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // The timed-out call's slot is gone; a late reply must be a no-op.
        client.on_response(0, None, Some(json!("late"))).await;
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_get_distinct_ids() {
        let transport = Arc::new(LoopbackTransport::default());
        let client = Client::connect(transport.clone()).await.unwrap();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.call("echo", vec![]).await })
            })
            .collect();

        while transport.sent.lock().await.len() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let ids: Vec<u32> = {
            let sent = transport.sent.lock().await;
            sent.iter()
                .map(|frame| match Message::decode(frame).unwrap() {
                    Message::Request { id, .. } => id,
                    other => panic!("expected request, got {:?}", other),
                })
                .collect()
        };
        let unique: std::collections::HashSet<u32> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 4);

        for id in ids {
            client.on_response(id, None, Some(json!(id))).await;
        }
        for caller in callers {
            caller.await.unwrap().unwrap();
        }
    }
}
