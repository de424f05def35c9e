//! Single-fire reply completion.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::message::Message;
use crate::transport::Sendable;

/// One Responder exists per inbound request and guarantees a single reply
/// is ever sent for that request id.
///
/// The first call to [`result`](Responder::result) or
/// [`error`](Responder::error) wins; every later call is a no-op. The rule
/// holds across concurrent contexts: the sent flag is flipped with an
/// atomic compare-and-swap before the reply is encoded, so a handler may
/// move the Responder into a spawned task and complete it later.
pub struct Responder {
    sendable: Arc<dyn Sendable>,
    id: u32,
    sent: AtomicBool,
}

impl Responder {
    pub fn new(sendable: Arc<dyn Sendable>, id: u32) -> Self {
        Self {
            sendable,
            id,
            sent: AtomicBool::new(false),
        }
    }

    /// The request id this Responder answers.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether a reply has already been dispatched. Advisory only; the
    /// single-fire guarantee does not depend on callers checking this.
    pub fn sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Complete the request successfully.
    pub async fn result(&self, value: Value) {
        self.complete(None, Some(value)).await;
    }

    /// Complete the request with an error payload.
    pub async fn error(&self, err: Value) {
        self.complete(Some(err), None).await;
    }

    async fn complete(&self, error: Option<Value>, result: Option<Value>) {
        if self
            .sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let message = Message::Response {
            id: self.id,
            error,
            result,
        };
        match message.encode() {
            Ok(data) => {
                if let Err(e) = self.sendable.send_data(data).await {
                    tracing::warn!("reply for request {} not delivered: {}", self.id, e);
                }
            }
            Err(e) => {
                tracing::error!("reply for request {} failed to encode: {}", self.id, e);
            }
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("sent", &self.sent())
            .finish()
    }
}
