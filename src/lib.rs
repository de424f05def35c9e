//! # mprpc - lightweight binary RPC dispatch core
//!
//! Exposes selected methods of an object to remote callers over
//! interchangeable transports, correlating asynchronous replies with
//! outstanding calls:
//! - Three-message msgpack wire protocol (Request / Response / Notify)
//! - Server-side dispatch pipeline with at-most-one reply per request
//! - Transport abstraction spanning a connection-oriented socket and a
//!   durable, poll-based message queue
//!
//! ## Architecture
//!
//! ```text
//!  substrate        transport            server            dispatcher
//!  ─────────        ─────────            ──────            ──────────
//!  tcp socket  ──►  accept loop   ──►  on_request  ──►  method table
//!  queue pop   ──►  poll worker   ──►  on_notify         │
//!                        ▲                               ▼
//!                        └──────── send_data ◄──── Responder (single-fire)
//! ```
//!
//! Every transport runs its own delivery task; the server only routes.
//! The [`Responder`] is the one cross-context synchronization point: its
//! sent flag flips with an atomic compare-and-swap so exactly one reply
//! leaves per request id, regardless of who completes it or from where.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod dispatch;
pub mod message;
pub mod queue;
pub mod responder;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use dispatch::{Dispatcher, MethodDispatcher};
pub use message::Message;
pub use responder::Responder;
pub use server::Server;
pub use session::Client;
pub use types::{ClientId, Error, Result, RpcConfig};
