//! Bidirectional request/response protocol over a pair of byte streams.
//!
//! - `message`: the request / response / notification model and wire envelope.
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `method`: the closed method catalogue and the role serving each method.
//! - `handlers`: per-role handler tables fixed at construction time.
//! - `connection`: the duplex peer (calls, notifications, correlation).
//! - `reader` / `writer`: the per-connection stream tasks.
//! - `handshake`: the `initialize` exchange.

pub mod codec;
pub mod connection;
pub mod handlers;
pub mod handshake;
pub mod message;
pub mod method;
mod reader;
pub mod writer;

pub use connection::Connection;
pub use handlers::{HandlerTable, Handlers};
pub use message::{Message, RequestId};
pub use method::{Method, Role};
