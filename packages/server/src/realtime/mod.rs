//! Realtime session layer: WebSocket transport, session hub, AI streaming.

mod ai_stream;
mod hub;
mod protocol;
mod socket;

pub use ai_stream::{ActiveStream, StreamingSessions};
pub use hub::{Hub, SessionHandle};
pub use protocol::{ClientEvent, OutboundFrame, ServerEvent};
pub use socket::websocket_handler;
