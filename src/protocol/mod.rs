//! Wire protocol codecs
//!
//! Three independent surfaces:
//! - signalling: `HELLO`/`ERROR` literals plus JSON-wrapped SDP and ICE
//!   messages exchanged with the signalling endpoint,
//! - input: compact comma-separated ASCII tokens sent client→host over the
//!   data channel,
//! - control: JSON `{type, data}` messages sent host→client over the data
//!   channel (with one legacy raw-clipboard exception).
//!
//! Everything here is stateless; sockets and channels live elsewhere.

pub mod control;
pub mod input_wire;
pub mod signalling;

pub use control::{ControlMessage, CursorDescriptor};
pub use input_wire::InputToken;
pub use signalling::{IceCandidate, SdpKind, ServerMessage, SessionDescription};
