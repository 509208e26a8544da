//! # Wire Protocol
//!
//! Length-framed binary protocol carried over one TCP stream per peer.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Length (4 bytes, LE) - counts the body bytes only            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Op (1 byte code + payload) │ Op │ Op │ ...                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Philosophy
//!
//! - One frame batches many ops, bounded by `max_frame_bytes`
//! - Component values travel as opaque `bincode` payloads keyed by type id
//! - The first frame in each direction is a lone `Hello`

mod frame;
mod ops;
mod serialization;

pub use frame::{AssemblerState, FrameAssembler, FrameHeader};
pub use ops::{ComponentPayload, Hello, Op, OpCode, NET_ID_SIZE};
pub use serialization::{encode_single, is_heartbeat_only, FrameWriter, OpReader};
