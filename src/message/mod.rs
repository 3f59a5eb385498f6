//! Message envelope and wire framing.
//!
//! ## Contents
//! - [`Message`], [`MessageKind`], [`Flags`] the immutable envelope moved through channels
//! - [`codec`] the length-prefixed wire format used by socket transports

pub mod codec;
mod envelope;

pub use codec::MessageCodec;
pub use envelope::{Flags, Message, MessageKind};
