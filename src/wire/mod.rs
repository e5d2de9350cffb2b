//! Wire format: packet/payload types and the framing codec built on them.

pub mod codec;
pub mod types;
