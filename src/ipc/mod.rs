//! IPC codec and wire protocol: MessagePack over length-prefixed frames.

pub mod codec;
pub mod protocol;
