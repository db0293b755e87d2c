//! Wire plumbing: frames, envelopes and loopback channels.

pub mod channel;
pub mod framing;
pub mod serializer;

pub use channel::{ChannelHandler, MessageSink, SocketClient, SocketServer};
pub use serializer::{DataSerializer, JsonDataSerializer, serialize_payload};
