//! Peer channel: a bidirectional, acked, rate-limited link between two agents.

mod channel;
mod token_bucket;

pub use channel::{
    channel_id, Acknowledgement, AckStatus, ChannelError, ChannelEvent, ChannelId, ChannelState,
    MessageEnvelope, PeerChannel, PeerChannelConfig,
};
pub use token_bucket::TokenBucket;
