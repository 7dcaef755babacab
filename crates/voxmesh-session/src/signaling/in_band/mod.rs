//! In-band strategy: envelopes ride the room's text chat as prefixed
//! JSON lines. Everything that is not a well-formed envelope for us is
//! ordinary chat and ignored.

pub mod codec;
mod dedup;
mod pipe;
mod realtime_pipe;
mod transport;

pub use dedup::RecentIds;
pub use pipe::{ChatLine, ChatPipe, LocalChatPipe, LocalChatRoom};
pub use realtime_pipe::{ChatMessagePayload, RealtimeChatPipe, CHAT_MESSAGE};
pub use transport::InBandTransport;
