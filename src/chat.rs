use crate::error::AppResult;
use async_trait::async_trait;

/// A chat message as seen by the link handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: String,
    pub channel_id: String,
    /// Guild the message was posted in
    pub scope_id: String,
    pub text: String,
    /// Posted by this bot
    pub from_self: bool,
}

/// Outbound side of the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post `text` to a channel. Unknown channels are `AppError::MissingChannel`.
    async fn send(&self, channel_id: &str, text: &str) -> AppResult<()>;
}
