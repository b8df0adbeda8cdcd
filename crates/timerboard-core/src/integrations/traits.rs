use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::CommandEvent;
use crate::error::DeliveryError;

/// Chat channel identifier (a Discord snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a posted board message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: String,
}

/// Every chat transport implements this trait.
///
/// Calls may block or fail independently of the timer store. The engine
/// treats failures as transient and tries again on its next tick.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Short identifier for logs (e.g. "discord", "console").
    fn name(&self) -> &str;

    /// Replace the board message in `channel` with `text`, posting a new
    /// one if there is nothing to edit.
    async fn send_or_edit_board(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageRef, DeliveryError>;

    /// Post a one-off message (notifications and command replies).
    async fn send_notification(&self, channel: ChannelId, text: &str) -> Result<(), DeliveryError>;

    /// Commands posted to `channel` since the previous call, oldest first.
    ///
    /// Transports without an inbound side return nothing.
    async fn fetch_commands(&self, channel: ChannelId) -> Result<Vec<CommandEvent>, DeliveryError> {
        let _ = channel;
        Ok(Vec::new())
    }
}
