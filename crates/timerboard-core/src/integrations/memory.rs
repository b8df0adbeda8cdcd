//! In-process messenger that records deliveries. Used by tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::{ChannelId, MessageRef, Messenger};
use crate::engine::CommandEvent;
use crate::error::DeliveryError;

#[derive(Default)]
pub struct MemoryMessenger {
    boards: Mutex<Vec<(ChannelId, String)>>,
    notifications: Mutex<Vec<(ChannelId, String)>>,
    inbox: Mutex<VecDeque<CommandEvent>>,
    failing: AtomicBool,
}

impl MemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails without recording anything.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn boards(&self) -> Vec<(ChannelId, String)> {
        self.boards.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn last_board(&self) -> Option<String> {
        self.boards().pop().map(|(_, text)| text)
    }

    pub fn notifications(&self) -> Vec<(ChannelId, String)> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    /// Queue a command for the next `fetch_commands` on its channel.
    pub fn push_command(&self, event: CommandEvent) {
        if let Ok(mut inbox) = self.inbox.lock() {
            inbox.push_back(event);
        }
    }

    fn check(&self) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Status {
                status: 503,
                body: "memory messenger set to fail".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for MemoryMessenger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send_or_edit_board(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageRef, DeliveryError> {
        self.check()?;
        if let Ok(mut boards) = self.boards.lock() {
            boards.push((channel, text.to_string()));
        }
        Ok(MessageRef {
            channel_id: channel,
            message_id: "memory-board".into(),
        })
    }

    async fn send_notification(&self, channel: ChannelId, text: &str) -> Result<(), DeliveryError> {
        self.check()?;
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push((channel, text.to_string()));
        }
        Ok(())
    }

    async fn fetch_commands(&self, channel: ChannelId) -> Result<Vec<CommandEvent>, DeliveryError> {
        self.check()?;
        let Ok(mut inbox) = self.inbox.lock() else {
            return Ok(Vec::new());
        };
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            inbox.drain(..).partition(|event| event.channel_id == channel);
        *inbox = kept;
        Ok(taken.into())
    }
}
