//! Console transport -- prints the board and notifications instead of posting them.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::{ChannelId, MessageRef, Messenger};
use crate::error::DeliveryError;

pub struct ConsoleMessenger<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
}

impl ConsoleMessenger<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleMessenger<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_block(&self, header: &str, text: &str) -> Result<(), DeliveryError> {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(out, "{header}")?;
        writeln!(out, "{text}")?;
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> Messenger for ConsoleMessenger<W> {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_or_edit_board(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageRef, DeliveryError> {
        self.write_block(&format!("── board #{channel} ──"), text)?;
        Ok(MessageRef {
            channel_id: channel,
            message_id: "console".into(),
        })
    }

    async fn send_notification(&self, channel: ChannelId, text: &str) -> Result<(), DeliveryError> {
        self.write_block(&format!("── #{channel} ──"), text)
    }
}
