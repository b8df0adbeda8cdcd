//! Discord integration -- keep the board message up to date via the REST API.
//!
//! The board is a single bot-authored message per channel. On first use the
//! messenger looks through the channel's recent history for a message the
//! bot wrote earlier and edits that one, so a restart does not leave a trail
//! of stale boards. If the remembered message was deleted, a new one is posted.
//!
//! Inbound commands are polled from the channel history. The first poll
//! only records the newest message id, so commands posted while the bot was
//! down are not replayed; later polls return everything after that cursor.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use super::traits::{ChannelId, MessageRef, Messenger};
use crate::engine::CommandEvent;
use crate::error::DeliveryError;
use crate::storage::DiscordConfig;

/// How far back to look for an earlier board message.
const HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    id: String,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    content: String,
}

impl MessageBody {
    /// Snowflakes grow with time; unparsable ids sort first.
    fn snowflake(&self) -> u64 {
        self.id.parse().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
}

pub struct DiscordMessenger {
    client: Client,
    api_base: String,
    token: String,
    bot_user_id: OnceCell<String>,
    boards: Mutex<HashMap<ChannelId, String>>,
    /// Newest message id seen per polled channel.
    cursors: Mutex<HashMap<ChannelId, String>>,
}

impl DiscordMessenger {
    /// Build a messenger for `api_base` (e.g. `https://discord.com/api/v10`).
    ///
    /// # Errors
    /// Returns [`DeliveryError::NotConfigured`] for an empty token or a
    /// malformed base URL.
    pub fn new(api_base: &str, token: &str) -> Result<Self, DeliveryError> {
        if token.trim().is_empty() {
            return Err(DeliveryError::NotConfigured("Discord bot token is empty".into()));
        }
        url::Url::parse(api_base).map_err(|e| {
            DeliveryError::NotConfigured(format!("invalid Discord API base '{api_base}': {e}"))
        })?;

        Ok(Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            bot_user_id: OnceCell::new(),
            boards: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Build a messenger from config, reading the token from the configured
    /// environment variable.
    ///
    /// # Errors
    /// Returns [`DeliveryError::NotConfigured`] if the variable is unset.
    pub fn from_config(config: &DiscordConfig) -> Result<Self, DeliveryError> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            DeliveryError::NotConfigured(format!("{} is not set", config.token_env))
        })?;
        Self::new(&config.api_base, &token)
    }

    /// Board message currently remembered for `channel`.
    pub fn board_message(&self, channel: ChannelId) -> Option<String> {
        self.boards
            .lock()
            .ok()
            .and_then(|boards| boards.get(&channel).cloned())
    }

    fn remember(&self, channel: ChannelId, message_id: Option<String>) {
        if let Ok(mut boards) = self.boards.lock() {
            match message_id {
                Some(id) => boards.insert(channel, id),
                None => boards.remove(&channel),
            };
        }
    }

    fn cursor(&self, channel: ChannelId) -> Option<String> {
        self.cursors
            .lock()
            .ok()
            .and_then(|cursors| cursors.get(&channel).cloned())
    }

    fn advance_cursor(&self, channel: ChannelId, message_id: String) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.insert(channel, message_id);
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn bot_user_id(&self) -> Result<&str, DeliveryError> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let resp = self
                    .client
                    .get(format!("{}/users/@me", self.api_base))
                    .header("Authorization", self.auth())
                    .send()
                    .await?;
                let user: CurrentUser = expect_success(resp).await?.json().await?;
                Ok::<_, DeliveryError>(user.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Most recent message in `channel` authored by this bot.
    async fn find_existing_board(&self, channel: ChannelId) -> Result<Option<String>, DeliveryError> {
        let bot_id = self.bot_user_id().await?.to_string();
        let messages = self
            .messages(channel, &format!("limit={HISTORY_LIMIT}"))
            .await?;

        Ok(messages
            .into_iter()
            .find(|m| m.author.as_ref().is_some_and(|a| a.id == bot_id))
            .map(|m| m.id))
    }

    async fn messages(&self, channel: ChannelId, query: &str) -> Result<Vec<MessageBody>, DeliveryError> {
        let resp = self
            .client
            .get(format!("{}/channels/{channel}/messages?{query}", self.api_base))
            .header("Authorization", self.auth())
            .send()
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    async fn post(&self, channel: ChannelId, content: &str) -> Result<String, DeliveryError> {
        let resp = self
            .client
            .post(format!("{}/channels/{channel}/messages", self.api_base))
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await?;
        let message: MessageBody = expect_success(resp).await?.json().await?;
        Ok(message.id)
    }

    async fn edit(&self, channel: ChannelId, message_id: &str, content: &str) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .patch(format!(
                "{}/channels/{channel}/messages/{message_id}",
                self.api_base
            ))
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await?;
        expect_success(resp).await?;
        Ok(())
    }
}

async fn expect_success(resp: Response) -> Result<Response, DeliveryError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(DeliveryError::Status { status, body })
}

#[async_trait]
impl Messenger for DiscordMessenger {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send_or_edit_board(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageRef, DeliveryError> {
        let existing = match self.board_message(channel) {
            Some(id) => Some(id),
            None => self.find_existing_board(channel).await?,
        };

        if let Some(message_id) = existing {
            match self.edit(channel, &message_id, text).await {
                Ok(()) => {
                    self.remember(channel, Some(message_id.clone()));
                    return Ok(MessageRef {
                        channel_id: channel,
                        message_id,
                    });
                }
                Err(DeliveryError::Status { status: 404, .. }) => {
                    tracing::warn!(%channel, %message_id, "board message vanished, posting a new one");
                    self.remember(channel, None);
                }
                Err(err) => return Err(err),
            }
        }

        let message_id = self.post(channel, text).await?;
        tracing::info!(%channel, %message_id, "posted new board message");
        self.remember(channel, Some(message_id.clone()));
        Ok(MessageRef {
            channel_id: channel,
            message_id,
        })
    }

    async fn send_notification(&self, channel: ChannelId, text: &str) -> Result<(), DeliveryError> {
        self.post(channel, text).await.map(|_| ())
    }

    async fn fetch_commands(&self, channel: ChannelId) -> Result<Vec<CommandEvent>, DeliveryError> {
        let Some(after) = self.cursor(channel) else {
            let newest = self.messages(channel, "limit=1").await?;
            let start = newest.first().map_or_else(|| "0".to_string(), |m| m.id.clone());
            tracing::info!(%channel, cursor = %start, "listening for commands");
            self.advance_cursor(channel, start);
            return Ok(Vec::new());
        };

        let bot_id = self.bot_user_id().await?.to_string();
        let mut messages = self
            .messages(channel, &format!("after={after}&limit={HISTORY_LIMIT}"))
            .await?;
        messages.sort_by_key(MessageBody::snowflake);
        if let Some(newest) = messages.last() {
            self.advance_cursor(channel, newest.id.clone());
        }

        Ok(messages
            .into_iter()
            .filter_map(|m| {
                let author = m.author?;
                if author.id == bot_id {
                    return None;
                }
                CommandEvent::from_line(channel, &author.id, &m.content)
            })
            .collect())
    }
}
