//! Messaging collaborators: where the board and notifications are delivered.

pub mod console;
pub mod discord;
pub mod memory;
pub mod traits;

pub use console::ConsoleMessenger;
pub use discord::DiscordMessenger;
pub use memory::MemoryMessenger;
pub use traits::{ChannelId, MessageRef, Messenger};
