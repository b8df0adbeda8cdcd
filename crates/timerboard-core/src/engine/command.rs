//! Inbound chat commands.
//!
//! Routing is the transport's job; the engine only sees
//! `(channel, author, command, args)` tuples and turns them into [`Command`]s.

use thiserror::Error;

use crate::integrations::ChannelId;
use crate::timer::TimerId;

/// Prefix that marks a chat line as a command.
pub const COMMAND_PREFIX: char = '!';

/// A command as delivered by the messaging collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub channel_id: ChannelId,
    pub author_id: String,
    pub command: String,
    pub raw_args: String,
}

impl CommandEvent {
    /// Split a chat line such as `!rm 1000`. Lines without the prefix are not commands.
    pub fn from_line(channel_id: ChannelId, author_id: &str, line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix(COMMAND_PREFIX)?;
        let (command, raw_args) = match rest.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        Some(Self {
            channel_id,
            author_id: author_id.to_string(),
            command: command.to_lowercase(),
            raw_args: raw_args.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a timer from grammar A or B text.
    Add { text: String },
    /// Add a sovereignty timer: `YYYY.MM.DD HH:MM SYSTEM OWNER ADM`.
    Sov { text: String },
    Remove { id: TimerId },
    Staging { location: String },
    /// Re-render the board without changing anything.
    Refresh,
    List,
    Reset,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("Usage: !{usage}")]
    MissingArgument { usage: &'static str },

    #[error("'{0}' is not a timer ID")]
    BadId(String),
}

impl Command {
    /// Interpret a command name and its raw arguments.
    ///
    /// # Errors
    /// Returns [`CommandError`] for unknown names, missing arguments and
    /// malformed ids.
    pub fn parse(name: &str, raw_args: &str) -> Result<Self, CommandError> {
        let args = raw_args.trim();
        match name.to_lowercase().as_str() {
            "add" => {
                if args.is_empty() {
                    return Err(CommandError::MissingArgument {
                        usage: "add YYYY-MM-DD HH:MM:SS SYSTEM - STRUCTURE [TAGS]",
                    });
                }
                Ok(Command::Add {
                    text: args.to_string(),
                })
            }
            "sov" => {
                if args.is_empty() {
                    return Err(CommandError::MissingArgument {
                        usage: "sov YYYY.MM.DD HH:MM SYSTEM OWNER ADM",
                    });
                }
                Ok(Command::Sov {
                    text: args.to_string(),
                })
            }
            "rm" | "remove" => {
                if args.is_empty() {
                    return Err(CommandError::MissingArgument { usage: "rm ID" });
                }
                let id = args
                    .parse::<TimerId>()
                    .map_err(|_| CommandError::BadId(args.to_string()))?;
                Ok(Command::Remove { id })
            }
            "staging" => {
                if args.is_empty() {
                    return Err(CommandError::MissingArgument {
                        usage: "staging SYSTEM",
                    });
                }
                Ok(Command::Staging {
                    location: args.to_string(),
                })
            }
            "refresh" => Ok(Command::Refresh),
            "list" => Ok(Command::List),
            "reset" => Ok(Command::Reset),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl TryFrom<&CommandEvent> for Command {
    type Error = CommandError;

    fn try_from(event: &CommandEvent) -> Result<Self, Self::Error> {
        Command::parse(&event.command, &event.raw_args)
    }
}
