use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Short numeric timer identifier shown on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(u32);

impl TimerId {
    /// First id handed out by an empty store.
    pub const FIRST: TimerId = TimerId(1000);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TimerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(TimerId)
    }
}

/// Lifecycle of a timer. States only ever move forward.
///
/// ```text
/// Active -> Notified -> Expired -> (purged)
/// Active ------------> Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Active,
    Notified,
    Expired,
}

impl TimerState {
    fn rank(self) -> u8 {
        match self {
            TimerState::Active => 0,
            TimerState::Notified => 1,
            TimerState::Expired => 2,
        }
    }

    /// Whether moving to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(self, next: TimerState) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimerState::Active => "active",
            TimerState::Notified => "notified",
            TimerState::Expired => "expired",
        }
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl FromStr for TimerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(TimerState::Active),
            "notified" => Ok(TimerState::Notified),
            "expired" => Ok(TimerState::Expired),
            other => Err(format!("unknown timer state: {other}")),
        }
    }
}

/// Parsed timer fields, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerDraft {
    pub system: String,
    pub structure: String,
    pub tags: Vec<String>,
    /// Always UTC.
    pub deadline: DateTime<Utc>,
}

/// A tracked structure timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub id: TimerId,
    pub system: String,
    pub structure: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub deadline: DateTime<Utc>,
    pub state: TimerState,
    pub created_at: DateTime<Utc>,
}

/// Two timers closer than this, on the same system and structure, are
/// reported as likely duplicates.
pub const SIMILARITY_WINDOW_MINUTES: i64 = 5;

impl Timer {
    pub fn from_draft(id: TimerId, draft: TimerDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            system: draft.system,
            structure: draft.structure,
            tags: draft.tags,
            deadline: draft.deadline,
            state: TimerState::Active,
            created_at,
        }
    }

    /// Tags rendered the way they are typed: `[A][B]`.
    pub fn tag_text(&self) -> String {
        self.tags.iter().map(|t| format!("[{t}]")).collect()
    }

    /// Same system and structure (case-insensitive), deadlines within five minutes.
    pub fn is_similar(&self, draft: &TimerDraft) -> bool {
        let gap = (self.deadline - draft.deadline).num_seconds().abs();
        gap <= Duration::minutes(SIMILARITY_WINDOW_MINUTES).num_seconds()
            && self.system.eq_ignore_ascii_case(&draft.system)
            && self.structure.to_lowercase() == draft.structure.to_lowercase()
    }
}
