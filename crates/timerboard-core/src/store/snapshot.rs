use serde::{Deserialize, Serialize};

use crate::timer::{Timer, TimerId};

/// Everything the persistence layer needs to rebuild a [`TimerStore`](super::TimerStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub next_id: TimerId,
    #[serde(default)]
    pub staging: Option<String>,
    #[serde(default)]
    pub timers: Vec<Timer>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            next_id: TimerId::FIRST,
            staging: None,
            timers: Vec::new(),
        }
    }
}
