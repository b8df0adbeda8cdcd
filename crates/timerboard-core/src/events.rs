use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{format_deadline, TimerId, TimerState};

/// Every state change in the system produces an Event.
/// Ticks and commands return them; the CLI prints them as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerAdded {
        id: TimerId,
        system: String,
        structure: String,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    TimerRemoved {
        id: TimerId,
        system: String,
        structure: String,
        at: DateTime<Utc>,
    },
    StagingChanged {
        previous: Option<String>,
        staging: String,
        at: DateTime<Utc>,
    },
    /// A lifecycle transition made by the reconciliation tick.
    TimerTransitioned {
        id: TimerId,
        from: TimerState,
        to: TimerState,
        at: DateTime<Utc>,
    },
    /// An expired timer left the store after its retention window.
    TimerPurged {
        id: TimerId,
        at: DateTime<Utc>,
    },
    StoreReset {
        cleared: usize,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::TimerAdded { at, .. }
            | Event::TimerRemoved { at, .. }
            | Event::StagingChanged { at, .. }
            | Event::TimerTransitioned { at, .. }
            | Event::TimerPurged { at, .. }
            | Event::StoreReset { at, .. } => *at,
        }
    }

    /// One-line, human-readable summary used for command replies.
    pub fn describe(&self) -> String {
        match self {
            Event::TimerAdded {
                id,
                system,
                structure,
                deadline,
                ..
            } => format!(
                "Timer {id} added: {system} - {structure} at {} UTC",
                format_deadline(deadline)
            ),
            Event::TimerRemoved {
                id,
                system,
                structure,
                ..
            } => format!("Timer {id} removed ({system} - {structure})"),
            Event::StagingChanged { staging, .. } => format!("Staging set to {staging}"),
            Event::TimerTransitioned { id, to, .. } => format!("Timer {id} is now {to}"),
            Event::TimerPurged { id, .. } => format!("Timer {id} purged"),
            Event::StoreReset { cleared, .. } => format!("Cleared {cleared} timers"),
        }
    }
}
