mod model;
mod parser;

pub use model::{Timer, TimerDraft, TimerId, TimerState, SIMILARITY_WINDOW_MINUTES};
pub use parser::{format_deadline, TimerParser, DEADLINE_FORMAT};
