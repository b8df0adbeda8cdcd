mod snapshot;
mod timer_store;

pub use snapshot::StoreSnapshot;
pub use timer_store::{TimerStore, TimerView};
