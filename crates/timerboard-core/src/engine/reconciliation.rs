//! Reconciliation engine.
//!
//! Owns the timer store behind a single async mutex, so command-driven
//! mutations and the periodic tick never interleave. Every tick:
//!
//! 1. advances timer lifecycles (`Active -> Notified -> Expired -> purged`)
//! 2. saves the snapshot if anything changed (or an earlier save failed)
//! 3. delivers queued notifications
//! 4. re-renders the board
//!
//! Delivery and persistence failures are logged and retried on the next
//! tick. They never roll back a state transition.
//!
//! Between ticks, [`ReconciliationEngine::run`] polls the messenger for chat
//! commands and answers them through the same lock.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Arc::new(ReconciliationEngine::restore(config, graph, db, messenger)?);
//! engine.run(tokio::signal::ctrl_c().map(|_| ())).await;
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use super::board;
use super::command::{Command, CommandEvent};
use crate::error::{CoreError, ParseError, StoreError};
use crate::events::Event;
use crate::integrations::{ChannelId, Messenger};
use crate::storage::{Config, SnapshotStore};
use crate::store::{TimerStore, TimerView};
use crate::timer::{format_deadline, TimerDraft, TimerId, TimerParser, TimerState};
use crate::universe::LocationGraph;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Notice {
    channel: ChannelId,
    text: String,
}

/// Everything guarded by the state lock.
struct Shared {
    store: TimerStore,
    persistence: Box<dyn SnapshotStore>,
    /// Notifications produced by transitions but not yet delivered.
    pending: VecDeque<Notice>,
    /// Set when the store changed since the last successful save.
    dirty: bool,
}

impl Shared {
    fn persist(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        match self.persistence.save_all(&self.store.snapshot()) {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "snapshot save failed, retrying next tick");
                false
            }
        }
    }

    fn transition(
        &mut self,
        id: TimerId,
        to: TimerState,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) -> bool {
        match self.store.apply_transition(id, to) {
            Ok(from) => {
                events.push(Event::TimerTransitioned { id, from, to, at: now });
                true
            }
            Err(err) => {
                tracing::error!(%id, error = %err, "transition rejected");
                false
            }
        }
    }

    fn queue_notice(&mut self, channel: ChannelId, id: TimerId, render: impl Fn(&TimerView) -> String) {
        if let Some(view) = self.store.get(id) {
            self.pending.push_back(Notice {
                channel,
                text: render(&view),
            });
        }
    }

    /// Evaluate every timer once against `now`.
    fn advance(&mut self, now: DateTime<Utc>, config: &Config, alerts: ChannelId) -> Vec<Event> {
        let window = config.notification_window();
        let retention = config.expiry_retention();
        let grace = config.start_alert_grace();
        let mut events = Vec::new();

        for (id, state, deadline) in self.store.lifecycle() {
            let mut current = state;

            if now >= deadline && current != TimerState::Expired {
                if self.transition(id, TimerState::Expired, now, &mut events) {
                    current = TimerState::Expired;
                    // Timers added after their deadline expire silently.
                    if now - deadline <= grace {
                        self.queue_notice(alerts, id, board::start_alert_text);
                    }
                }
            } else if current == TimerState::Active
                // A window reaching past the start of time covers every deadline.
                && deadline.checked_sub_signed(window).map_or(true, |start| now >= start)
                && self.transition(id, TimerState::Notified, now, &mut events)
            {
                self.queue_notice(alerts, id, |view| board::notice_text(view, now));
            }

            let purge_due = deadline
                .checked_add_signed(retention)
                .is_some_and(|end| now >= end);
            if current == TimerState::Expired && purge_due {
                match self.store.remove(id) {
                    Ok(_) => events.push(Event::TimerPurged { id, at: now }),
                    Err(err) => tracing::error!(%id, error = %err, "purge failed"),
                }
            }
        }
        events
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// The previous tick was still running; nothing was done.
    pub skipped: bool,
    pub events: Vec<Event>,
    pub notices_sent: usize,
    pub notices_pending: usize,
    pub board_delivered: bool,
    pub saved: bool,
}

/// Result of a successful `add`.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub id: TimerId,
    pub draft: TimerDraft,
    /// Live timers that look like the same structure within a few minutes.
    pub similar: Vec<TimerView>,
    pub event: Event,
}

impl AddOutcome {
    pub fn reply(&self) -> String {
        let mut reply = self.event.describe();
        for view in &self.similar {
            reply.push_str(&format!(
                "\nWarning: similar timer {}: {} - {} at {} UTC",
                view.timer.id,
                view.timer.system,
                view.timer.structure,
                format_deadline(&view.timer.deadline),
            ));
        }
        reply
    }
}

pub struct ReconciliationEngine {
    config: Arc<Config>,
    messenger: Arc<dyn Messenger>,
    shared: Mutex<Shared>,
    /// Held for the duration of a tick; a busy guard means skip.
    tick_guard: Mutex<()>,
    /// Keeps board deliveries in snapshot order.
    render_lock: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(
        config: Arc<Config>,
        store: TimerStore,
        persistence: Box<dyn SnapshotStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            config,
            messenger,
            shared: Mutex::new(Shared {
                store,
                persistence,
                pending: VecDeque::new(),
                dirty: false,
            }),
            tick_guard: Mutex::new(()),
            render_lock: Mutex::new(()),
        }
    }

    /// Build an engine from whatever `persistence` has saved.
    ///
    /// # Errors
    /// Returns an error if the saved snapshot cannot be read.
    pub fn restore(
        config: Arc<Config>,
        graph: Arc<LocationGraph>,
        persistence: Box<dyn SnapshotStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, CoreError> {
        let snapshot = persistence.load_all()?;
        let store = TimerStore::from_snapshot(graph, snapshot);
        Ok(Self::new(config, store, persistence, messenger))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn board_channel(&self) -> ChannelId {
        ChannelId(self.config.channels.timerboard)
    }

    fn commands_channel(&self) -> ChannelId {
        ChannelId(self.config.channels.commands)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn list(&self) -> Vec<TimerView> {
        self.shared.lock().await.store.list()
    }

    pub async fn staging(&self) -> Option<String> {
        self.shared.lock().await.store.staging().map(str::to_string)
    }

    pub async fn pending_notices(&self) -> usize {
        self.shared.lock().await.pending.len()
    }

    /// Board text for a consistent snapshot of the store.
    pub async fn board_text(&self, now: DateTime<Utc>) -> String {
        let shared = self.shared.lock().await;
        board::render_board(
            &shared.store.list(),
            shared.store.staging(),
            now,
            self.config.expiry_retention(),
        )
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Parse `text` and add the timer. Re-renders the board.
    ///
    /// # Errors
    /// Returns the parser's rejection; nothing changes in that case.
    pub async fn add(&self, text: &str, now: DateTime<Utc>) -> Result<AddOutcome, ParseError> {
        let draft = TimerParser::parse_text(text)?;
        Ok(self.add_draft(draft, now).await)
    }

    /// Parse `sov` arguments and add the sovereignty timer. Re-renders the board.
    ///
    /// # Errors
    /// Returns the parser's rejection (bad timestamp, ADM outside 1..=6, or
    /// missing fields); nothing changes in that case.
    pub async fn add_sov(&self, text: &str, now: DateTime<Utc>) -> Result<AddOutcome, ParseError> {
        let draft = TimerParser::parse_sov(text)?;
        Ok(self.add_draft(draft, now).await)
    }

    async fn add_draft(&self, draft: TimerDraft, now: DateTime<Utc>) -> AddOutcome {
        let outcome = {
            let mut shared = self.shared.lock().await;
            let similar = shared.store.similar_to(&draft);
            if !similar.is_empty() {
                tracing::warn!(
                    system = %draft.system,
                    structure = %draft.structure,
                    similar = similar.len(),
                    "similar timer already tracked"
                );
            }
            let id = shared.store.add(draft.clone(), now);
            shared.dirty = true;
            shared.persist();
            AddOutcome {
                id,
                event: Event::TimerAdded {
                    id,
                    system: draft.system.clone(),
                    structure: draft.structure.clone(),
                    deadline: draft.deadline,
                    at: now,
                },
                draft,
                similar,
            }
        };
        self.render(now).await;
        outcome
    }

    /// Remove a timer. Re-renders the board on success.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for unknown ids; the store is unchanged.
    pub async fn remove(&self, id: TimerId, now: DateTime<Utc>) -> Result<Event, StoreError> {
        let event = {
            let mut shared = self.shared.lock().await;
            let timer = shared.store.remove(id)?;
            shared.dirty = true;
            shared.persist();
            Event::TimerRemoved {
                id,
                system: timer.system,
                structure: timer.structure,
                at: now,
            }
        };
        self.render(now).await;
        Ok(event)
    }

    /// Replace the staging point. Re-renders the board.
    pub async fn set_staging(&self, location: &str, now: DateTime<Utc>) -> Event {
        let event = {
            let mut shared = self.shared.lock().await;
            let previous = shared.store.set_staging(location);
            shared.dirty = true;
            shared.persist();
            Event::StagingChanged {
                previous,
                staging: shared.store.staging().unwrap_or(location).to_string(),
                at: now,
            }
        };
        self.render(now).await;
        event
    }

    /// Drop every timer. Ids start over at 1000 afterwards.
    pub async fn reset(&self, now: DateTime<Utc>) -> Event {
        let event = {
            let mut shared = self.shared.lock().await;
            let cleared = shared.store.reset();
            shared.pending.clear();
            shared.dirty = true;
            shared.persist();
            Event::StoreReset { cleared, at: now }
        };
        self.render(now).await;
        event
    }

    /// Re-render the board without touching the store.
    pub async fn refresh(&self, now: DateTime<Utc>) -> bool {
        self.render(now).await
    }

    async fn render(&self, now: DateTime<Utc>) -> bool {
        let _order = self.render_lock.lock().await;
        let text = self.board_text(now).await;
        match self.messenger.send_or_edit_board(self.board_channel(), &text).await {
            Ok(message) => {
                tracing::debug!(
                    messenger = self.messenger.name(),
                    message_id = %message.message_id,
                    "board updated"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    messenger = self.messenger.name(),
                    error = %err,
                    "board delivery failed, retrying next tick"
                );
                false
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Execute a chat command and return the reply text.
    pub async fn handle_command(&self, event: &CommandEvent, now: DateTime<Utc>) -> String {
        let command = match Command::try_from(event) {
            Ok(command) => command,
            Err(err) => return err.to_string(),
        };
        tracing::info!(
            author = %event.author_id,
            channel = %event.channel_id,
            command = %event.command,
            "command received"
        );

        match command {
            Command::Add { text } => match self.add(&text, now).await {
                Ok(outcome) => outcome.reply(),
                Err(err) => format!("Could not add timer: {err}"),
            },
            Command::Sov { text } => match self.add_sov(&text, now).await {
                Ok(outcome) => outcome.reply(),
                Err(err) => format!("Could not add SOV timer: {err}"),
            },
            Command::Remove { id } => match self.remove(id, now).await {
                Ok(event) => event.describe(),
                Err(err) => err.to_string(),
            },
            Command::Staging { location } => self.set_staging(&location, now).await.describe(),
            Command::Refresh => {
                if self.refresh(now).await {
                    "Board refreshed".to_string()
                } else {
                    "Board refresh failed; it will be retried on the next tick".to_string()
                }
            }
            Command::List => self.board_text(now).await,
            Command::Reset => self.reset(now).await.describe(),
        }
    }

    /// Handle a command and send the reply back to the channel it came from.
    pub async fn respond(&self, event: &CommandEvent) -> String {
        let reply = self.handle_command(event, Utc::now()).await;
        if let Err(err) = self.messenger.send_notification(event.channel_id, &reply).await {
            tracing::warn!(channel = %event.channel_id, error = %err, "reply delivery failed");
        }
        reply
    }

    /// Answer every command the messenger has received on the commands
    /// channel since the last poll. Returns how many were handled.
    pub async fn poll_commands(&self) -> usize {
        let channel = self.commands_channel();
        let events = match self.messenger.fetch_commands(channel).await {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(
                    messenger = self.messenger.name(),
                    %channel,
                    error = %err,
                    "command poll failed, retrying"
                );
                return 0;
            }
        };
        for event in &events {
            self.respond(event).await;
        }
        events.len()
    }

    // ── Tick ─────────────────────────────────────────────────────────

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one reconciliation pass as of `now`.
    ///
    /// Returns immediately with `skipped` set if another tick is in flight.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let _tick = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("previous tick still running, skipping");
                return TickReport {
                    skipped: true,
                    ..TickReport::default()
                };
            }
        };

        let (events, saved) = {
            let mut guard = self.shared.lock().await;
            let shared = &mut *guard;
            let events = shared.advance(now, &self.config, self.commands_channel());
            if !events.is_empty() {
                shared.dirty = true;
                tracing::info!(transitions = events.len(), "tick advanced timers");
            }
            let saved = shared.persist();
            (events, saved)
        };

        let (notices_sent, notices_pending) = self.deliver_pending().await;
        let board_delivered = self.render(now).await;

        TickReport {
            skipped: false,
            events,
            notices_sent,
            notices_pending,
            board_delivered,
            saved,
        }
    }

    /// Send queued notices in order. Once one fails, the rest wait for the next tick.
    async fn deliver_pending(&self) -> (usize, usize) {
        let batch: Vec<Notice> = self.shared.lock().await.pending.drain(..).collect();
        let mut sent = 0;
        let mut failed = Vec::new();

        for notice in batch {
            if !failed.is_empty() {
                failed.push(notice);
                continue;
            }
            match self
                .messenger
                .send_notification(notice.channel, &notice.text)
                .await
            {
                Ok(()) => sent += 1,
                Err(err) => {
                    tracing::warn!(channel = %notice.channel, error = %err, "notification delivery failed");
                    failed.push(notice);
                }
            }
        }

        let mut shared = self.shared.lock().await;
        for notice in failed.into_iter().rev() {
            shared.pending.push_front(notice);
        }
        (sent, shared.pending.len())
    }

    /// Tick every `check_interval_seconds` and poll for commands every
    /// `command_poll_seconds` until `shutdown` resolves.
    ///
    /// Each tick runs in its own task so a panic only loses that tick.
    /// Ticks that come due while one is still running are skipped.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.config.check_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poller = tokio::time::interval(self.config.command_poll_interval());
        poller.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = period.as_secs(), "reconciliation loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poller.tick() => {
                    let handled = self.poll_commands().await;
                    if handled > 0 {
                        tracing::debug!(handled, "commands answered");
                    }
                }
                _ = ticker.tick() => {
                    let engine = Arc::clone(&self);
                    let tick = tokio::spawn(async move { engine.tick().await });
                    tokio::spawn(async move {
                        if let Err(err) = tick.await {
                            if err.is_panic() {
                                tracing::error!("tick panicked: {err}");
                            } else {
                                tracing::warn!("tick cancelled: {err}");
                            }
                        }
                    });
                }
            }
        }
        self.shutdown().await;
    }

    /// Wait for the in-flight tick, then save one last time.
    pub async fn shutdown(&self) -> bool {
        let _tick = self.tick_guard.lock().await;
        let mut shared = self.shared.lock().await;
        shared.dirty = true;
        let saved = shared.persist();
        tracing::info!(saved, timers = shared.store.len(), "reconciliation engine stopped");
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::integrations::MemoryMessenger;
    use crate::storage::SqliteSnapshotStore;
    use crate::store::StoreSnapshot;
    use crate::error::DeliveryError;
    use crate::integrations::MessageRef;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap()
    }

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.channels.timerboard = 10;
        config.channels.commands = 20;
        Arc::new(config)
    }

    fn engine_with(messenger: Arc<MemoryMessenger>) -> ReconciliationEngine {
        ReconciliationEngine::new(
            config(),
            TimerStore::new(Arc::new(LocationGraph::empty())),
            Box::new(SqliteSnapshotStore::open_memory().unwrap()),
            messenger,
        )
    }

    /// Snapshot store whose saves can be made to fail.
    struct FlakyStore {
        failing: Arc<AtomicBool>,
        saves: usize,
    }

    impl SnapshotStore for FlakyStore {
        fn load_all(&self) -> Result<StoreSnapshot, StorageError> {
            Ok(StoreSnapshot::default())
        }

        fn save_all(&mut self, _snapshot: &StoreSnapshot) -> Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Locked);
            }
            self.saves += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_renders_board_immediately() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());

        let outcome = engine
            .add("2025-03-05 10:56:50 9PX2-F - WWW [VAPOR][FINAL]", t0())
            .await
            .unwrap();

        assert_eq!(outcome.id, TimerId::FIRST);
        let (channel, board) = messenger.boards().pop().unwrap();
        assert_eq!(channel, ChannelId(10));
        assert!(board.contains("WWW [VAPOR][FINAL] | ID 1000"));
    }

    #[tokio::test]
    async fn parse_errors_change_nothing() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());
        assert!(engine.add("tomorrow maybe", t0()).await.is_err());
        assert!(engine.list().await.is_empty());
        assert!(messenger.boards().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_notifies_once_then_expires_and_purges() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());
        engine
            .add("2025-03-05 12:00:00 9PX2-F - WWW", t0())
            .await
            .unwrap();

        // Two hours out: nothing to do.
        let report = engine.tick_at(t0()).await;
        assert!(report.events.is_empty());
        assert!(messenger.notifications().is_empty());

        // Inside the 60 minute window.
        let report = engine.tick_at(t0() + Duration::minutes(61)).await;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.notices_sent, 1);
        engine.tick_at(t0() + Duration::minutes(90)).await;
        let notices = messenger.notifications();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, ChannelId(20));
        assert!(notices[0].1.starts_with("Timer 1000 in 59m 0s"));

        // At the deadline: expired, start alert.
        let report = engine.tick_at(t0() + Duration::minutes(120)).await;
        assert!(matches!(
            report.events[0],
            Event::TimerTransitioned {
                to: TimerState::Expired,
                ..
            }
        ));
        assert!(messenger.notifications()[1].1.starts_with("TIMER STARTING NOW"));
        assert_eq!(engine.list().await[0].timer.state, TimerState::Expired);

        // Retention elapsed: gone.
        let report = engine.tick_at(t0() + Duration::minutes(180)).await;
        assert!(matches!(report.events[0], Event::TimerPurged { .. }));
        assert!(engine.list().await.is_empty());
        assert_eq!(messenger.notifications().len(), 2);
    }

    #[tokio::test]
    async fn stale_timers_expire_without_alerts() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());
        engine
            .add("2025-03-05 09:30:00 9PX2-F - Old", t0())
            .await
            .unwrap();

        let report = engine.tick_at(t0()).await;
        assert_eq!(report.events.len(), 1);
        assert!(messenger.notifications().is_empty());
        assert_eq!(engine.list().await[0].timer.state, TimerState::Expired);
    }

    #[tokio::test]
    async fn failed_notifications_are_retried() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());
        engine
            .add("2025-03-05 10:30:00 9PX2-F - WWW", t0())
            .await
            .unwrap();

        messenger.set_failing(true);
        let report = engine.tick_at(t0()).await;
        assert_eq!(report.notices_sent, 0);
        assert_eq!(report.notices_pending, 1);
        assert!(!report.board_delivered);
        assert_eq!(engine.list().await[0].timer.state, TimerState::Notified);

        messenger.set_failing(false);
        let report = engine.tick_at(t0() + Duration::minutes(1)).await;
        assert!(report.events.is_empty());
        assert_eq!(report.notices_sent, 1);
        assert_eq!(messenger.notifications().len(), 1);
    }

    #[tokio::test]
    async fn failed_saves_are_retried_next_tick() {
        let failing = Arc::new(AtomicBool::new(true));
        let engine = ReconciliationEngine::new(
            config(),
            TimerStore::new(Arc::new(LocationGraph::empty())),
            Box::new(FlakyStore {
                failing: failing.clone(),
                saves: 0,
            }),
            Arc::new(MemoryMessenger::new()),
        );
        engine
            .add("2025-03-05 12:00:00 9PX2-F - WWW", t0())
            .await
            .unwrap();
        assert!(!engine.tick_at(t0()).await.saved);

        failing.store(false, Ordering::SeqCst);
        assert!(engine.tick_at(t0()).await.saved);
        assert_eq!(engine.list().await.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let engine = engine_with(Arc::new(MemoryMessenger::new()));
        let held = engine.tick_guard.lock().await;
        assert!(engine.tick_at(t0()).await.skipped);
        drop(held);
        assert!(!engine.tick_at(t0()).await.skipped);
    }

    #[tokio::test]
    async fn commands_produce_replies() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());
        let cmd = |line: &str| CommandEvent::from_line(ChannelId(20), "u1", line).unwrap();

        let reply = engine
            .handle_command(&cmd("!add 2025-03-05 10:56:50 9PX2-F - WWW"), t0())
            .await;
        assert_eq!(reply, "Timer 1000 added: 9PX2-F - WWW at 2025-03-05 10:56:50 UTC");

        let reply = engine
            .handle_command(&cmd("!add 2025-03-05 10:58:00 9px2-f - www"), t0())
            .await;
        assert!(reply.contains("Warning: similar timer 1000"));

        let reply = engine.handle_command(&cmd("!rm 4242"), t0()).await;
        assert_eq!(reply, "No timer found with ID 4242");
        assert_eq!(engine.list().await.len(), 2);

        let reply = engine.handle_command(&cmd("!rm 1000"), t0()).await;
        assert_eq!(reply, "Timer 1000 removed (9PX2-F - WWW)");

        let reply = engine.handle_command(&cmd("!staging OJOS-T"), t0()).await;
        assert_eq!(reply, "Staging set to OJOS-T");
        assert_eq!(engine.staging().await.as_deref(), Some("OJOS-T"));

        let reply = engine.handle_command(&cmd("!add garbage"), t0()).await;
        assert!(reply.starts_with("Could not add timer: unrecognized format"));

        let boards_before = messenger.boards().len();
        assert_eq!(engine.handle_command(&cmd("!refresh"), t0()).await, "Board refreshed");
        assert_eq!(messenger.boards().len(), boards_before + 1);

        let reply = engine.handle_command(&cmd("!reset"), t0()).await;
        assert_eq!(reply, "Cleared 1 timers");
        let reply = engine
            .handle_command(&cmd("!add 2025-03-05 11:00:00 A - B"), t0())
            .await;
        assert!(reply.starts_with("Timer 1000 added"));
    }

    #[tokio::test]
    async fn restore_resumes_from_saved_state() {
        let mut db = SqliteSnapshotStore::open_memory().unwrap();
        {
            let mut store = TimerStore::new(Arc::new(LocationGraph::empty()));
            store.add(
                TimerParser::parse_text("2025-03-05 12:00:00 9PX2-F - WWW").unwrap(),
                t0(),
            );
            store.set_staging("OJOS-T");
            db.save_all(&store.snapshot()).unwrap();
        }

        let engine = ReconciliationEngine::restore(
            config(),
            Arc::new(LocationGraph::empty()),
            Box::new(db),
            Arc::new(MemoryMessenger::new()),
        )
        .unwrap();
        assert_eq!(engine.list().await.len(), 1);
        assert_eq!(engine.staging().await.as_deref(), Some("OJOS-T"));
        let outcome = engine
            .add("2025-03-05 13:00:00 9PX2-F - Other", t0())
            .await
            .unwrap();
        assert_eq!(outcome.id, TimerId::new(1001));
        assert!(engine.shutdown().await);
    }

    #[tokio::test]
    async fn unvalidated_huge_windows_do_not_break_ticks() {
        let mut config = Config::default();
        config.channels.timerboard = 10;
        config.channels.commands = 20;
        config.notification_window_minutes = u64::MAX;
        config.expiry_retention_minutes = u64::MAX;
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = ReconciliationEngine::new(
            Arc::new(config),
            TimerStore::new(Arc::new(LocationGraph::empty())),
            Box::new(SqliteSnapshotStore::open_memory().unwrap()),
            messenger.clone(),
        );
        engine.add("2025-06-01 00:00:00 9PX2-F - Far", t0()).await.unwrap();
        engine.add("2025-03-05 09:00:00 9PX2-F - Past", t0()).await.unwrap();

        let report = engine.tick_at(t0()).await;
        assert!(report.board_delivered);
        let states: Vec<TimerState> = engine.list().await.iter().map(|v| v.timer.state).collect();
        // Far is inside the one-year notice window; Past stays listed as expired.
        assert_eq!(states, [TimerState::Expired, TimerState::Notified]);
        assert!(messenger.last_board().unwrap().contains("Recently expired"));
    }

    #[tokio::test]
    async fn polled_commands_are_answered_in_their_channel() {
        let messenger = Arc::new(MemoryMessenger::new());
        let engine = engine_with(messenger.clone());
        messenger.push_command(
            CommandEvent::from_line(ChannelId(20), "u1", "!add 2099-01-01 00:00:00 9PX2-F - WWW")
                .unwrap(),
        );
        // Other channels are not the commands channel.
        messenger.push_command(CommandEvent::from_line(ChannelId(99), "u1", "!reset").unwrap());

        assert_eq!(engine.poll_commands().await, 1);
        assert_eq!(engine.list().await.len(), 1);
        let replies = messenger.notifications();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ChannelId(20));
        assert!(replies[0].1.starts_with("Timer 1000 added"));

        assert_eq!(engine.poll_commands().await, 0);
        messenger.set_failing(true);
        assert_eq!(engine.poll_commands().await, 0);
    }

    /// Messenger whose next board delivery panics.
    struct PanicOnce {
        inner: Arc<MemoryMessenger>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl Messenger for PanicOnce {
        fn name(&self) -> &str {
            "panic-once"
        }

        async fn send_or_edit_board(
            &self,
            channel: ChannelId,
            text: &str,
        ) -> Result<MessageRef, DeliveryError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("board delivery blew up");
            }
            self.inner.send_or_edit_board(channel, text).await
        }

        async fn send_notification(&self, channel: ChannelId, text: &str) -> Result<(), DeliveryError> {
            self.inner.send_notification(channel, text).await
        }

        async fn fetch_commands(&self, channel: ChannelId) -> Result<Vec<CommandEvent>, DeliveryError> {
            self.inner.fetch_commands(channel).await
        }
    }

    struct CountingStore {
        saves: Arc<AtomicUsize>,
    }

    impl SnapshotStore for CountingStore {
        fn load_all(&self) -> Result<StoreSnapshot, StorageError> {
            Ok(StoreSnapshot::default())
        }

        fn save_all(&mut self, _snapshot: &StoreSnapshot) -> Result<(), StorageError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_a_panicking_tick_and_saves_on_shutdown() {
        let mut config = Config::default();
        config.channels.timerboard = 10;
        config.channels.commands = 20;
        config.check_interval_seconds = 60;
        config.command_poll_seconds = 5;

        let memory = Arc::new(MemoryMessenger::new());
        let messenger = Arc::new(PanicOnce {
            inner: memory.clone(),
            armed: AtomicBool::new(false),
        });
        let saves = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(config),
            TimerStore::new(Arc::new(LocationGraph::empty())),
            Box::new(CountingStore {
                saves: saves.clone(),
            }),
            messenger.clone(),
        ));
        engine.add("2099-01-01 00:00:00 A - B", t0()).await.unwrap();
        assert_eq!(memory.boards().len(), 1);

        // The first tick fires as soon as the loop starts.
        messenger.armed.store(true, Ordering::SeqCst);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(Arc::clone(&engine).run(async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!messenger.armed.load(Ordering::SeqCst));
        assert_eq!(memory.boards().len(), 1);
        assert!(!handle.is_finished());

        memory.push_command(CommandEvent::from_line(ChannelId(20), "u1", "!staging OJOS-T").unwrap());
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(engine.staging().await.as_deref(), Some("OJOS-T"));
        assert_eq!(memory.notifications(), [(ChannelId(20), "Staging set to OJOS-T".to_string())]);

        let boards = memory.boards().len();
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert!(memory.boards().len() > boards);
        assert!(memory.last_board().unwrap().contains("Staging: OJOS-T"));

        let saves_before = saves.load(Ordering::SeqCst);
        tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), saves_before + 1);
    }
}
