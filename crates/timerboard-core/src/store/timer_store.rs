//! In-memory timer collection.
//!
//! The store owns every [`Timer`] and the staging point. Callers get cloned
//! [`TimerView`]s, never references into the collection, so a view taken for
//! rendering cannot observe a later mutation. Serializing access between
//! command handlers and the reconciliation tick is the engine's job; the
//! store itself is a plain `&mut self` API.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::StoreSnapshot;
use crate::error::StoreError;
use crate::timer::{Timer, TimerDraft, TimerId, TimerState};
use crate::universe::{Distance, LocationGraph};

/// Read-only copy of a timer with annotations derived at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerView {
    #[serde(flatten)]
    pub timer: Timer,
    /// Region from the universe table, if the system is known.
    pub region: Option<String>,
    /// Jumps from the staging point. `None` while no staging point is set.
    pub distance: Option<Distance>,
}

pub struct TimerStore {
    timers: BTreeMap<TimerId, Timer>,
    next_id: TimerId,
    staging: Option<String>,
    graph: Arc<LocationGraph>,
}

impl TimerStore {
    /// An empty store with no staging point.
    pub fn new(graph: Arc<LocationGraph>) -> Self {
        Self {
            timers: BTreeMap::new(),
            next_id: TimerId::FIRST,
            staging: None,
            graph,
        }
    }

    /// Rebuild a store from persisted state.
    ///
    /// The id counter resumes after both the saved counter and the highest
    /// live id, and never below [`TimerId::FIRST`].
    pub fn from_snapshot(graph: Arc<LocationGraph>, snapshot: StoreSnapshot) -> Self {
        let highest_live = snapshot.timers.iter().map(|t| t.id.next()).max();
        let next_id = [Some(snapshot.next_id), highest_live, Some(TimerId::FIRST)]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(TimerId::FIRST);

        let timers = snapshot
            .timers
            .into_iter()
            .map(|timer| (timer.id, timer))
            .collect::<BTreeMap<_, _>>();

        tracing::info!(timers = timers.len(), %next_id, "timer store restored");

        Self {
            timers,
            next_id,
            staging: snapshot.staging,
            graph,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            next_id: self.next_id,
            staging: self.staging.clone(),
            timers: self.timers.values().cloned().collect(),
        }
    }

    pub fn graph(&self) -> &LocationGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn next_id(&self) -> TimerId {
        self.next_id
    }

    pub fn staging(&self) -> Option<&str> {
        self.staging.as_deref()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Insert a parsed timer as ACTIVE and return its new id.
    ///
    /// Unknown systems and past deadlines are accepted; the first shows up
    /// as an unknown distance, the second expires on the next tick.
    pub fn add(&mut self, draft: TimerDraft, now: DateTime<Utc>) -> TimerId {
        let id = self.next_id;
        self.next_id = id.next();

        if !self.graph.is_empty() && !self.graph.contains(&draft.system) {
            tracing::warn!(%id, system = %draft.system, "system not in universe table");
        }

        let timer = Timer::from_draft(id, draft, now);
        tracing::info!(
            %id,
            system = %timer.system,
            structure = %timer.structure,
            deadline = %timer.deadline,
            tags = ?timer.tags,
            "timer added"
        );
        self.timers.insert(id, timer);
        id
    }

    /// Remove a timer by id.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no live timer has this id.
    pub fn remove(&mut self, id: TimerId) -> Result<Timer, StoreError> {
        let timer = self.timers.remove(&id).ok_or(StoreError::NotFound(id))?;
        tracing::info!(
            %id,
            system = %timer.system,
            structure = %timer.structure,
            state = %timer.state,
            "timer removed"
        );
        Ok(timer)
    }

    /// Replace the staging point. Returns the previous one.
    ///
    /// Known locations are stored with the table's spelling; unknown names
    /// are kept as typed and simply resolve to unknown distances.
    pub fn set_staging(&mut self, name: &str) -> Option<String> {
        let name = name.trim();
        let stored = match self.graph.display_name(name) {
            Some(known) => known.to_string(),
            None => {
                tracing::warn!(staging = %name, "staging point not in universe table");
                name.to_string()
            }
        };
        tracing::info!(staging = %stored, "staging point set");
        self.staging.replace(stored)
    }

    /// Move a timer forward in its lifecycle. Returns the previous state.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for unknown ids and
    /// [`StoreError::InvalidTransition`] for anything that is not a forward move.
    pub fn apply_transition(
        &mut self,
        id: TimerId,
        new_state: TimerState,
    ) -> Result<TimerState, StoreError> {
        let timer = self.timers.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let from = timer.state;
        if !from.can_advance_to(new_state) {
            return Err(StoreError::InvalidTransition {
                id,
                from,
                to: new_state,
            });
        }
        timer.state = new_state;
        tracing::info!(%id, %from, to = %new_state, "timer transition");
        Ok(from)
    }

    /// Drop every timer and restart ids at [`TimerId::FIRST`].
    ///
    /// Ids issued before the reset may be handed out again afterwards.
    /// The staging point is kept.
    pub fn reset(&mut self) -> usize {
        let cleared = self.timers.len();
        self.timers.clear();
        self.next_id = TimerId::FIRST;
        tracing::info!(cleared, "timer store reset");
        cleared
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: TimerId) -> Option<TimerView> {
        self.timers.get(&id).map(|timer| self.view(timer))
    }

    /// All timers, soonest deadline first.
    pub fn list(&self) -> Vec<TimerView> {
        let mut timers: Vec<&Timer> = self.timers.values().collect();
        timers.sort_by_key(|t| (t.deadline, t.created_at, t.id));
        timers.into_iter().map(|t| self.view(t)).collect()
    }

    /// Live timers that look like duplicates of `draft`.
    pub fn similar_to(&self, draft: &TimerDraft) -> Vec<TimerView> {
        self.list()
            .into_iter()
            .filter(|view| view.timer.is_similar(draft))
            .collect()
    }

    /// (id, state, deadline) for every timer, in id order.
    pub fn lifecycle(&self) -> Vec<(TimerId, TimerState, DateTime<Utc>)> {
        self.timers
            .values()
            .map(|t| (t.id, t.state, t.deadline))
            .collect()
    }

    fn view(&self, timer: &Timer) -> TimerView {
        TimerView {
            timer: timer.clone(),
            region: self.graph.region(&timer.system).map(str::to_string),
            distance: self
                .staging
                .as_deref()
                .map(|staging| self.graph.distance(staging, &timer.system)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::{SystemEntry, UniverseTable};
    use chrono::{Duration, TimeZone};

    fn graph() -> Arc<LocationGraph> {
        let entry = |name: &str, gates: &[&str]| SystemEntry {
            name: name.into(),
            region: Some("Tenerifis".into()),
            gates: gates.iter().map(|g| g.to_string()).collect(),
        };
        Arc::new(LocationGraph::from_table(&UniverseTable {
            systems: vec![
                entry("9PX2-F", &["OJOS-T"]),
                entry("OJOS-T", &["UEJX-G"]),
                entry("UEJX-G", &[]),
            ],
        }))
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 10, minute, 0).unwrap()
    }

    fn draft(system: &str, structure: &str, deadline: DateTime<Utc>) -> TimerDraft {
        TimerDraft {
            system: system.into(),
            structure: structure.into(),
            tags: vec![],
            deadline,
        }
    }

    #[test]
    fn ids_start_at_first_and_increase() {
        let mut store = TimerStore::new(graph());
        let a = store.add(draft("9PX2-F", "A", at(10)), at(0));
        let b = store.add(draft("9PX2-F", "B", at(20)), at(0));
        assert_eq!(a, TimerId::FIRST);
        assert_eq!(b, TimerId::new(1001));
        assert_eq!(store.get(a).unwrap().timer.state, TimerState::Active);
    }

    #[test]
    fn removed_ids_are_not_reissued() {
        let mut store = TimerStore::new(graph());
        let a = store.add(draft("9PX2-F", "A", at(10)), at(0));
        store.add(draft("9PX2-F", "B", at(10)), at(0));
        store.remove(a).unwrap();
        let c = store.add(draft("9PX2-F", "C", at(10)), at(0));
        assert_eq!(c, TimerId::new(1002));
    }

    #[test]
    fn reset_restarts_ids() {
        let mut store = TimerStore::new(graph());
        store.add(draft("9PX2-F", "A", at(10)), at(0));
        store.add(draft("9PX2-F", "B", at(10)), at(0));
        assert_eq!(store.reset(), 2);
        assert_eq!(store.add(draft("9PX2-F", "C", at(10)), at(0)), TimerId::FIRST);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut store = TimerStore::new(graph());
        store.add(draft("9PX2-F", "A", at(10)), at(0));
        let missing = TimerId::new(4242);
        assert_eq!(store.remove(missing), Err(StoreError::NotFound(missing)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_is_sorted_by_deadline_then_creation() {
        let mut store = TimerStore::new(graph());
        let late = store.add(draft("9PX2-F", "Late", at(50)), at(0));
        let tie_second = store.add(draft("9PX2-F", "Tie2", at(20)), at(2));
        let tie_first = store.add(draft("9PX2-F", "Tie1", at(20)), at(1));
        let ids: Vec<TimerId> = store.list().iter().map(|v| v.timer.id).collect();
        assert_eq!(ids, vec![tie_first, tie_second, late]);
    }

    #[test]
    fn distance_annotations_follow_staging() {
        let mut store = TimerStore::new(graph());
        let id = store.add(draft("uejx-g", "Hub", at(10)), at(0));
        let unknown = store.add(draft("NOWHERE", "Hub", at(11)), at(0));
        assert_eq!(store.get(id).unwrap().distance, None);

        store.set_staging("9px2-f");
        assert_eq!(store.staging(), Some("9PX2-F"));
        assert_eq!(store.get(id).unwrap().distance, Some(Distance::Jumps(2)));
        assert_eq!(store.get(id).unwrap().region.as_deref(), Some("Tenerifis"));
        assert_eq!(store.get(unknown).unwrap().distance, Some(Distance::Unknown));

        let previous = store.set_staging("Somewhere Else");
        assert_eq!(previous.as_deref(), Some("9PX2-F"));
        assert_eq!(store.get(id).unwrap().distance, Some(Distance::Unknown));
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut store = TimerStore::new(graph());
        let id = store.add(draft("9PX2-F", "A", at(10)), at(0));
        assert_eq!(
            store.apply_transition(id, TimerState::Notified),
            Ok(TimerState::Active)
        );
        assert_eq!(
            store.apply_transition(id, TimerState::Active),
            Err(StoreError::InvalidTransition {
                id,
                from: TimerState::Notified,
                to: TimerState::Active,
            })
        );
        assert!(store.apply_transition(id, TimerState::Expired).is_ok());
        assert!(store.apply_transition(id, TimerState::Notified).is_err());
        assert_eq!(
            store.apply_transition(TimerId::new(9), TimerState::Expired),
            Err(StoreError::NotFound(TimerId::new(9)))
        );
    }

    #[test]
    fn snapshot_restores_counter_past_live_ids() {
        let mut store = TimerStore::new(graph());
        store.add(draft("9PX2-F", "A", at(10)), at(0));
        store.set_staging("OJOS-T");
        let mut snapshot = store.snapshot();
        snapshot.next_id = TimerId::new(3);
        snapshot.timers[0].id = TimerId::new(1500);

        let restored = TimerStore::from_snapshot(graph(), snapshot);
        assert_eq!(restored.next_id(), TimerId::new(1501));
        assert_eq!(restored.staging(), Some("OJOS-T"));
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn similar_timers_are_reported() {
        let mut store = TimerStore::new(graph());
        store.add(draft("9PX2-F", "Keepstar", at(10)), at(0));
        let near = draft("9px2-f", "keepstar", at(10) + Duration::minutes(3));
        let far = draft("9PX2-F", "Keepstar", at(30));
        assert_eq!(store.similar_to(&near).len(), 1);
        assert!(store.similar_to(&far).is_empty());
    }
}
