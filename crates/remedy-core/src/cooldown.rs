//! Per-(service, action) fixed-window rate limiting with two-phase
//! reservations.
//!
//! # Protocol
//!
//! `try_reserve` provisionally takes one slot of the window's quota and
//! returns a [`Reservation`]. The reservation is then either committed (the
//! action really ran, successfully or not) or rolled back (it never ran).
//! A reservation dropped without either is rolled back, so an aborted
//! request cannot leak quota.
//!
//! # Locking
//!
//! Each key owns its own mutex. The table-level mutex is only held long
//! enough to find or create a key's slot, so unrelated services never wait
//! on each other. No lock is held while an action executes.
//!
//! # Windows
//!
//! Windows are fixed and anchored at the first admission after the previous
//! window expired. A timestamp exactly `window` after the start belongs to
//! the new window. A window opened by a reservation stays provisional until
//! one of its reservations commits; if they all roll back, the window it
//! replaced comes back unchanged.
//!
//! # Persistence
//!
//! The tracker never writes to the store itself. `commit` hands back the
//! committed window as a [`WindowUpdate`], which the orchestrator saves in
//! the same transaction as the execution record. Provisional slots are lost
//! on restart, which is the same as rolling them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::error::Result;
use crate::orchestrator::db::StateDb;
use crate::policy::{CooldownPolicy, PolicyTable};
use crate::types::{ActionKind, Outcome};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CooldownKey {
    pub service: String,
    pub action: ActionKind,
}

impl CooldownKey {
    pub fn new(service: impl Into<String>, action: ActionKind) -> Self {
        Self {
            service: service.into(),
            action,
        }
    }

    /// `service\0action`, the redb key for this window.
    pub fn storage_key(&self) -> String {
        format!("{}\0{}", self.service, self.action)
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        let (service, action) = key.split_once('\0')?;
        Some(Self {
            service: service.to_string(),
            action: action.parse().ok()?,
        })
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownWindow {
    /// Admitted actions in this window. Never exceeds the policy maximum.
    pub count: u32,
    pub window_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<DateTime<Utc>>,
}

/// Committed state of one window after a commit, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdate {
    pub key: CooldownKey,
    pub window: CooldownWindow,
}

/// Quota for the window is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownDenied {
    /// When the current window ends and the next admission becomes possible.
    pub retry_after: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    window: Option<CooldownWindow>,
    /// Provisional reservations included in `window.count`.
    pending: u32,
    /// Set while `window` was opened by reservations none of which has
    /// committed yet: the committed window it replaced.
    replaced: Option<Option<CooldownWindow>>,
}

impl Slot {
    /// The window as persisted: provisional reservations excluded, and a
    /// window that has only seen provisional reservations not yet in force.
    fn committed(&self) -> Option<CooldownWindow> {
        if let Some(replaced) = &self.replaced {
            return replaced.clone();
        }
        self.window.as_ref().map(|w| CooldownWindow {
            count: w.count - self.pending,
            ..w.clone()
        })
    }

    fn owns(&self, window_start: DateTime<Utc>) -> bool {
        matches!(&self.window, Some(w) if w.window_start == window_start)
    }

    /// Start a fresh window at `now`, remembering what it replaced.
    fn open(&mut self, now: DateTime<Utc>) {
        let replaced = self.committed();
        let last_action_at = self.window.as_ref().and_then(|w| w.last_action_at);
        self.window = Some(CooldownWindow {
            count: 0,
            window_start: now,
            last_action_at,
        });
        self.pending = 0;
        self.replaced = Some(replaced);
    }

    /// Take one provisional slot in the current window.
    fn admit(&mut self) -> Option<DateTime<Utc>> {
        let w = self.window.as_mut()?;
        w.count += 1;
        self.pending += 1;
        Some(w.window_start)
    }

    fn release(&mut self, window_start: DateTime<Utc>) {
        if !self.owns(window_start) || self.pending == 0 {
            return;
        }
        self.pending -= 1;
        if let Some(w) = self.window.as_mut() {
            w.count -= 1;
        }
        if self.pending == 0 {
            if let Some(replaced) = self.replaced.take() {
                self.window = replaced;
            }
        }
    }

    fn settle(&mut self, window_start: DateTime<Utc>, at: DateTime<Utc>) {
        if self.owns(window_start) {
            self.replaced = None;
            self.pending = self.pending.saturating_sub(1);
        }
        if let Some(w) = self.window.as_mut() {
            w.last_action_at = Some(w.last_action_at.map_or(at, |prev| prev.max(at)));
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// A provisional claim on cooldown quota.
#[derive(Debug)]
pub struct Reservation {
    id: Uuid,
    key: CooldownKey,
    reserved_at: DateTime<Utc>,
    /// `None` when the action has no count limit.
    window_start: Option<DateTime<Utc>>,
    slot: Arc<Mutex<Slot>>,
    settled: bool,
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &CooldownKey {
        &self.key
    }

    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(start) = self.window_start {
            lock(&self.slot).release(start);
        }
        tracing::debug!(key = %self.key, reservation = %self.id, "reservation dropped, rolled back");
    }
}

// ---------------------------------------------------------------------------
// CooldownTracker
// ---------------------------------------------------------------------------

/// Sole owner of `CooldownWindow` state.
pub struct CooldownTracker {
    policies: PolicyTable,
    slots: Mutex<HashMap<CooldownKey, Arc<Mutex<Slot>>>>,
}

impl CooldownTracker {
    /// A tracker seeded with the committed windows saved in `db`.
    pub fn open(policies: PolicyTable, db: &StateDb) -> Result<Self> {
        let mut slots = HashMap::new();
        for (key, window) in db.load_windows()? {
            slots.insert(
                key,
                Arc::new(Mutex::new(Slot {
                    window: Some(window),
                    ..Slot::default()
                })),
            );
        }
        Ok(Self {
            policies,
            slots: Mutex::new(slots),
        })
    }

    pub fn in_memory(policies: PolicyTable) -> Self {
        Self {
            policies,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &CooldownKey) -> Arc<Mutex<Slot>> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Reserve a slot using the action's policy from the table.
    pub fn try_reserve(
        &self,
        service: &str,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> std::result::Result<Reservation, CooldownDenied> {
        let cooldown = self.policies.get(action).cooldown;
        self.try_reserve_with(service, action, cooldown, now)
    }

    /// Reserve a slot under an explicit policy (a playbook override).
    pub fn try_reserve_with(
        &self,
        service: &str,
        action: ActionKind,
        cooldown: Option<CooldownPolicy>,
        now: DateTime<Utc>,
    ) -> std::result::Result<Reservation, CooldownDenied> {
        let key = CooldownKey::new(service, action);
        let slot_ref = self.slot(&key);

        let Some(policy) = cooldown else {
            return Ok(Reservation {
                id: Uuid::new_v4(),
                key,
                reserved_at: now,
                window_start: None,
                slot: slot_ref,
                settled: false,
            });
        };

        let window_len = policy.window();
        let mut guard = lock(&slot_ref);
        let slot = &mut *guard;

        let current = slot
            .window
            .as_ref()
            .filter(|w| now - w.window_start < window_len)
            .map(|w| (w.window_start, w.count));
        let (start, count) = current.unwrap_or((now, 0));
        if count >= policy.max_per_window {
            let retry_after = policy.window_end(start);
            tracing::debug!(%key, count, %retry_after, "cooldown quota exhausted");
            return Err(CooldownDenied { retry_after });
        }

        if current.is_none() {
            slot.open(now);
        }
        let window_start = slot.admit();
        drop(guard);

        let reservation = Reservation {
            id: Uuid::new_v4(),
            key,
            reserved_at: now,
            window_start,
            slot: slot_ref,
            settled: false,
        };
        tracing::debug!(key = %reservation.key, reservation = %reservation.id, "reserved cooldown slot");
        Ok(reservation)
    }

    /// Finalize a reservation for an action that actually ran, returning
    /// the committed window to persist.
    ///
    /// Both `Success` and `Failed` consume quota. Committing a `Denied`
    /// outcome releases the slot instead, since nothing ran.
    pub fn commit(&self, mut reservation: Reservation, outcome: Outcome) -> Option<WindowUpdate> {
        if outcome == Outcome::Denied {
            self.rollback(reservation);
            return None;
        }
        reservation.settled = true;
        let start = reservation.window_start?;

        let committed = {
            let mut slot = lock(&reservation.slot);
            slot.settle(start, reservation.reserved_at);
            slot.committed()
        };
        tracing::debug!(key = %reservation.key, reservation = %reservation.id, %outcome, "committed cooldown slot");
        committed.map(|window| WindowUpdate {
            key: reservation.key.clone(),
            window,
        })
    }

    /// Release a reservation whose action never executed.
    pub fn rollback(&self, mut reservation: Reservation) {
        reservation.settled = true;
        if let Some(start) = reservation.window_start {
            lock(&reservation.slot).release(start);
        }
        tracing::debug!(key = %reservation.key, reservation = %reservation.id, "rolled back cooldown slot");
    }

    /// Committed state of one window, if it has ever been used.
    pub fn window(&self, service: &str, action: ActionKind) -> Option<CooldownWindow> {
        let key = CooldownKey::new(service, action);
        let slot = lock(&self.slots).get(&key).cloned()?;
        let committed = lock(&slot).committed();
        committed
    }

    /// Committed state of every known window, sorted by key.
    pub fn windows(&self) -> Vec<(CooldownKey, CooldownWindow)> {
        let slots: Vec<_> = lock(&self.slots)
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        let mut out: Vec<_> = slots
            .into_iter()
            .filter_map(|(k, s)| lock(&s).committed().map(|w| (k, w)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[cfg(test)]
    fn live_count(&self, service: &str, action: ActionKind) -> Option<u32> {
        let slot = lock(&self.slots)
            .get(&CooldownKey::new(service, action))
            .cloned()?;
        let count = lock(&slot).window.as_ref().map(|w| w.count);
        count
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as CDur;
    use proptest::prelude::*;

    fn tracker() -> CooldownTracker {
        CooldownTracker::in_memory(PolicyTable::default())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn third_restart_in_window_is_denied_until_window_end() {
        let t = tracker();
        let start = t0();
        let r1 = t.try_reserve("api", ActionKind::Restart, start).unwrap();
        t.commit(r1, Outcome::Success);
        let r2 = t
            .try_reserve("api", ActionKind::Restart, start + CDur::minutes(30))
            .unwrap();
        t.commit(r2, Outcome::Failed);

        let denied = t
            .try_reserve("api", ActionKind::Restart, start + CDur::hours(1))
            .unwrap_err();
        assert_eq!(denied.retry_after, start + CDur::hours(4));
        assert_eq!(t.window("api", ActionKind::Restart).unwrap().count, 2);
    }

    #[test]
    fn boundary_timestamp_opens_new_window() {
        let t = tracker();
        let start = t0();
        let r = t.try_reserve("api", ActionKind::Redeploy, start).unwrap();
        t.commit(r, Outcome::Success);

        let just_before = start + CDur::hours(24) - CDur::seconds(1);
        assert!(t.try_reserve("api", ActionKind::Redeploy, just_before).is_err());

        let boundary = start + CDur::hours(24);
        let r = t.try_reserve("api", ActionKind::Redeploy, boundary).unwrap();
        t.commit(r, Outcome::Success);
        let w = t.window("api", ActionKind::Redeploy).unwrap();
        assert_eq!(w.window_start, boundary);
        assert_eq!(w.count, 1);
    }

    #[test]
    fn rollback_restores_quota() {
        let t = tracker();
        let r = t.try_reserve("api", ActionKind::Redeploy, t0()).unwrap();
        assert_eq!(t.live_count("api", ActionKind::Redeploy), Some(1));
        t.rollback(r);
        assert_eq!(t.live_count("api", ActionKind::Redeploy), None);
        assert!(t.try_reserve("api", ActionKind::Redeploy, t0()).is_ok());
    }

    #[test]
    fn dropped_reservation_rolls_back() {
        let t = tracker();
        {
            let _r = t.try_reserve("api", ActionKind::RotateKey, t0()).unwrap();
            assert!(t.try_reserve("api", ActionKind::RotateKey, t0()).is_err());
        }
        assert_eq!(t.live_count("api", ActionKind::RotateKey), None);
        assert!(t.try_reserve("api", ActionKind::RotateKey, t0()).is_ok());
    }

    #[test]
    fn denied_commit_releases_slot() {
        let t = tracker();
        let r = t.try_reserve("api", ActionKind::RotateKey, t0()).unwrap();
        t.commit(r, Outcome::Denied);
        assert_eq!(t.live_count("api", ActionKind::RotateKey), None);
    }

    #[test]
    fn provisional_reservation_blocks_concurrent_caller() {
        let t = tracker();
        let _held = t.try_reserve("api", ActionKind::Redeploy, t0()).unwrap();
        assert!(t.try_reserve("api", ActionKind::Redeploy, t0()).is_err());
        // the committed view has nothing until the slot commits
        assert!(t.window("api", ActionKind::Redeploy).is_none());
    }

    #[test]
    fn services_and_actions_have_independent_windows() {
        let t = tracker();
        let r = t.try_reserve("api", ActionKind::Redeploy, t0()).unwrap();
        t.commit(r, Outcome::Success);
        assert!(t.try_reserve("web", ActionKind::Redeploy, t0()).is_ok());
        assert!(t.try_reserve("api", ActionKind::Restart, t0()).is_ok());
    }

    #[test]
    fn unlimited_actions_always_reserve() {
        let t = tracker();
        for i in 0..50 {
            let r = t
                .try_reserve("api", ActionKind::InspectLogs, t0() + CDur::seconds(i))
                .unwrap();
            t.commit(r, Outcome::Success);
        }
        assert!(t.window("api", ActionKind::InspectLogs).is_none());
    }

    #[test]
    fn zero_max_always_denies() {
        let t = tracker();
        let policy = CooldownPolicy::new(std::time::Duration::from_secs(60), 0);
        let err = t
            .try_reserve_with("api", ActionKind::Restart, Some(policy), t0())
            .unwrap_err();
        assert_eq!(err.retry_after, t0() + CDur::seconds(60));
    }

    #[test]
    fn stale_reservation_does_not_touch_new_window() {
        let t = tracker();
        let policy = CooldownPolicy::new(std::time::Duration::from_secs(60), 1);
        let old = t
            .try_reserve_with("api", ActionKind::Restart, Some(policy), t0())
            .unwrap();
        let later = t0() + CDur::seconds(60);
        let fresh = t
            .try_reserve_with("api", ActionKind::Restart, Some(policy), later)
            .unwrap();
        t.rollback(old);
        assert_eq!(t.live_count("api", ActionKind::Restart), Some(1));
        t.commit(fresh, Outcome::Success);
        assert_eq!(t.window("api", ActionKind::Restart).unwrap().count, 1);
    }

    #[test]
    fn concurrent_reservations_never_exceed_max() {
        let t = Arc::new(tracker());
        let now = t0();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || match t.try_reserve("api", ActionKind::Restart, now) {
                    Ok(r) => {
                        t.commit(r, Outcome::Success);
                        1u32
                    }
                    Err(_) => 0,
                })
            })
            .collect();
        let accepted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 2);
        assert_eq!(t.window("api", ActionKind::Restart).unwrap().count, 2);
    }

    #[test]
    fn commit_hands_back_window_to_persist() {
        let t = tracker();
        let r = t.try_reserve("api", ActionKind::Restart, t0()).unwrap();
        let update = t.commit(r, Outcome::Failed).unwrap();
        assert_eq!(update.key, CooldownKey::new("api", ActionKind::Restart));
        assert_eq!(update.window.count, 1);
        assert_eq!(update.window.window_start, t0());
        assert_eq!(update.window.last_action_at, Some(t0()));

        let r = t.try_reserve("api", ActionKind::InspectLogs, t0()).unwrap();
        assert!(t.commit(r, Outcome::Success).is_none());
        let r = t.try_reserve("api", ActionKind::Redeploy, t0()).unwrap();
        assert!(t.commit(r, Outcome::Denied).is_none());
    }

    #[test]
    fn open_seeds_from_store() {
        let db = StateDb::in_memory().unwrap();
        let t = CooldownTracker::open(PolicyTable::default(), &db).unwrap();
        assert!(t.windows().is_empty());
    }

    #[test]
    fn rollback_after_expiry_restores_previous_window() {
        let t = tracker();
        let r = t.try_reserve("api", ActionKind::Redeploy, t0()).unwrap();
        t.commit(r, Outcome::Success);
        let before = t.window("api", ActionKind::Redeploy);

        let r = t
            .try_reserve("api", ActionKind::Redeploy, t0() + CDur::hours(25))
            .unwrap();
        t.rollback(r);
        assert_eq!(t.window("api", ActionKind::Redeploy), before);

        // the aborted request must not have re-anchored the window
        let at = t0() + CDur::hours(30);
        let r = t.try_reserve("api", ActionKind::Redeploy, at).unwrap();
        t.commit(r, Outcome::Success);
        let err = t
            .try_reserve("api", ActionKind::Redeploy, at + CDur::hours(19))
            .unwrap_err();
        assert_eq!(err.retry_after, at + CDur::hours(24));
    }

    #[test]
    fn first_reservation_rolled_back_leaves_no_window() {
        let t = tracker();
        drop(t.try_reserve("api", ActionKind::Restart, t0()).unwrap());
        assert!(t.window("api", ActionKind::Restart).is_none());
        assert_eq!(t.live_count("api", ActionKind::Restart), None);
    }

    #[test]
    fn new_window_survives_once_any_reservation_commits() {
        let t = tracker();
        let a = t.try_reserve("api", ActionKind::Restart, t0()).unwrap();
        let b = t.try_reserve("api", ActionKind::Restart, t0()).unwrap();
        t.commit(a, Outcome::Success);
        t.rollback(b);
        let w = t.window("api", ActionKind::Restart).unwrap();
        assert_eq!(w.count, 1);
        assert_eq!(w.window_start, t0());
    }

    #[test]
    fn oversized_window_does_not_panic() {
        let t = tracker();
        let policy = CooldownPolicy {
            window_seconds: 10u64.pow(16),
            max_per_window: 1,
        };
        let r = t
            .try_reserve_with("api", ActionKind::Restart, Some(policy), t0())
            .unwrap();
        t.commit(r, Outcome::Success);
        let err = t
            .try_reserve_with("api", ActionKind::Restart, Some(policy), t0() + CDur::days(365))
            .unwrap_err();
        assert_eq!(err.retry_after, policy.window_end(t0()));
        assert!(err.retry_after > t0() + CDur::days(365));
    }

    #[test]
    fn storage_key_roundtrip() {
        let key = CooldownKey::new("api", ActionKind::RotateKey);
        assert_eq!(CooldownKey::from_storage_key(&key.storage_key()), Some(key));
        assert_eq!(CooldownKey::from_storage_key("no-separator"), None);
    }

    proptest! {
        #[test]
        fn accepted_never_exceeds_max_within_window(
            offsets in proptest::collection::vec(0i64..4 * 3600, 1..40),
            commit_mask in proptest::collection::vec(any::<bool>(), 40),
        ) {
            let t = tracker();
            let mut sorted = offsets.clone();
            sorted.sort_unstable();
            let mut accepted = 0u32;
            for (i, off) in sorted.iter().enumerate() {
                if let Ok(r) = t.try_reserve("api", ActionKind::Restart, t0() + CDur::seconds(*off)) {
                    accepted += 1;
                    if commit_mask[i] {
                        t.commit(r, Outcome::Success);
                    } else {
                        t.rollback(r);
                        accepted -= 1;
                    }
                }
                prop_assert!(t.live_count("api", ActionKind::Restart).unwrap_or(0) <= 2);
            }
            prop_assert!(accepted <= 2);
        }

        #[test]
        fn reserve_then_rollback_leaves_state_unchanged(prior in 0u32..3, off in 0i64..12 * 3600) {
            let t = tracker();
            for _ in 0..prior {
                if let Ok(r) = t.try_reserve("api", ActionKind::Restart, t0()) {
                    t.commit(r, Outcome::Success);
                }
            }
            let before = t.window("api", ActionKind::Restart);
            let live_before = t.live_count("api", ActionKind::Restart);
            if let Ok(r) = t.try_reserve("api", ActionKind::Restart, t0() + CDur::seconds(off)) {
                t.rollback(r);
            }
            prop_assert_eq!(t.window("api", ActionKind::Restart), before);
            prop_assert_eq!(t.live_count("api", ActionKind::Restart), live_before);
        }
    }
}
