//! Voice Presence Tracker: per-tick crediting with idle decay.
//!
//! State machine per (scope, user):
//!
//! ```text
//!   Absent ──presence_start──▶ Present ──tick──▶ Present
//!      ▲                          │
//!      └──────presence_end────────┘   (final credit, session dropped)
//! ```
//!
//! Every credit compares `now` against the user's last refresh (their last
//! qualifying text message). Once `idle_threshold` seconds pass without a
//! refresh the elapsed time is credited as *reduced* and a single
//! [`IdleWarning`] is raised for the episode. A refresh clears the warned
//! flag and restores full-rate crediting from the next credit on. A user
//! who has never sent a qualifying message counts as last refreshed at the
//! epoch, so their time is reduced from the first credit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::live::LiveCounterStore;
use crate::types::{ScopeId, Timestamp, UserId, VoiceRefreshState};

/// One continuous presence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSession {
    /// When presence began.
    pub start_time: Timestamp,
    /// Up to when time has been credited.
    pub last_credit_time: Timestamp,
}

/// Raised the first time a decay episode begins for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleWarning {
    /// Scope the decay applies to.
    pub scope: ScopeId,
    /// Affected user.
    pub user: UserId,
    /// Last refresh before the episode began.
    pub last_refresh_time: Timestamp,
    /// When the decay was detected.
    pub at: Timestamp,
}

/// What a crediting pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceTickReport {
    /// Sessions credited.
    pub sessions: usize,
    /// Full-rate seconds credited.
    pub full_seconds: i64,
    /// Reduced seconds credited.
    pub reduced_seconds: i64,
    /// New decay episodes.
    pub warnings: Vec<IdleWarning>,
}

#[derive(Debug, Default)]
struct TrackerState {
    sessions: HashMap<(ScopeId, UserId), VoiceSession>,
    refresh: HashMap<(ScopeId, UserId), VoiceRefreshState>,
}

/// Owns active voice sessions and refresh bookkeeping; feeds the live store.
#[derive(Debug)]
pub struct VoicePresenceTracker {
    idle_threshold_secs: i64,
    tz: Tz,
    live: Arc<LiveCounterStore>,
    state: Mutex<TrackerState>,
    refresh_dirty: AtomicBool,
}

impl VoicePresenceTracker {
    /// Create a tracker crediting into `live`, with day boundaries in `tz`.
    #[must_use]
    pub fn new(idle_threshold_secs: i64, tz: Tz, live: Arc<LiveCounterStore>) -> Self {
        Self {
            idle_threshold_secs,
            tz,
            live,
            state: Mutex::new(TrackerState::default()),
            refresh_dirty: AtomicBool::new(false),
        }
    }

    /// Absent → Present. Returns `false` if the user was already present or
    /// the scope is not active.
    pub fn presence_start(&self, scope: ScopeId, user: UserId, now: Timestamp) -> bool {
        if !self.live.registry().is_active(scope) {
            return false;
        }
        let mut state = self.state.lock();
        if state.sessions.contains_key(&(scope, user)) {
            return false;
        }
        state.sessions.insert(
            (scope, user),
            VoiceSession {
                start_time: now,
                last_credit_time: now,
            },
        );
        true
    }

    /// Present → Absent. Credits the remaining time once, then drops the session.
    pub fn presence_end(&self, scope: ScopeId, user: UserId, now: Timestamp) -> VoiceTickReport {
        let mut state = self.state.lock();
        let mut report = VoiceTickReport::default();
        if let Some(mut session) = state.sessions.remove(&(scope, user)) {
            self.credit(&mut state.refresh, scope, user, &mut session, now, &mut report);
        }
        report
    }

    /// Credit every present user. Sessions whose scope has been retired are
    /// discarded without credit.
    pub fn tick(&self, now: Timestamp) -> VoiceTickReport {
        let mut guard = self.state.lock();
        let TrackerState { sessions, refresh } = &mut *guard;
        let registry = self.live.registry();
        sessions.retain(|(scope, _), _| registry.is_active(*scope));

        let mut report = VoiceTickReport::default();
        for (&(scope, user), session) in sessions.iter_mut() {
            self.credit(refresh, scope, user, session, now, &mut report);
        }
        report
    }

    fn credit(
        &self,
        refresh: &mut HashMap<(ScopeId, UserId), VoiceRefreshState>,
        scope: ScopeId,
        user: UserId,
        session: &mut VoiceSession,
        now: Timestamp,
        report: &mut VoiceTickReport,
    ) {
        let delta = now.seconds_since(session.last_credit_time);
        if delta <= 0 {
            return;
        }
        session.last_credit_time = now;
        report.sessions += 1;

        let entry = refresh.entry((scope, user)).or_insert(VoiceRefreshState {
            last_refresh_time: Timestamp::EPOCH,
            warned: false,
        });
        let reduced = now.seconds_since(entry.last_refresh_time) >= self.idle_threshold_secs;
        // The whole chunk lands on the day of `now`, even if it began before midnight.
        let day = now.day_in(self.tz);
        self.live.add_voice_seconds(scope, user, day, delta, reduced);

        if reduced {
            report.reduced_seconds += delta;
            if !entry.warned {
                entry.warned = true;
                self.refresh_dirty.store(true, Ordering::Release);
                report.warnings.push(IdleWarning {
                    scope,
                    user,
                    last_refresh_time: entry.last_refresh_time,
                    at: now,
                });
            }
        } else {
            report.full_seconds += delta;
        }
    }

    /// Qualifying text activity: restore full-rate crediting and re-arm the warning.
    pub fn refresh_presence(&self, scope: ScopeId, user: UserId, now: Timestamp) {
        self.state.lock().refresh.insert(
            (scope, user),
            VoiceRefreshState {
                last_refresh_time: now,
                warned: false,
            },
        );
        self.refresh_dirty.store(true, Ordering::Release);
    }

    /// Whether the user currently has an open session.
    #[must_use]
    pub fn is_present(&self, scope: ScopeId, user: UserId) -> bool {
        self.state.lock().sessions.contains_key(&(scope, user))
    }

    /// Number of open sessions.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Refresh bookkeeping for one user.
    #[must_use]
    pub fn refresh_state(&self, scope: ScopeId, user: UserId) -> Option<VoiceRefreshState> {
        self.state.lock().refresh.get(&(scope, user)).copied()
    }

    /// Every (scope, user) refresh record.
    #[must_use]
    pub fn snapshot_refresh(&self) -> Vec<(ScopeId, UserId, VoiceRefreshState)> {
        let state = self.state.lock();
        state.refresh.iter().map(|(&(s, u), &r)| (s, u, r)).collect()
    }

    /// Full refresh snapshot, if anything changed since the last call.
    /// Call [`Self::mark_refresh_dirty`] if persisting it fails.
    pub fn take_dirty_refresh_snapshot(
        &self,
    ) -> Option<Vec<(ScopeId, UserId, VoiceRefreshState)>> {
        if !self.refresh_dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(self.snapshot_refresh())
    }

    /// Force the next refresh snapshot to be taken.
    pub fn mark_refresh_dirty(&self) {
        self.refresh_dirty.store(true, Ordering::Release);
    }

    /// Drop every session and refresh record of a retired scope.
    pub fn forget_scope(&self, scope: ScopeId) {
        let mut state = self.state.lock();
        state.sessions.retain(|(s, _), _| *s != scope);
        let before = state.refresh.len();
        state.refresh.retain(|(s, _), _| *s != scope);
        if state.refresh.len() != before {
            self.refresh_dirty.store(true, Ordering::Release);
        }
    }

    /// Reload persisted refresh bookkeeping after a restart.
    pub fn restore_refresh<I: IntoIterator<Item = (ScopeId, UserId, VoiceRefreshState)>>(
        &self,
        rows: I,
    ) {
        let mut state = self.state.lock();
        for (scope, user, refresh) in rows {
            state.refresh.insert((scope, user), refresh);
        }
    }
}
