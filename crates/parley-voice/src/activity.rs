//! Manual voice-activity boundaries derived from speaking events.
//!
//! Platforms report speaking start/end for every micro-pause. The tracker
//! opens a segment on the first speaker and closes it only after the
//! debounce window passes with nobody speaking. It owns no timer: callers
//! schedule one for the token returned by [`ActivityTracker::speaking_stopped`]
//! and report back through [`ActivityTracker::debounce_elapsed`].

use parley_types::UserId;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ActivityTracker {
    speaking: HashSet<UserId>,
    segment_open: bool,
    pending: Option<u64>,
    generation: u64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_segment_open(&self) -> bool {
        self.segment_open
    }

    pub fn has_pending_end(&self) -> bool {
        self.pending.is_some()
    }

    pub fn speaking(&self) -> impl Iterator<Item = &UserId> {
        self.speaking.iter()
    }

    pub fn is_quiet(&self) -> bool {
        self.speaking.is_empty()
    }

    /// Records that `user` started speaking and cancels any pending end.
    /// Returns `true` when an activity-start must be sent now.
    pub fn speaking_started(&mut self, user: UserId, model_open: bool) -> bool {
        self.pending = None;
        self.speaking.insert(user);
        if !self.segment_open && model_open {
            self.segment_open = true;
            return true;
        }
        false
    }

    /// Records that `user` stopped speaking. Returns a debounce token when
    /// the last speaker went quiet during an open segment; any earlier token
    /// is invalidated.
    pub fn speaking_stopped(&mut self, user: &UserId) -> Option<u64> {
        self.speaking.remove(user);
        if self.speaking.is_empty() && self.segment_open {
            self.generation += 1;
            self.pending = Some(self.generation);
            return self.pending;
        }
        None
    }

    /// Called when the debounce window for `token` ran out. Returns `true`
    /// when an activity-end must be sent now; the segment is then closed.
    pub fn debounce_elapsed(&mut self, token: u64) -> bool {
        if self.pending != Some(token) {
            return false;
        }
        self.pending = None;
        if self.speaking.is_empty() && self.segment_open {
            self.segment_open = false;
            return true;
        }
        false
    }

    /// Forgets the open segment. Used when the model session it belonged
    /// to is gone.
    pub fn reset_segment(&mut self) {
        self.segment_open = false;
        self.pending = None;
    }

    /// Reopens a segment for users still speaking when a new model session
    /// comes up. Returns `true` when an activity-start must be sent now.
    pub fn resume(&mut self, model_open: bool) -> bool {
        if !self.segment_open && model_open && !self.speaking.is_empty() {
            self.segment_open = true;
            self.pending = None;
            return true;
        }
        false
    }
}
