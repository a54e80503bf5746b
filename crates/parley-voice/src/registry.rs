//! The group-keyed session registry.
//!
//! Removal and the decision to tear down happen under one lock, and the
//! only way to tear a session down is through the [`DetachedSession`] that
//! removal returns. A session that is being closed is therefore never
//! visible to close handlers checking [`SessionRegistry::is_current`].

use crate::session::VoiceSession;
use parley_types::GroupId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A session that has been removed from the registry and may be torn down.
#[derive(Debug)]
pub struct DetachedSession(Arc<VoiceSession>);

impl DetachedSession {
    pub fn session(&self) -> &Arc<VoiceSession> {
        &self.0
    }

    pub fn teardown(self) {
        self.0.teardown();
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<GroupId, Arc<VoiceSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<GroupId, Arc<VoiceSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `session` for its group, returning whatever it displaced.
    pub fn insert(&self, session: Arc<VoiceSession>) -> Option<DetachedSession> {
        self.map()
            .insert(session.group().clone(), session)
            .map(DetachedSession)
    }

    pub fn get(&self, group: &GroupId) -> Option<Arc<VoiceSession>> {
        self.map().get(group).cloned()
    }

    pub fn remove(&self, group: &GroupId) -> Option<DetachedSession> {
        self.map().remove(group).map(DetachedSession)
    }

    /// Removes `session` only if it is still the one registered for its
    /// group.
    pub fn remove_if_current(&self, session: &Arc<VoiceSession>) -> Option<DetachedSession> {
        let mut map = self.map();
        match map.get(session.group()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                map.remove(session.group()).map(DetachedSession)
            }
            _ => None,
        }
    }

    pub fn is_current(&self, session: &Arc<VoiceSession>) -> bool {
        self.map()
            .get(session.group())
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    pub fn sessions(&self) -> Vec<Arc<VoiceSession>> {
        let mut sessions: Vec<Arc<VoiceSession>> = self.map().values().cloned().collect();
        sessions.sort_by(|a, b| a.group().cmp(b.group()));
        sessions
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
