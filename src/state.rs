//! Process-wide shared state
//!
//! One `AppState` is built per client and handed by `Arc` to every component
//! constructor. The session lives in a `watch` channel so waiters can block
//! until it settles; only [`AuthManager`](crate::session_manager::AuthManager)
//! writes it. The folder cache is written only through
//! [`StorageClient`](crate::storage::StorageClient) and the logout path.

use std::sync::Mutex;

use tokio::sync::watch;

use crate::cache::FolderCache;
use crate::events::{EventBus, Screen, SyncEvent};
use crate::session_manager::Session;
use crate::transfer_pool::UploadTracker;

pub struct AppState {
    session: watch::Sender<Session>,
    cache: FolderCache,
    uploads: UploadTracker,
    events: EventBus,
    screen: Mutex<Screen>,
}

impl AppState {
    pub fn new() -> Self {
        let (session, _) = watch::channel(Session::default());
        Self {
            session,
            cache: FolderCache::new(),
            uploads: UploadTracker::new(),
            events: EventBus::new(),
            screen: Mutex::new(Screen::default()),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Apply `f`; watchers are notified only when it returns true.
    pub(crate) fn modify_session(&self, f: impl FnOnce(&mut Session) -> bool) -> bool {
        self.session.send_if_modified(f)
    }

    pub(crate) fn replace_session(&self, session: Session) {
        self.session.send_replace(session);
    }

    /// Tell observers about the current session.
    pub(crate) fn announce_session(&self) {
        let session = self.session();
        self.events.publish(SyncEvent::SessionChanged {
            state: session.state,
            username: session.username,
        });
    }

    pub fn cache(&self) -> &FolderCache {
        &self.cache
    }

    pub fn uploads(&self) -> &UploadTracker {
        &self.uploads
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn screen(&self) -> Screen {
        *self.screen.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_screen(&self, screen: Screen) {
        *self.screen.lock().unwrap_or_else(|p| p.into_inner()) = screen;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_manager::SessionState;

    #[test]
    fn test_fresh_state() {
        let state = AppState::new();
        assert_eq!(state.session().state, SessionState::Uninitialized);
        assert!(state.cache().is_empty());
        assert!(state.uploads().snapshot().is_empty());
        assert_eq!(state.screen(), Screen::Login);
    }

    #[test]
    fn test_modify_session_notifies_only_on_change() {
        let state = AppState::new();
        let rx = state.watch_session();
        assert!(!state.modify_session(|_| false));
        assert!(!rx.has_changed().unwrap());
        assert!(state.modify_session(|s| {
            s.state = SessionState::Authenticating;
            true
        }));
        assert!(rx.has_changed().unwrap());
    }
}
