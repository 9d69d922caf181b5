use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::controller::QueueController;
use crate::errors::SessionError;
use crate::events::SessionEventBus;
use crate::model::{SessionEvent, SessionId};

/// Ownership map of the live sessions: session id to controller.
///
/// The registry is the sole owner of a controller's lifetime. Removing a
/// session shuts its controller down (listener tasks, timers, player);
/// controllers hold a weak reference back to the registry so they can ask
/// for their own removal on terminal conditions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<QueueController>>>,
    events: SessionEventBus,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            events: SessionEventBus::new(),
        })
    }

    /// Bus carrying session-level events of every registered session.
    pub fn events(&self) -> &SessionEventBus {
        &self.events
    }

    /// Registers a controller under its session id.
    pub fn insert(&self, controller: Arc<QueueController>) -> Result<(), SessionError> {
        let id = controller.session_id().clone();
        let mut sessions = self.sessions.write().expect("Session registry lock poisoned");
        if sessions.contains_key(&id) {
            return Err(SessionError::SessionExists(id.0));
        }
        info!(session = %id, "Registered session");
        sessions.insert(id, controller);
        Ok(())
    }

    /// Removes a session and shuts its controller down.
    ///
    /// Returns the removed controller, or None when the id was unknown.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<QueueController>> {
        let removed = {
            let mut sessions = self.sessions.write().expect("Session registry lock poisoned");
            sessions.remove(id)
        };
        match &removed {
            Some(controller) => {
                info!(session = %id, "Removed session");
                controller.shutdown();
                self.events.broadcast(SessionEvent::SessionClosed { id: id.clone() });
            }
            None => debug!(session = %id, "Remove requested for unknown session"),
        }
        removed
    }

    pub fn lookup(&self, id: &SessionId) -> Option<Arc<QueueController>> {
        self.sessions
            .read()
            .expect("Session registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Like [`lookup`](Self::lookup), but unknown ids are an error.
    pub fn require(&self, id: &SessionId) -> Result<Arc<QueueController>, SessionError> {
        self.lookup(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.0.clone()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions
            .read()
            .expect("Session registry lock poisoned")
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .expect("Session registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .expect("Session registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
