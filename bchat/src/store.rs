//! Session storage contract and a basic in-memory implementation.
//!
//! The store only persists session values; merging and append semantics
//! belong to the orchestrator. Get-then-set is not atomic: two
//! concurrent talk calls against the same session can lose one turn.
//! That limitation is part of the contract, not something a store
//! implementation should try to paper over.

use std::collections::HashMap;
use std::sync::Mutex;

use bcommon::{BoxFuture, SessionId};

use crate::{ChatError, Session};

pub trait SessionStore: Send + Sync {
    fn get<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, ChatError>>;

    fn set<'a>(
        &'a self,
        session_id: &'a SessionId,
        session: Session,
    ) -> BoxFuture<'a, Result<(), ChatError>>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, ChatError>> {
        Box::pin(async move {
            let sessions = self
                .sessions
                .lock()
                .map_err(|_| ChatError::store("session store lock poisoned"))?;

            Ok(sessions.get(session_id.as_str()).cloned())
        })
    }

    fn set<'a>(
        &'a self,
        session_id: &'a SessionId,
        session: Session,
    ) -> BoxFuture<'a, Result<(), ChatError>> {
        Box::pin(async move {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| ChatError::store("session store lock poisoned"))?;

            sessions.insert(session_id.as_str().to_string(), session);
            Ok(())
        })
    }
}
