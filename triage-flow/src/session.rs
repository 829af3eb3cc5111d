use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::{
    context::Context,
    error::{Result, TriageError},
    models::Identity,
};

/// Per-identity workflow session: who is acting plus the shared workflow context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    /// Step the intake flow resumes from.
    pub current_step: String,
    pub status_message: Option<String>,
    #[serde(skip)]
    pub context: Context,
}

impl Session {
    pub fn new(identity: Identity, start_step: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity,
            current_step: start_step.to_string(),
            status_message: None,
            context: Context::new(),
        }
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

/// Holds the signed-in identity for the lifetime of the application.
///
/// Sign-in creates a fresh [`Session`]; sign-out destroys it. Nothing here
/// inspects the credential beyond "is one present".
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    current: RwLock<Option<String>>,
    start_step: String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>, start_step: impl Into<String>) -> Self {
        Self {
            storage,
            current: RwLock::new(None),
            start_step: start_step.into(),
        }
    }

    pub fn in_memory(start_step: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemorySessionStorage::new()), start_step)
    }

    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        self.storage.clone()
    }

    /// Starts a session for `identity`, ending any previous one.
    pub async fn sign_in(&self, identity: Identity) -> Result<Session> {
        self.sign_out().await?;

        let session = Session::new(identity, &self.start_step);
        self.storage.save(session.clone()).await?;
        *self.current.write().await = Some(session.id.clone());

        info!(
            session_id = %session.id,
            user_id = %session.identity.id,
            role = %session.identity.role,
            "Signed in"
        );
        Ok(session)
    }

    pub async fn current(&self) -> Result<Option<Session>> {
        let id = self.current.read().await.clone();
        match id {
            Some(id) => self.storage.get(&id).await,
            None => Ok(None),
        }
    }

    /// The current session, or `Authorization` when nobody is signed in.
    pub async fn require(&self) -> Result<Session> {
        self.current()
            .await?
            .ok_or_else(|| TriageError::Authorization("not signed in".to_string()))
    }

    pub async fn identity(&self) -> Result<Option<Identity>> {
        Ok(self.current().await?.map(|s| s.identity))
    }

    pub async fn has_credential(&self) -> bool {
        matches!(self.identity().await, Ok(Some(identity)) if identity.has_credential())
    }

    pub async fn sign_out(&self) -> Result<()> {
        let previous = self.current.write().await.take();
        if let Some(id) = previous {
            self.storage.delete(&id).await?;
            info!(session_id = %id, "Signed out");
        }
        Ok(())
    }
}
