//! Session persistence

use std::path::PathBuf;
use std::sync::Arc;

use sdk::errors::EngineError;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::MessageHistory;
use crate::record::Session;
use crate::storage::{key, Storage};

/// Summary of one session and its messages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub project_id: String,
    pub title: String,
    pub time_created: i64,
    pub time_updated: i64,
    pub message_count: usize,
    /// Creation time of the newest message
    pub last_message_time: Option<i64>,
}

/// Stores session documents at `[sessions, project_id, session_id]`
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Create and persist a new session
    pub async fn create(
        &self,
        project_id: &str,
        directory: impl Into<PathBuf>,
        title: Option<String>,
    ) -> Result<Session, EngineError> {
        let mut session = Session::new(project_id, directory);
        if let Some(title) = title {
            session = session.with_title(title);
        }
        self.save(&session).await?;
        debug!("Created session {} in project {}", session.id, project_id);
        Ok(session)
    }

    pub async fn save(&self, session: &Session) -> Result<(), EngineError> {
        let value = serde_json::to_value(session)?;
        self.storage
            .write(
                &key(["sessions", session.project_id.as_str(), session.id.as_str()]),
                &value,
            )
            .await
    }

    pub async fn load(&self, project_id: &str, session_id: &str) -> Result<Session, EngineError> {
        let value = self
            .storage
            .read(&key(["sessions", project_id, session_id]))
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Look a session up in every project
    pub async fn find(&self, session_id: &str) -> Result<Session, EngineError> {
        for project_id in self.storage.list_groups(&key(["sessions"])).await? {
            if let Some(value) = self
                .storage
                .read(&key(["sessions", project_id.as_str(), session_id]))
                .await?
            {
                return Ok(serde_json::from_value(value)?);
            }
        }
        Err(EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Sessions of one project, or of all projects, newest first
    pub async fn list(&self, project_id: Option<&str>) -> Result<Vec<Session>, EngineError> {
        let projects = match project_id {
            Some(project_id) => vec![project_id.to_string()],
            None => self.storage.list_groups(&key(["sessions"])).await?,
        };

        let mut sessions = Vec::new();
        for project_id in projects {
            for session_id in self
                .storage
                .list_keys(&key(["sessions", project_id.as_str()]))
                .await?
            {
                let value = match self
                    .storage
                    .read(&key(["sessions", project_id.as_str(), session_id.as_str()]))
                    .await
                {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Skipping unreadable session {}: {}", session_id, e);
                        continue;
                    }
                };
                match serde_json::from_value::<Session>(value) {
                    Ok(session) => sessions.push(session),
                    Err(e) => warn!("Skipping corrupt session {}: {}", session_id, e),
                }
            }
        }

        sessions.sort_by(|a, b| {
            b.time_created
                .cmp(&a.time_created)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions)
    }

    /// Most recently updated session, if any
    pub async fn recent(&self, project_id: Option<&str>) -> Result<Option<Session>, EngineError> {
        Ok(self
            .list(project_id)
            .await?
            .into_iter()
            .min_by(|a, b| b.time_updated.cmp(&a.time_updated)))
    }

    /// Set a new title and bump the update time
    pub async fn rename(
        &self,
        project_id: &str,
        session_id: &str,
        title: impl Into<String>,
    ) -> Result<Session, EngineError> {
        let mut session = self.load(project_id, session_id).await?;
        session.title = title.into();
        session.touch();
        self.save(&session).await?;
        Ok(session)
    }

    /// Delete a session together with its messages
    ///
    /// Returns `false` when no such session was stored.
    pub async fn delete(&self, project_id: &str, session_id: &str) -> Result<bool, EngineError> {
        let session_key = key(["sessions", project_id, session_id]);
        let existed = self.storage.exists(&session_key).await?;

        MessageHistory::new(Arc::clone(&self.storage), project_id)
            .clear(session_id)
            .await?;
        self.storage.delete(&session_key).await?;

        if existed {
            info!("Deleted session {} from project {}", session_id, project_id);
        }
        Ok(existed)
    }

    pub async fn stats(&self, project_id: &str, session_id: &str) -> Result<SessionStats, EngineError> {
        let session = self.load(project_id, session_id).await?;
        let history = MessageHistory::new(Arc::clone(&self.storage), project_id);
        let message_count = history.message_count(session_id).await?;
        let last_message_time = history
            .last_message(session_id)
            .await?
            .map(|m| m.time_created);

        Ok(SessionStats {
            session_id: session.id,
            project_id: session.project_id,
            title: session.title,
            time_created: session.time_created,
            time_updated: session.time_updated,
            message_count,
            last_message_time,
        })
    }
}
