//! Session records

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::identifier::{descending, IdPrefix};

/// One logical task thread. Sessions are never deleted implicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub directory: PathBuf,
    /// Session this one was forked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
    pub time_created: i64,
    pub time_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_archived: Option<i64>,
}

impl Session {
    pub fn new(project_id: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: descending(IdPrefix::Session),
            project_id: project_id.into(),
            directory: directory.into(),
            parent_id: None,
            title: default_title(now),
            time_created: now,
            time_updated: now,
            time_archived: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        let now = Utc::now().timestamp_millis();
        // Keep time_updated monotonic within one millisecond.
        self.time_updated = now.max(self.time_updated);
    }

    pub fn archive(&mut self) {
        let now = Utc::now().timestamp_millis();
        self.time_archived = Some(now);
        self.time_updated = now.max(self.time_updated);
    }

    pub fn is_archived(&self) -> bool {
        self.time_archived.is_some()
    }
}

fn default_title(now_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(now_ms) {
        Some(dt) => format!("New session - {}", dt.format("%Y-%m-%d %H:%M:%S")),
        None => "New session".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new("proj", "/tmp/work");
        assert!(session.id.starts_with("session_"));
        assert!(session.title.starts_with("New session"));
        assert_eq!(session.time_created, session.time_updated);
        assert!(!session.is_archived());
    }

    #[test]
    fn test_touch_and_archive() {
        let mut session = Session::new("proj", "/tmp").with_title("Fix bug");
        let created = session.time_updated;
        session.touch();
        assert!(session.time_updated >= created);

        session.archive();
        assert!(session.is_archived());
        assert_eq!(session.title, "Fix bug");
    }

    #[test]
    fn test_newer_sessions_sort_first() {
        let older = Session::new("p", "/");
        let newer = Session::new("p", "/");
        assert!(newer.id < older.id);
    }

    #[test]
    fn test_round_trip() {
        let session = Session::new("p", "/w").with_parent("session_abc");
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
