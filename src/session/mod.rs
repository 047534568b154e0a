//! Conversation persistence
//!
//! Each session lives in its own directory under the storage root:
//!
//! ```text
//! <storage_dir>/session_<id>/session.json    metadata
//! <storage_dir>/session_<id>/messages.jsonl  one turn per line, append-only
//! ```

use crate::api::{Message, Role};
use crate::router::ModelMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const METADATA_FILE: &str = "session.json";
const MESSAGES_FILE: &str = "messages.jsonl";
const DIR_PREFIX: &str = "session_";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session id '{0}': use letters, digits, '-' or '_'")]
    InvalidId(String),

    #[error("Session I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt session metadata at {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize turn: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SessionError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Backend that produced an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModelMode>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            mode: None,
        }
    }

    pub fn assistant(content: impl Into<String>, mode: ModelMode) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            mode: Some(mode),
        }
    }

    /// Context message for a backend request
    pub fn to_message(&self) -> Message {
        Message {
            role: match self.role {
                TurnRole::User => Role::User,
                TurnRole::Assistant => Role::Assistant,
            },
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// Counts over a session's turns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub id: String,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub local_answers: usize,
    pub cloud_answers: usize,
    pub first_turn: Option<DateTime<Utc>>,
    pub last_turn: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn total_turns(&self) -> usize {
        self.user_turns + self.assistant_turns
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Session {}", self.id)?;
        writeln!(
            f,
            "  Turns: {} ({} user, {} assistant)",
            self.total_turns(),
            self.user_turns,
            self.assistant_turns
        )?;
        writeln!(
            f,
            "  Answered by: {} local, {} cloud",
            self.local_answers, self.cloud_answers
        )?;
        if let (Some(first), Some(last)) = (self.first_turn, self.last_turn) {
            writeln!(
                f,
                "  Span: {} .. {}",
                first.format("%Y-%m-%d %H:%M:%S"),
                last.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
        Ok(())
    }
}

/// Whether a session id is safe to use as a directory name
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Directory holding a session's files
pub fn session_path(storage_dir: &Path, id: &str) -> Result<PathBuf, SessionError> {
    if !is_valid_session_id(id) {
        return Err(SessionError::InvalidId(id.to_string()));
    }
    Ok(storage_dir.join(format!("{}{}", DIR_PREFIX, id)))
}

/// Whether a session has been created under the storage root
pub async fn exists(storage_dir: &Path, id: &str) -> Result<bool, SessionError> {
    let path = session_path(storage_dir, id)?.join(METADATA_FILE);
    fs::try_exists(&path)
        .await
        .map_err(|e| SessionError::io(&path, e))
}

/// Metadata of every session under the storage root, most recent first.
///
/// Directories with unreadable metadata are skipped.
pub async fn list_sessions(storage_dir: &Path) -> Result<Vec<SessionMetadata>, SessionError> {
    let mut sessions = Vec::new();

    let mut entries = match fs::read_dir(storage_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
        Err(e) => return Err(SessionError::io(storage_dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SessionError::io(storage_dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(DIR_PREFIX) {
            continue;
        }

        match read_metadata(&entry.path().join(METADATA_FILE)).await {
            Ok(metadata) => sessions.push(metadata),
            Err(e) => warn!(dir = %name, error = %e, "Skipping unreadable session"),
        }
    }

    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(sessions)
}

async fn read_metadata(path: &Path) -> Result<SessionMetadata, SessionError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| SessionError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|source| SessionError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Append/read log of one session's turns
#[derive(Debug)]
pub struct SessionStore {
    dir: PathBuf,
    metadata: SessionMetadata,
}

impl SessionStore {
    /// Open a session, creating its directory and metadata when new
    pub async fn open(storage_dir: impl AsRef<Path>, id: &str) -> Result<Self, SessionError> {
        let dir = session_path(storage_dir.as_ref(), id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SessionError::io(&dir, e))?;

        let metadata_path = dir.join(METADATA_FILE);
        let metadata = if fs::try_exists(&metadata_path)
            .await
            .map_err(|e| SessionError::io(&metadata_path, e))?
        {
            let metadata = read_metadata(&metadata_path).await?;
            info!(session = %id, turns = metadata.turn_count, "Resumed session");
            metadata
        } else {
            let now = Utc::now();
            let metadata = SessionMetadata {
                id: id.to_string(),
                created_at: now,
                updated_at: now,
                turn_count: 0,
            };
            info!(session = %id, dir = %dir.display(), "Created session");
            metadata
        };

        write_metadata(&dir, &metadata).await?;
        Ok(Self { dir, metadata })
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    fn messages_path(&self) -> PathBuf {
        self.dir.join(MESSAGES_FILE)
    }

    /// Append turns as one write, then refresh the metadata
    pub async fn append(&mut self, turns: &[ConversationTurn]) -> Result<(), SessionError> {
        if turns.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for turn in turns {
            buf.push_str(&serde_json::to_string(turn)?);
            buf.push('\n');
        }

        let path = self.messages_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SessionError::io(&path, e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| SessionError::io(&path, e))?;
        file.flush().await.map_err(|e| SessionError::io(&path, e))?;

        let mut metadata = self.metadata.clone();
        metadata.turn_count += turns.len();
        metadata.updated_at = Utc::now();
        write_metadata(&self.dir, &metadata).await?;
        self.metadata = metadata;

        debug!(session = %self.metadata.id, appended = turns.len(), "Appended turns");
        Ok(())
    }

    /// Every turn in order. Lines that do not parse are skipped.
    pub async fn load(&self) -> Result<Vec<ConversationTurn>, SessionError> {
        let path = self.messages_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io(&path, e)),
        };

        let mut turns = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationTurn>(line) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!(
                    session = %self.metadata.id,
                    line = line_no + 1,
                    error = %e,
                    "Skipping corrupt turn"
                ),
            }
        }

        Ok(turns)
    }

    /// The last `n` turns in order
    pub async fn recent(&self, n: usize) -> Result<Vec<ConversationTurn>, SessionError> {
        let mut turns = self.load().await?;
        let skip = turns.len().saturating_sub(n);
        Ok(turns.split_off(skip))
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        let turns = self.load().await?;
        let mut stats = SessionStats {
            id: self.metadata.id.clone(),
            first_turn: turns.first().map(|t| t.timestamp),
            last_turn: turns.last().map(|t| t.timestamp),
            ..Default::default()
        };

        for turn in &turns {
            match turn.role {
                TurnRole::User => stats.user_turns += 1,
                TurnRole::Assistant => stats.assistant_turns += 1,
            }
            match turn.mode {
                Some(ModelMode::Local) => stats.local_answers += 1,
                Some(ModelMode::Cloud) => stats.cloud_answers += 1,
                None => {}
            }
        }

        Ok(stats)
    }
}

async fn write_metadata(dir: &Path, metadata: &SessionMetadata) -> Result<(), SessionError> {
    let path = dir.join(METADATA_FILE);
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
    let json = serde_json::to_string_pretty(metadata)?;

    fs::write(&tmp, json)
        .await
        .map_err(|e| SessionError::io(&tmp, e))?;
    fs::rename(&tmp, &path)
        .await
        .map_err(|e| SessionError::io(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_id_charset() {
        assert!(is_valid_session_id("default"));
        assert!(is_valid_session_id("line-3_night"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id("a b"));
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::open(tmp.path(), "demo").await.unwrap();

        assert_eq!(store.path(), tmp.path().join("session_demo"));
        assert!(store.path().join("session.json").exists());
        assert!(exists(tmp.path(), "demo").await.unwrap());
        assert!(!exists(tmp.path(), "other").await.unwrap());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let mut store = SessionStore::open(tmp.path(), "demo").await.unwrap();
        store
            .append(&[
                ConversationTurn::user("read temp-sensor"),
                ConversationTurn::assistant("23.4 °C", ModelMode::Local),
            ])
            .await
            .unwrap();

        let reopened = SessionStore::open(tmp.path(), "demo").await.unwrap();
        assert_eq!(reopened.metadata().turn_count, 2);

        let turns = reopened.load().await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].mode, Some(ModelMode::Local));
    }

    #[tokio::test]
    async fn test_failed_metadata_write_keeps_turn_count() {
        let tmp = TempDir::new().unwrap();
        let mut store = SessionStore::open(tmp.path(), "demo").await.unwrap();
        // A directory where the temp file goes makes the metadata write fail
        std::fs::create_dir(store.path().join("session.json.tmp")).unwrap();

        let result = store.append(&[ConversationTurn::user("valve state?")]).await;

        assert!(matches!(result, Err(SessionError::Io { .. })));
        assert_eq!(store.metadata().turn_count, 0);
        let on_disk = read_metadata(&store.path().join("session.json")).await.unwrap();
        assert_eq!(on_disk.turn_count, 0);
    }

    #[tokio::test]
    async fn test_recent_returns_tail_in_order() {
        let tmp = TempDir::new().unwrap();
        let mut store = SessionStore::open(tmp.path(), "demo").await.unwrap();
        for i in 0..5 {
            store
                .append(&[ConversationTurn::user(format!("msg {}", i))])
                .await
                .unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 3", "msg 4"]);
        assert_eq!(store.recent(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut store = SessionStore::open(tmp.path(), "demo").await.unwrap();
        store.append(&[ConversationTurn::user("first")]).await.unwrap();

        let path = store.path().join("messages.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(&path, raw).unwrap();
        store.append(&[ConversationTurn::user("second")]).await.unwrap();

        let turns = store.load().await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "second");
    }

    #[tokio::test]
    async fn test_stats_count_roles_and_modes() {
        let tmp = TempDir::new().unwrap();
        let mut store = SessionStore::open(tmp.path(), "demo").await.unwrap();
        store
            .append(&[
                ConversationTurn::user("a"),
                ConversationTurn::assistant("b", ModelMode::Local),
                ConversationTurn::user("c"),
                ConversationTurn::assistant("d", ModelMode::Cloud),
            ])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_turns(), 4);
        assert_eq!(stats.local_answers, 1);
        assert_eq!(stats.cloud_answers, 1);
        assert!(stats.to_string().contains("Session demo"));
    }

    #[tokio::test]
    async fn test_list_sessions_ignores_foreign_dirs() {
        let tmp = TempDir::new().unwrap();
        SessionStore::open(tmp.path(), "one").await.unwrap();
        SessionStore::open(tmp.path(), "two").await.unwrap();
        std::fs::create_dir(tmp.path().join("scratch")).unwrap();
        std::fs::create_dir(tmp.path().join("session_broken")).unwrap();

        let mut ids: Vec<_> = list_sessions(tmp.path())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["one", "two"]);

        let missing = list_sessions(&tmp.path().join("nope")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = SessionStore::open(tmp.path(), "../escape").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidId(_)));
    }
}
