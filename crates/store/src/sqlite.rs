//! SQLite chat store.
//!
//! Two tables:
//! - `chat_sessions` — one row per session, scoped to a topology
//! - `chat_messages` — messages in insertion order, deleted with their
//!   session through a foreign key cascade

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::error::StoreError;
use dispatch_core::message::{Message, Role, SessionId};
use dispatch_core::store::{ChatMode, ChatSession, ChatStore, StoredMessage};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A chat store backed by a SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // A single connection keeps `sqlite::memory:` one database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite chat store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                topology_id  TEXT NOT NULL,
                title        TEXT NOT NULL,
                mode         TEXT NOT NULL,
                model        TEXT NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id   TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role         TEXT NOT NULL,
                content      TEXT NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_sessions_topology ON chat_sessions(topology_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("topology index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<ChatSession, StoreError> {
        let column = |name: &str| -> Result<String, StoreError> {
            row.try_get::<String, _>(name)
                .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
        };

        let mode = column("mode")?;
        Ok(ChatSession {
            id: SessionId(column("id")?),
            topology_id: column("topology_id")?,
            title: column("title")?,
            mode: ChatMode::parse(&mode)
                .ok_or_else(|| StoreError::QueryFailed(format!("unknown chat mode '{mode}'")))?,
            model: column("model")?,
            created_at: Self::parse_time(&column("created_at")?),
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<StoredMessage, StoreError> {
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(StoredMessage {
            role: Role::parse(&role)
                .ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role}'")))?,
            content,
            created_at: Self::parse_time(&created_at),
        })
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(
        &self,
        topology_id: &str,
        title: &str,
        mode: ChatMode,
        model: &str,
    ) -> Result<ChatSession, StoreError> {
        let session = ChatSession {
            id: SessionId::new(),
            topology_id: topology_id.to_string(),
            title: title.to_string(),
            mode,
            model: model.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, topology_id, title, mode, model, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(session.id.as_str())
        .bind(&session.topology_id)
        .bind(&session.title)
        .bind(session.mode.as_str())
        .bind(&session.model)
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT session failed: {e}")))?;

        debug!(session_id = %session.id, topology = %topology_id, "Created chat session");
        Ok(session)
    }

    async fn list_sessions(&self, topology_id: &str) -> Result<Vec<ChatSession>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, topology_id, title, mode, model, created_at
            FROM chat_sessions
            WHERE topology_id = ?1
            ORDER BY iid DESC
            "#,
        )
        .bind(topology_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT sessions failed: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE session failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn rename_session(
        &self,
        session_id: &SessionId,
        title: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE session failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn session_history(
        &self,
        session_id: &SessionId,
        topology_id: &str,
    ) -> Result<Option<Vec<StoredMessage>>, StoreError> {
        let owner = sqlx::query("SELECT 1 FROM chat_sessions WHERE id = ?1 AND topology_id = ?2")
            .bind(session_id.as_str())
            .bind(topology_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT session failed: {e}")))?;

        if owner.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT role, content, created_at FROM chat_messages WHERE session_id = ?1 ORDER BY iid ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT messages failed: {e}")))?;

        rows.iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    async fn save_message(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(session_id.as_str())
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::SessionNotFound(session_id.to_string())
            }
            other => StoreError::Storage(format!("INSERT message failed: {other}")),
        })?;

        Ok(())
    }

    async fn load_recent_history(
        &self,
        session_id: &SessionId,
        pair_limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        // LIMIT -1 means no limit in SQLite
        let limit: i64 = pair_limit.map(|p| (p * 2) as i64).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at FROM chat_messages
            WHERE session_id = ?1
            ORDER BY iid DESC
            LIMIT ?2
            "#,
        )
        .bind(session_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT history failed: {e}")))?;

        let mut messages = rows
            .iter()
            .map(|row| Self::row_to_message(row).map(|m| m.to_message()))
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_list_sessions() {
        let db = test_store().await;
        let first = db
            .create_session("lab", "configure ospf", ChatMode::Agent, "qwen")
            .await
            .unwrap();
        let second = db
            .create_session("lab", "what is bgp", ChatMode::Ask, "deepseek")
            .await
            .unwrap();
        db.create_session("core", "elsewhere", ChatMode::Agent, "qwen")
            .await
            .unwrap();

        let sessions = db.list_sessions("lab").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, second.id);
        assert_eq!(sessions[0].mode, ChatMode::Ask);
        assert_eq!(sessions[1].id, first.id);
        assert_eq!(sessions[1].model, "qwen");
    }

    #[tokio::test]
    async fn history_round_trip_and_scope() {
        let db = test_store().await;
        let session = db
            .create_session("lab", "t", ChatMode::Agent, "qwen")
            .await
            .unwrap();
        db.save_message(&session.id, Role::User, "list devices")
            .await
            .unwrap();
        db.save_message(&session.id, Role::Assistant, "R1, R2")
            .await
            .unwrap();

        let history = db.session_history(&session.id, "lab").await.unwrap().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "R1, R2");

        assert!(db.session_history(&session.id, "core").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_history_is_chronological_tail() {
        let db = test_store().await;
        let session = db
            .create_session("lab", "t", ChatMode::Agent, "qwen")
            .await
            .unwrap();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            db.save_message(&session.id, role, &format!("m{i}"))
                .await
                .unwrap();
        }

        let recent = db.load_recent_history(&session.id, Some(1)).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        let all = db.load_recent_history(&session.id, None).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "m0");
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let db = test_store().await;
        let session = db
            .create_session("lab", "t", ChatMode::Agent, "qwen")
            .await
            .unwrap();
        db.save_message(&session.id, Role::User, "hi").await.unwrap();

        assert!(db.delete_session(&session.id).await.unwrap());
        assert!(!db.delete_session(&session.id).await.unwrap());
        assert!(db.load_recent_history(&session.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_session() {
        let db = test_store().await;
        let session = db
            .create_session("lab", "old", ChatMode::Local, "gemma")
            .await
            .unwrap();
        assert!(db.rename_session(&session.id, "renamed").await.unwrap());
        assert_eq!(db.list_sessions("lab").await.unwrap()[0].title, "renamed");
        assert!(!db.rename_session(&SessionId::from("nope"), "x").await.unwrap());
    }

    #[tokio::test]
    async fn saving_to_unknown_session_fails() {
        let db = test_store().await;
        let err = db
            .save_message(&SessionId::from("missing"), Role::User, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("chat.db").display());

        let id = {
            let db = SqliteStore::new(&path).await.unwrap();
            let session = db
                .create_session("lab", "persisted", ChatMode::Agent, "qwen")
                .await
                .unwrap();
            db.save_message(&session.id, Role::User, "hello").await.unwrap();
            session.id
        };

        let db = SqliteStore::new(&path).await.unwrap();
        let history = db.session_history(&id, "lab").await.unwrap().unwrap();
        assert_eq!(history[0].content, "hello");
    }
}
