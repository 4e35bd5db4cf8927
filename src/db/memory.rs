//! Per-user conversational memory backed by `SQLite` and sqlite-vec
//!
//! Each user owns one append-only collection (`<user>_context`) of turns.
//! Turns are ordered by creation timestamp, then by insertion sequence, and
//! carry an optional embedding used for similarity recall.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::embedder::{Embed, Embedder, EMBEDDING_DIM};
use super::DbPool;
use crate::{Error, Result};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    Human,
    Assistant,
}

impl TurnRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }

    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "assistant" | "ai" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single persisted utterance
#[derive(Debug, Clone)]
pub struct Turn {
    /// Store-assigned insertion sequence (tie-breaker for equal timestamps)
    pub seq: i64,
    pub id: String,
    pub user_id: String,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
}

/// A turn recalled by similarity search
#[derive(Debug, Clone)]
pub struct Recall {
    pub turn: Turn,
    /// Vector distance to the query (lower is closer)
    pub distance: f64,
}

/// Name of the collection holding a user's turns
#[must_use]
pub fn collection_name(user_id: &str) -> String {
    format!("{user_id}_context")
}

/// Memory store for database operations
#[derive(Clone)]
pub struct MemoryStore {
    pool: DbPool,
    embedder: Arc<dyn Embed>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

const TURN_COLUMNS: &str = "seq, id, user_id, role, content, created_at_us, created_at, embedding";

impl MemoryStore {
    /// Create a new memory store
    #[must_use]
    pub fn new(pool: DbPool, embedder: Arc<dyn Embed>) -> Self {
        Self { pool, embedder }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Create the user's collection if it does not exist yet
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn ensure_collection(&self, user_id: &str) -> Result<()> {
        let conn = self.conn()?;
        ensure_collection_on(&conn, user_id)?;
        Ok(())
    }

    /// Embed and persist a turn in the user's collection
    ///
    /// An embedder failure is logged and the turn is stored without a vector.
    ///
    /// # Errors
    ///
    /// Returns error if the turn cannot be persisted
    pub async fn append_turn(
        &self,
        user_id: &str,
        text: &str,
        role: TurnRole,
        timestamp: DateTime<Utc>,
    ) -> Result<Turn> {
        let embedding = match self.embedder.embed(text).await {
            Ok(v) if v.len() == EMBEDDING_DIM => Some(v),
            Ok(v) => {
                tracing::warn!(
                    user = user_id,
                    dim = v.len(),
                    expected = EMBEDDING_DIM,
                    "embedding has unexpected dimension, storing turn without vector"
                );
                None
            }
            Err(e) => {
                tracing::warn!(user = user_id, error = %e, "embedding failed, storing turn without vector");
                None
            }
        };

        let id = format!("turn_{}", Uuid::new_v4());
        let embedding_bytes = embedding.as_deref().map(Embedder::to_bytes);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let collection = ensure_collection_on(&tx, user_id)?;

        tx.execute(
            r"INSERT INTO turns (id, collection, user_id, role, content, created_at_us, created_at, embedding)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                collection,
                user_id,
                role.as_str(),
                text,
                timestamp.timestamp_micros(),
                timestamp.to_rfc3339(),
                embedding_bytes,
            ],
        )?;
        let seq = tx.last_insert_rowid();

        if let Some(ref bytes) = embedding_bytes {
            tx.execute(
                "INSERT INTO turns_vec (turn_id, user_id, embedding) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, user_id, bytes],
            )?;
        }

        tx.commit()?;

        tracing::debug!(user = user_id, seq, role = %role, "turn appended");

        Ok(Turn {
            seq,
            id,
            user_id: user_id.to_string(),
            role,
            content: text.to_string(),
            created_at: timestamp,
            embedding,
        })
    }

    /// The user's last `limit` turns, oldest first
    ///
    /// A user without a collection yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn load_recent(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TURN_COLUMNS} FROM turns WHERE user_id = ?1 ORDER BY created_at_us DESC, seq DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], row_to_turn_row)?;

        let mut turns = rows
            .map(|r| r.map(TurnRow::into_turn))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        turns.reverse();

        Ok(turns)
    }

    /// Recall the user's turns most similar to `text`
    ///
    /// # Errors
    ///
    /// Returns error if the query cannot be embedded or the search fails
    pub async fn search_similar(&self, user_id: &str, text: &str, limit: usize) -> Result<Vec<Recall>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(text).await?;
        if query.len() != EMBEDDING_DIM {
            return Err(Error::Embedding(format!(
                "query embedding has dimension {}, expected {EMBEDDING_DIM}",
                query.len()
            )));
        }
        let query_bytes = Embedder::to_bytes(&query);

        let conn = self.conn()?;

        let prefixed_columns = TURN_COLUMNS
            .split(", ")
            .map(|c| format!("t.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            r"SELECT {prefixed_columns}, v.distance
              FROM turns t
              INNER JOIN (
                  SELECT turn_id, distance
                  FROM turns_vec
                  WHERE embedding MATCH ?1 AND k = ?2 AND user_id = ?3
              ) v ON t.id = v.turn_id
              WHERE t.user_id = ?3
              ORDER BY v.distance"
        );
        let mut stmt = conn.prepare(&sql)?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(
            rusqlite::params![query_bytes, limit as i64, user_id],
            |row| {
                let turn_row = row_to_turn_row(row)?;
                let distance: f64 = row.get(8)?;
                Ok((turn_row, distance))
            },
        )?;

        let recalled = rows
            .map(|r| {
                r.map(|(row, distance)| Recall {
                    turn: row.into_turn(),
                    distance,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(recalled)
    }

    /// Number of turns stored for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether the user has a collection
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn has_collection(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM collections WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn ensure_collection_on(conn: &rusqlite::Connection, user_id: &str) -> Result<String> {
    let name = collection_name(user_id);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO collections (name, user_id) VALUES (?1, ?2)",
        rusqlite::params![name, user_id],
    )?;
    if inserted > 0 {
        tracing::info!(user = user_id, collection = %name, "created memory collection");
    }
    Ok(name)
}

struct TurnRow {
    seq: i64,
    id: String,
    user_id: String,
    role: String,
    content: String,
    created_at_us: i64,
    created_at: String,
    embedding: Option<Vec<u8>>,
}

fn row_to_turn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRow> {
    Ok(TurnRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        created_at_us: row.get(5)?,
        created_at: row.get(6)?,
        embedding: row.get(7)?,
    })
}

impl TurnRow {
    fn into_turn(self) -> Turn {
        let created_at = DateTime::from_timestamp_micros(self.created_at_us).unwrap_or_else(|| {
            DateTime::parse_from_rfc3339(&self.created_at).map_or_else(
                |e| {
                    tracing::warn!(turn = %self.id, error = %e, "unreadable turn timestamp, using now");
                    Utc::now()
                },
                |dt| dt.with_timezone(&Utc),
            )
        });

        let role = TurnRole::from_str_value(&self.role).unwrap_or_else(|| {
            tracing::warn!(turn = %self.id, role = %self.role, "unknown turn role, treating as human");
            TurnRole::Human
        });

        Turn {
            seq: self.seq,
            id: self.id,
            user_id: self.user_id,
            role,
            content: self.content,
            created_at,
            embedding: self.embedding.map(|b| Embedder::from_bytes(&b)),
        }
    }
}
