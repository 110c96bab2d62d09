//! Song store
//!
//! The persistence collaborator for ingestion: a transactional
//! "validate and create" operation that either inserts a song or reports
//! per-field validation errors. Voting and deletion live elsewhere.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Persisted song record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub vote: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Song as handed to the store for creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub vote: i64,
    pub url: String,
}

impl NewSong {
    /// New songs always start with a single vote
    pub fn new(title: impl Into<String>, artist: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            vote: 1,
            url: url.into(),
        }
    }

    /// Check that every required field is present
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.title.trim().is_empty() {
            errors.add("title", "Title can not be blank.");
        }
        if self.artist.trim().is_empty() {
            errors.add("artist", "Artist can not be blank.");
        }
        if self.vote == 0 {
            errors.add("vote", "Vote can not be blank.");
        }
        if self.url.trim().is_empty() {
            errors.add("url", "Url can not be blank.");
        }

        if errors.has_any() {
            Err(errors)
        } else {
            Ok(())
        }
    }
}

/// Field name → messages, in field order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn has_any(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self
            .errors
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        f.write_str(&messages.join(" "))
    }
}

/// Song store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record rejected before insert
    #[error("song is invalid: {0}")]
    Validation(ValidationErrors),

    /// Insert failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Create the songs table
pub async fn create_songs_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            vote INTEGER NOT NULL DEFAULT 1,
            url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Validate `song` and insert it using the caller's connection
///
/// The caller owns the transaction: pass `&mut *tx` so the insert commits or
/// rolls back together with the rest of the caller's unit of work.
pub async fn validate_and_create(
    conn: &mut SqliteConnection,
    song: &NewSong,
) -> Result<Song, StoreError> {
    song.validate().map_err(StoreError::Validation)?;

    let now = Utc::now();
    let created = Song {
        id: Uuid::new_v4(),
        title: song.title.clone(),
        artist: song.artist.clone(),
        vote: song.vote,
        url: song.url.clone(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO songs (id, title, artist, vote, url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(created.id.to_string())
    .bind(&created.title)
    .bind(&created.artist)
    .bind(created.vote)
    .bind(&created.url)
    .bind(created.created_at)
    .bind(created.updated_at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(song_id = %created.id, url = %created.url, "Song inserted");

    Ok(created)
}

/// Load all songs, oldest first
pub async fn load_songs(pool: &SqlitePool) -> Result<Vec<Song>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, artist, vote, url, created_at, updated_at
        FROM songs
        ORDER BY created_at, rowid
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.try_get("id")?;
            Ok(Song {
                id: Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                title: row.try_get("title")?,
                artist: row.try_get("artist")?,
                vote: row.try_get("vote")?,
                url: row.try_get("url")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect()
}

/// Count persisted songs
pub async fn count_songs(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM songs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
