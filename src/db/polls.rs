//! Poll records and their option counters.
//!
//! The store persists whatever it is handed; validation and atomicity across
//! the ledger live in the engine, which calls these inside one transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{decode_timestamp, encode_timestamp};
use crate::error::PollError;
use crate::models::{Poll, PollOption};

#[async_trait]
pub trait PollStore {
    async fn load_poll(&mut self, poll_id: &str) -> Result<Option<Poll>, PollError>;

    /// Inserts the poll or, if it exists, updates its counters and `updated_at`.
    /// Question, option texts and the anonymity flag are never rewritten.
    async fn save_poll(&mut self, poll: &Poll) -> Result<(), PollError>;

    /// Returns false when no such poll existed.
    async fn delete_poll(&mut self, poll_id: &str) -> Result<bool, PollError>;

    /// Most recently created first; ties keep reverse insertion order.
    async fn list_polls(&mut self) -> Result<Vec<Poll>, PollError>;
}

#[async_trait]
impl PollStore for SqliteConnection {
    async fn load_poll(&mut self, poll_id: &str) -> Result<Option<Poll>, PollError> {
        let poll_row = sqlx::query(
            r#"
            SELECT id, question, allow_anonymous, created_at, updated_at
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&mut *self)
        .await?;

        let Some(poll_row) = poll_row else {
            return Ok(None);
        };

        let option_rows = sqlx::query(
            r#"
            SELECT position, text, votes
            FROM poll_options
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&mut *self)
        .await?;

        let mut options = Vec::with_capacity(option_rows.len());
        for row in &option_rows {
            push_option(poll_id, &mut options, row)?;
        }

        poll_from_row(&poll_row, options).map(Some)
    }

    async fn save_poll(&mut self, poll: &Poll) -> Result<(), PollError> {
        sqlx::query(
            r#"
            INSERT INTO polls (id, question, allow_anonymous, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.question)
        .bind(poll.allow_anonymous)
        .bind(encode_timestamp(&poll.created_at))
        .bind(encode_timestamp(&poll.updated_at))
        .execute(&mut *self)
        .await?;

        for (position, option) in poll.options.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO poll_options (poll_id, position, text, votes)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(poll_id, position) DO UPDATE SET votes = excluded.votes
                "#,
            )
            .bind(&poll.id)
            .bind(position as i64)
            .bind(&option.text)
            .bind(i64::from(option.votes))
            .execute(&mut *self)
            .await?;
        }

        Ok(())
    }

    async fn delete_poll(&mut self, poll_id: &str) -> Result<bool, PollError> {
        sqlx::query("DELETE FROM poll_options WHERE poll_id = ?")
            .bind(poll_id)
            .execute(&mut *self)
            .await?;

        let deleted = sqlx::query("DELETE FROM polls WHERE id = ?")
            .bind(poll_id)
            .execute(&mut *self)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn list_polls(&mut self) -> Result<Vec<Poll>, PollError> {
        let poll_rows = sqlx::query(
            r#"
            SELECT id, question, allow_anonymous, created_at, updated_at
            FROM polls
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&mut *self)
        .await?;

        let option_rows = sqlx::query(
            r#"
            SELECT poll_id, position, text, votes
            FROM poll_options
            ORDER BY poll_id, position
            "#,
        )
        .fetch_all(&mut *self)
        .await?;

        let mut options_by_poll: HashMap<String, Vec<PollOption>> = HashMap::new();
        for row in &option_rows {
            let poll_id: String = row.try_get("poll_id")?;
            let options = options_by_poll.entry(poll_id.clone()).or_default();
            push_option(&poll_id, options, row)?;
        }

        poll_rows
            .iter()
            .map(|row| -> Result<Poll, PollError> {
                let id: String = row.try_get("id")?;
                let options = options_by_poll.remove(&id).unwrap_or_default();
                poll_from_row(row, options)
            })
            .collect()
    }
}

// Options must arrive ordered by position; a gap means a row went missing.
fn push_option(poll_id: &str, options: &mut Vec<PollOption>, row: &SqliteRow) -> Result<(), PollError> {
    let position: i64 = row.try_get("position")?;
    if position != options.len() as i64 {
        return Err(PollError::corrupted(format!(
            "poll {} has option at position {} where {} was expected",
            poll_id,
            position,
            options.len()
        )));
    }

    let votes: i64 = row.try_get("votes")?;
    let votes = u32::try_from(votes).map_err(|_| {
        PollError::corrupted(format!("poll {} option {} has vote count {}", poll_id, position, votes))
    })?;

    options.push(PollOption {
        text: row.try_get("text")?,
        votes,
    });
    Ok(())
}

fn poll_from_row(row: &SqliteRow, options: Vec<PollOption>) -> Result<Poll, PollError> {
    let id: String = row.try_get("id")?;
    if options.len() < 2 {
        return Err(PollError::corrupted(format!("poll {} has {} options", id, options.len())));
    }

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Poll {
        question: row.try_get("question")?,
        allow_anonymous: row.try_get("allow_anonymous")?,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
        options,
        id,
    })
}
