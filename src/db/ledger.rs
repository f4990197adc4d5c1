//! Which option each voter currently has selected, per poll.

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};

use super::{decode_timestamp, encode_timestamp};
use crate::error::PollError;
use crate::models::{self, VoteRecord};

#[async_trait]
pub trait VoteLedger {
    async fn get_vote(&mut self, poll_id: &str, voter_id: &str) -> Result<Option<usize>, PollError>;

    async fn put_vote(&mut self, poll_id: &str, voter_id: &str, option_index: usize) -> Result<(), PollError>;

    /// Returns false when the voter had no entry.
    async fn remove_vote(&mut self, poll_id: &str, voter_id: &str) -> Result<bool, PollError>;

    /// Returns the number of entries removed.
    async fn remove_all_for_poll(&mut self, poll_id: &str) -> Result<u64, PollError>;

    async fn count_for_poll(&mut self, poll_id: &str) -> Result<u64, PollError>;

    async fn votes_for_poll(&mut self, poll_id: &str) -> Result<Vec<VoteRecord>, PollError>;
}

#[async_trait]
impl VoteLedger for SqliteConnection {
    async fn get_vote(&mut self, poll_id: &str, voter_id: &str) -> Result<Option<usize>, PollError> {
        let row = sqlx::query("SELECT option_index FROM vote_ledger WHERE poll_id = ? AND voter_id = ?")
            .bind(poll_id)
            .bind(voter_id)
            .fetch_optional(&mut *self)
            .await?;

        match row {
            Some(row) => decode_index(poll_id, row.try_get("option_index")?).map(Some),
            None => Ok(None),
        }
    }

    async fn put_vote(&mut self, poll_id: &str, voter_id: &str, option_index: usize) -> Result<(), PollError> {
        sqlx::query(
            r#"
            INSERT INTO vote_ledger (poll_id, voter_id, option_index, voted_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(poll_id)
        .bind(voter_id)
        .bind(option_index as i64)
        .bind(encode_timestamp(&models::now()))
        .execute(&mut *self)
        .await?;

        Ok(())
    }

    async fn remove_vote(&mut self, poll_id: &str, voter_id: &str) -> Result<bool, PollError> {
        let removed = sqlx::query("DELETE FROM vote_ledger WHERE poll_id = ? AND voter_id = ?")
            .bind(poll_id)
            .bind(voter_id)
            .execute(&mut *self)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }

    async fn remove_all_for_poll(&mut self, poll_id: &str) -> Result<u64, PollError> {
        let removed = sqlx::query("DELETE FROM vote_ledger WHERE poll_id = ?")
            .bind(poll_id)
            .execute(&mut *self)
            .await?
            .rows_affected();

        Ok(removed)
    }

    async fn count_for_poll(&mut self, poll_id: &str) -> Result<u64, PollError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM vote_ledger WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_one(&mut *self)
            .await?
            .try_get("n")?;

        Ok(count as u64)
    }

    async fn votes_for_poll(&mut self, poll_id: &str) -> Result<Vec<VoteRecord>, PollError> {
        let rows = sqlx::query(
            r#"
            SELECT voter_id, option_index, voted_at
            FROM vote_ledger
            WHERE poll_id = ?
            ORDER BY voted_at, voter_id
            "#,
        )
        .bind(poll_id)
        .fetch_all(&mut *self)
        .await?;

        rows.iter()
            .map(|row| -> Result<VoteRecord, PollError> {
                let voted_at: String = row.try_get("voted_at")?;
                Ok(VoteRecord {
                    poll_id: poll_id.to_string(),
                    voter_id: row.try_get("voter_id")?,
                    option_index: decode_index(poll_id, row.try_get("option_index")?)?,
                    voted_at: decode_timestamp(&voted_at)?,
                })
            })
            .collect()
    }
}

fn decode_index(poll_id: &str, raw: i64) -> Result<usize, PollError> {
    usize::try_from(raw)
        .map_err(|_| PollError::corrupted(format!("poll {} has a ledger entry for option {}", poll_id, raw)))
}
