//! The aggregation engine: every poll mutation goes through here.
//!
//! A mutation holds the poll's lock from [`locks::PollLocks`] and one write
//! transaction for its whole read-check-write sequence. Ledger and counters
//! are written in that same transaction, so an error or a dropped future
//! leaves nothing behind.

pub mod locks;

use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use sqlx::SqliteConnection;

use crate::db::{Database, PollStore, VoteLedger};
use crate::error::PollError;
use crate::models::{self, Poll, VoteRecord};
use locks::PollLocks;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 50;
pub const MAX_QUESTION_CHARS: usize = 1000;
pub const MAX_OPTION_CHARS: usize = 200;

lazy_static! {
    // Up to 128 characters, none of them control characters.
    static ref VOTER_ID: Regex = Regex::new(r"^[^\p{Cc}]{1,128}$").expect("voter id pattern");
}

pub struct PollEngine {
    db: Database,
    locks: PollLocks,
}

/// Outcome of [`PollEngine::audit`]: polls whose stored state breaks an invariant.
#[derive(Debug, Default)]
pub struct AuditReport {
    pub polls_checked: usize,
    pub failures: Vec<(String, String)>,
}

impl PollEngine {
    pub fn new(db: Database, lock_timeout: Duration) -> Self {
        Self {
            db,
            locks: PollLocks::new(lock_timeout),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn create_poll(
        &self,
        question: &str,
        options: &[String],
        allow_anonymous: bool,
    ) -> Result<Poll, PollError> {
        let (question, options) = validate_new_poll(question, options)?;
        let poll = Poll::new(question, options, allow_anonymous);

        let _guard = self.locks.acquire(&poll.id).await?;
        let mut tx = self.db.begin_write().await?;
        tx.save_poll(&poll).await?;
        tx.commit().await?;

        info!(
            "Created poll {} with {} options (anonymous: {})",
            poll.id,
            poll.options.len(),
            poll.allow_anonymous
        );
        Ok(poll)
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Poll, PollError> {
        let mut tx = self.db.begin_read().await?;
        let poll = tx.load_poll(poll_id).await?.ok_or_else(|| not_found(poll_id))?;
        tx.commit().await?;
        Ok(poll)
    }

    /// All polls, newest first. Repeated calls return the same order until a poll is created or deleted.
    pub async fn list_polls(&self) -> Result<Vec<Poll>, PollError> {
        let mut tx = self.db.begin_read().await?;
        let polls = tx.list_polls().await?;
        tx.commit().await?;
        Ok(polls)
    }

    /// Casts a first vote. Voting again, for the same or another option, is rejected
    /// until the voter clears their current vote.
    pub async fn vote(&self, poll_id: &str, voter_id: &str, option_index: usize) -> Result<Poll, PollError> {
        let _guard = self.locks.acquire(poll_id).await?;
        let mut tx = self.db.begin_write().await?;

        let mut poll = tx.load_poll(poll_id).await?.ok_or_else(|| not_found(poll_id))?;
        check_option_index(&poll, option_index)?;
        let voter_id = check_voter(&poll, voter_id, "voting")?;

        match tx.get_vote(poll_id, voter_id).await? {
            Some(current) if current >= poll.options.len() => {
                return Err(corrupted(poll_id, format!("ledger points at missing option {}", current)));
            }
            Some(current) if current == option_index => return Err(PollError::AlreadyVoted),
            Some(_) => return Err(PollError::ConflictingVote),
            None => {}
        }

        let option = &mut poll.options[option_index];
        option.votes = option
            .votes
            .checked_add(1)
            .ok_or_else(|| corrupted(poll_id, format!("vote counter overflow on option {}", option_index)))?;
        poll.updated_at = models::now();

        tx.put_vote(poll_id, voter_id, option_index).await?;
        tx.save_poll(&poll).await?;
        check_tally(&mut tx, &poll).await?;
        tx.commit().await?;

        debug!("Vote on poll {} option {} by {}", poll_id, option_index, voter_id);
        Ok(poll)
    }

    /// Withdraws the voter's vote. `expected_index` is the option the caller believes is
    /// selected; a mismatch means the caller's view is stale and nothing changes.
    pub async fn clear_vote(&self, poll_id: &str, voter_id: &str, expected_index: usize) -> Result<Poll, PollError> {
        let _guard = self.locks.acquire(poll_id).await?;
        let mut tx = self.db.begin_write().await?;

        let mut poll = tx.load_poll(poll_id).await?.ok_or_else(|| not_found(poll_id))?;
        check_option_index(&poll, expected_index)?;
        let voter_id = check_voter(&poll, voter_id, "clearing your vote")?;

        let stored = tx.get_vote(poll_id, voter_id).await?.ok_or(PollError::NoActiveVote)?;
        if stored >= poll.options.len() {
            return Err(corrupted(poll_id, format!("ledger points at missing option {}", stored)));
        }
        if stored != expected_index {
            warn!(
                "Stale clear on poll {}: caller expected option {}, ledger has {}",
                poll_id, expected_index, stored
            );
            return Err(PollError::StaleVote);
        }

        let option = &mut poll.options[stored];
        option.votes = option.votes.checked_sub(1).ok_or_else(|| {
            corrupted(poll_id, format!("option {} has an active vote but a zero counter", stored))
        })?;
        poll.updated_at = models::now();

        tx.remove_vote(poll_id, voter_id).await?;
        tx.save_poll(&poll).await?;
        check_tally(&mut tx, &poll).await?;
        tx.commit().await?;

        debug!("Cleared vote on poll {} option {} by {}", poll_id, stored, voter_id);
        Ok(poll)
    }

    /// Removes the poll and every ledger entry for it.
    pub async fn delete_poll(&self, poll_id: &str) -> Result<(), PollError> {
        let _guard = self.locks.acquire(poll_id).await?;
        let mut tx = self.db.begin_write().await?;

        let purged = tx.remove_all_for_poll(poll_id).await?;
        if !tx.delete_poll(poll_id).await? {
            return Err(not_found(poll_id));
        }
        tx.commit().await?;

        info!("Deleted poll {} and {} ledger entries", poll_id, purged);
        Ok(())
    }

    /// The option `voter_id` currently has selected, if any.
    pub async fn current_vote(&self, poll_id: &str, voter_id: &str) -> Result<Option<usize>, PollError> {
        let mut tx = self.db.begin_read().await?;
        let poll = tx.load_poll(poll_id).await?.ok_or_else(|| not_found(poll_id))?;
        let voter_id = check_voter(&poll, voter_id, "checking your vote")?;
        let current = tx.get_vote(poll_id, voter_id).await?;
        tx.commit().await?;
        Ok(current)
    }

    /// Re-derives the counters of one poll from its ledger. Never repairs anything.
    pub async fn verify_poll(&self, poll_id: &str) -> Result<(), PollError> {
        let mut tx = self.db.begin_read().await?;
        let poll = tx.load_poll(poll_id).await?.ok_or_else(|| not_found(poll_id))?;
        let records = tx.votes_for_poll(poll_id).await?;
        tx.commit().await?;

        verify_snapshot(&poll, &records).map_err(|reason| corrupted(poll_id, reason))
    }

    /// Checks every poll. Individual failures are collected rather than returned early.
    pub async fn audit(&self) -> Result<AuditReport, PollError> {
        let mut tx = self.db.begin_read().await?;
        let polls = tx.list_polls().await?;

        let mut report = AuditReport::default();
        for poll in &polls {
            let records = tx.votes_for_poll(&poll.id).await?;
            report.polls_checked += 1;
            if let Err(reason) = verify_snapshot(poll, &records) {
                report.failures.push((poll.id.clone(), reason));
            }
        }
        tx.commit().await?;

        Ok(report)
    }
}

fn validate_new_poll(question: &str, options: &[String]) -> Result<(String, Vec<String>), PollError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(PollError::invalid("Please enter a question."));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(PollError::invalid(format!(
            "The question must be at most {} characters.",
            MAX_QUESTION_CHARS
        )));
    }

    if options.len() < MIN_OPTIONS {
        return Err(PollError::invalid("Please enter at least two options."));
    }
    if options.len() > MAX_OPTIONS {
        return Err(PollError::invalid(format!("A poll can have at most {} options.", MAX_OPTIONS)));
    }

    let mut cleaned = Vec::with_capacity(options.len());
    for (index, text) in options.iter().enumerate() {
        let text = text.trim();
        if text.is_empty() {
            return Err(PollError::invalid(format!("Option {} is empty.", index + 1)));
        }
        if text.chars().count() > MAX_OPTION_CHARS {
            return Err(PollError::invalid(format!(
                "Option {} must be at most {} characters.",
                index + 1,
                MAX_OPTION_CHARS
            )));
        }
        cleaned.push(text.to_string());
    }

    Ok((question.to_string(), cleaned))
}

fn check_option_index(poll: &Poll, option_index: usize) -> Result<(), PollError> {
    if option_index >= poll.options.len() {
        return Err(PollError::invalid(format!(
            "optionIndex {} is out of range; this poll has {} options.",
            option_index,
            poll.options.len()
        )));
    }
    Ok(())
}

/// Identified polls need a registered name; anonymous ones still need a token to key the ledger.
fn check_voter<'a>(poll: &Poll, raw: &'a str, action: &str) -> Result<&'a str, PollError> {
    let voter_id = raw.trim();
    if voter_id.is_empty() {
        if poll.allow_anonymous {
            return Err(PollError::invalid("A voter token is required."));
        }
        return Err(PollError::PermissionDenied(format!(
            "You must register / log in before {} on this poll.",
            action
        )));
    }
    if !VOTER_ID.is_match(voter_id) {
        return Err(PollError::invalid(
            "Voter identity must be at most 128 characters with no control characters.",
        ));
    }
    Ok(voter_id)
}

// Runs inside the mutation's transaction, after the writes and before commit.
async fn check_tally(conn: &mut SqliteConnection, poll: &Poll) -> Result<(), PollError> {
    let ledger_votes = conn.count_for_poll(&poll.id).await?;
    let counted = poll.total_votes();
    if ledger_votes != counted {
        return Err(corrupted(
            &poll.id,
            format!("counters sum to {} but the ledger holds {} votes", counted, ledger_votes),
        ));
    }
    Ok(())
}

fn verify_snapshot(poll: &Poll, records: &[VoteRecord]) -> Result<(), String> {
    let mut expected = vec![0u64; poll.options.len()];
    for record in records {
        match expected.get_mut(record.option_index) {
            Some(count) => *count += 1,
            None => {
                return Err(format!(
                    "voter {} is recorded on missing option {}",
                    record.voter_id, record.option_index
                ));
            }
        }
    }

    for (index, (option, expected)) in poll.options.iter().zip(&expected).enumerate() {
        if u64::from(option.votes) != *expected {
            return Err(format!(
                "option {} counts {} votes but the ledger holds {}",
                index, option.votes, expected
            ));
        }
    }
    Ok(())
}

fn not_found(poll_id: &str) -> PollError {
    PollError::NotFound(poll_id.to_string())
}

fn corrupted(poll_id: &str, detail: String) -> PollError {
    error!("Poll {} failed an integrity check: {}", poll_id, detail);
    PollError::Corrupted(format!("poll {}: {}", poll_id, detail))
}
