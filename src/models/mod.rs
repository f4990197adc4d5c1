use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A poll snapshot, serialized in the shape the web client expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    #[serde(rename = "_id")]
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    pub allow_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: u32,
}

/// One active vote: which option a voter currently has selected in a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub poll_id: String,
    pub voter_id: String,
    pub option_index: usize,
    pub voted_at: DateTime<Utc>,
}

impl Poll {
    /// Builds a fresh poll with every counter at zero. Inputs are expected to be validated.
    pub fn new(question: String, options: Vec<String>, allow_anonymous: bool) -> Self {
        let now = now();

        let options = options
            .into_iter()
            .map(|text| PollOption { text, votes: 0 })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            question,
            options,
            allow_anonymous,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| u64::from(o.votes)).sum()
    }
}

/// Current time truncated to what the store persists, so snapshots survive a round trip unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
