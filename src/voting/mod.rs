use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Poll;

/// Display-ready tallies for one poll snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: String,
    pub question: String,
    pub total_votes: u64,
    pub options: Vec<OptionResult>,
    /// Indices of the option(s) with the most votes; empty while nobody has voted.
    pub leaders: Vec<usize>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionResult {
    pub index: usize,
    pub text: String,
    pub votes: u32,
    /// Share of all votes, rounded to one decimal place.
    pub percentage: f64,
}

pub fn calculate_results(poll: &Poll) -> PollResults {
    let total_votes = poll.total_votes();

    let options = poll
        .options
        .iter()
        .enumerate()
        .map(|(index, option)| OptionResult {
            index,
            text: option.text.clone(),
            votes: option.votes,
            percentage: percentage(option.votes, total_votes),
        })
        .collect();

    let top = poll.options.iter().map(|o| o.votes).max().unwrap_or(0);
    let leaders = if total_votes == 0 {
        Vec::new()
    } else {
        poll.options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.votes == top)
            .map(|(index, _)| index)
            .collect()
    };

    PollResults {
        poll_id: poll.id.clone(),
        question: poll.question.clone(),
        total_votes,
        options,
        leaders,
        updated_at: poll.updated_at,
    }
}

fn percentage(votes: u32, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (f64::from(votes) * 1000.0 / total as f64).round() / 10.0
}
