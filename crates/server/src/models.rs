use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub type StatementId = i64;
pub type VoterId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Statement {
    pub id: StatementId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One of the three mutually exclusive answers a voter can give a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Agree,
    Skip,
    Disagree,
}

impl Choice {
    /// Chart and tally order.
    pub const ALL: [Choice; 3] = [Choice::Agree, Choice::Skip, Choice::Disagree];

    pub fn as_str(self) -> &'static str {
        match self {
            Choice::Agree => "agree",
            Choice::Skip => "skip",
            Choice::Disagree => "disagree",
        }
    }

    /// Column encoding used by the `votes` table.
    pub fn to_db(self) -> i16 {
        match self {
            Choice::Agree => 1,
            Choice::Skip => 0,
            Choice::Disagree => -1,
        }
    }

    pub fn from_db(value: i16) -> Result<Self, Error> {
        match value {
            1 => Ok(Choice::Agree),
            0 => Ok(Choice::Skip),
            -1 => Ok(Choice::Disagree),
            other => Err(Error::InvalidChoice(other.to_string())),
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Choice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agree" => Ok(Choice::Agree),
            "skip" => Ok(Choice::Skip),
            "disagree" => Ok(Choice::Disagree),
            _ => Err(Error::InvalidChoice(s.to_string())),
        }
    }
}

/// Aggregated counts for one statement. Always derived from the current vote set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub agree: u64,
    pub skip: u64,
    pub disagree: u64,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.agree + self.skip + self.disagree
    }

    pub fn get(&self, choice: Choice) -> u64 {
        match choice {
            Choice::Agree => self.agree,
            Choice::Skip => self.skip,
            Choice::Disagree => self.disagree,
        }
    }

    pub(crate) fn bucket_mut(&mut self, choice: Choice) -> &mut u64 {
        match choice {
            Choice::Agree => &mut self.agree,
            Choice::Skip => &mut self.skip,
            Choice::Disagree => &mut self.disagree,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub voter_id: VoterId,
    pub statement_id: StatementId,
    pub created_at: DateTime<Utc>,
}

// ===== Requests / Responses =====

#[derive(Debug, Serialize, Deserialize)]
pub struct NewStatementRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteRequest {
    pub choice: String, // "agree", "skip", "disagree"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextStatement {
    pub statement: Option<Statement>,
    pub total: i64,
    pub seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementStats {
    pub statement_id: StatementId,
    pub text: String,
    pub agree: u64,
    pub skip: u64,
    pub disagree: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportVote {
    pub voter_id: VoterId,
    pub statement_id: StatementId,
    pub statement_text: String,
    pub choice: Choice,
}

/// One of the voter's own non-skip votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub statement_id: StatementId,
    pub statement_text: String,
    pub choice: Choice,
    pub voted_at: DateTime<Utc>,
}

/// A statement the voter authored, with its tally and the author's own vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub statement: Statement,
    pub tally: Tally,
    pub own_choice: Option<Choice>,
}
