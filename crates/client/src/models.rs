use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct NextStatement {
    pub statement: Option<Statement>,
    pub total: i64,
    pub seen: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Tally {
    pub agree: u64,
    pub skip: u64,
    pub disagree: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatementStats {
    pub statement_id: i64,
    pub text: String,
    pub agree: u64,
    pub skip: u64,
    pub disagree: u64,
    pub total: u64,
}

impl StatementStats {
    pub fn tally(&self) -> Tally {
        Tally {
            agree: self.agree,
            skip: self.skip,
            disagree: self.disagree,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoteRequest<'a> {
    pub choice: &'a str,
}

#[derive(Debug, Serialize)]
pub struct NewStatementRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub access_token: Option<String>,
    pub error: Option<String>,
}
