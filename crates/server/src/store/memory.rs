use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::error::{Entity, Error, Result};
use crate::models::{
    Choice, ExportVote, HistoryEntry, NextStatement, Statement, StatementId, StatementStats,
    Submission, Subscription, Tally, VoterId,
};
use crate::tally::TallyBook;

#[derive(Debug, Default)]
struct Catalog {
    statements: Vec<Statement>,
    subscriptions: Vec<Subscription>,
    authors: HashMap<StatementId, VoterId>,
}

impl Catalog {
    fn statement(&self, id: StatementId) -> Option<&Statement> {
        self.statements.iter().find(|statement| statement.id == id)
    }
}

/// Process-local store. Statements, voters and subscriptions are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    book: TallyBook,
    catalog: RwLock<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_voter(&self, voter: &str) {
        if self.book.register_voter(voter) {
            tracing::info!(voter, "registered voter");
        }
    }

    pub fn create_statement(&self, author: Option<&str>, text: &str) -> Result<Statement> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyStatement);
        }
        if let Some(author) = author {
            self.require_voter(author)?;
        }

        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let statement = Statement {
            id: catalog.statements.len() as StatementId + 1,
            text: text.to_string(),
            created_at: now,
        };
        catalog.statements.push(statement.clone());
        self.book.register_statement(statement.id);

        if let Some(author) = author {
            catalog.authors.insert(statement.id, author.to_string());
            catalog.subscriptions.push(Subscription {
                voter_id: author.to_string(),
                statement_id: statement.id,
                created_at: now,
            });
        }
        Ok(statement)
    }

    pub fn get_statement(&self, id: StatementId) -> Result<Statement> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .statements
            .iter()
            .find(|statement| statement.id == id)
            .cloned()
            .ok_or(Error::NotFound(Entity::Statement(id)))
    }

    pub fn statement_exists_with_text(&self, text: &str) -> bool {
        let text = text.trim();
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .statements
            .iter()
            .any(|statement| statement.text == text)
    }

    pub fn subscribe(&self, voter: &str, statement: StatementId) -> Result<()> {
        self.require_voter(voter)?;
        self.require_statement(statement)?;

        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let exists = catalog
            .subscriptions
            .iter()
            .any(|sub| sub.voter_id == voter && sub.statement_id == statement);
        if !exists {
            catalog.subscriptions.push(Subscription {
                voter_id: voter.to_string(),
                statement_id: statement,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Newest subscription first.
    pub fn subscriptions(&self, voter: &str) -> Vec<Statement> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        catalog
            .subscriptions
            .iter()
            .rev()
            .filter(|sub| sub.voter_id == voter)
            .filter_map(|sub| {
                catalog
                    .statements
                    .iter()
                    .find(|statement| statement.id == sub.statement_id)
                    .cloned()
            })
            .collect()
    }

    pub fn record_vote(&self, statement: StatementId, voter: &str, choice: Choice) -> Result<Tally> {
        self.book.record_vote(statement, voter, choice)
    }

    pub fn get_tally(&self, statement: StatementId) -> Result<Tally> {
        self.book.tally(statement)
    }

    pub fn current_vote(&self, statement: StatementId, voter: &str) -> Option<Choice> {
        self.book.choice_of(statement, voter)
    }

    /// Oldest statement the voter has not voted on yet.
    pub fn next_statement(&self, voter: &str) -> NextStatement {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let seen = catalog
            .statements
            .iter()
            .filter(|statement| self.book.choice_of(statement.id, voter).is_some())
            .count();
        let statement = catalog
            .statements
            .iter()
            .find(|statement| self.book.choice_of(statement.id, voter).is_none())
            .cloned();

        NextStatement {
            statement,
            total: catalog.statements.len() as i64,
            seen: seen as i64,
        }
    }

    pub fn stats(&self) -> Vec<StatementStats> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<StatementStats> = catalog
            .statements
            .iter()
            .map(|statement| {
                let tally = self.book.tally(statement.id).unwrap_or_default();
                StatementStats {
                    statement_id: statement.id,
                    text: statement.text.clone(),
                    agree: tally.agree,
                    skip: tally.skip,
                    disagree: tally.disagree,
                    total: tally.total(),
                }
            })
            .collect();
        stats.sort_by(|a, b| {
            b.agree
                .cmp(&a.agree)
                .then(a.statement_id.cmp(&b.statement_id))
        });
        stats
    }

    /// Most recently cast first.
    pub fn export(&self) -> Vec<ExportVote> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        self.book
            .votes()
            .into_iter()
            .filter_map(|vote| {
                let statement = catalog.statement(vote.statement)?;
                Some(ExportVote {
                    voter_id: vote.voter,
                    statement_id: vote.statement,
                    statement_text: statement.text.clone(),
                    choice: vote.choice,
                })
            })
            .collect()
    }

    /// The voter's agree and disagree votes, most recent first.
    pub fn vote_history(&self, voter: &str) -> Vec<HistoryEntry> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        self.book
            .votes_of(voter)
            .into_iter()
            .filter(|vote| vote.choice != Choice::Skip)
            .filter_map(|vote| {
                let statement = catalog.statement(vote.statement)?;
                Some(HistoryEntry {
                    statement_id: vote.statement,
                    statement_text: statement.text.clone(),
                    choice: vote.choice,
                    voted_at: vote.cast_at,
                })
            })
            .collect()
    }

    /// Statements authored by the voter, newest first.
    pub fn submissions(&self, voter: &str) -> Vec<Submission> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        catalog
            .statements
            .iter()
            .rev()
            .filter(|statement| {
                catalog
                    .authors
                    .get(&statement.id)
                    .is_some_and(|author| author == voter)
            })
            .map(|statement| Submission {
                statement: statement.clone(),
                tally: self.book.tally(statement.id).unwrap_or_default(),
                own_choice: self.book.choice_of(statement.id, voter),
            })
            .collect()
    }

    fn require_voter(&self, voter: &str) -> Result<()> {
        if self.book.has_voter(voter) {
            Ok(())
        } else {
            Err(Error::NotFound(Entity::Voter(voter.to_string())))
        }
    }

    fn require_statement(&self, statement: StatementId) -> Result<()> {
        if self.book.has_statement(statement) {
            Ok(())
        } else {
            Err(Error::NotFound(Entity::Statement(statement)))
        }
    }
}
