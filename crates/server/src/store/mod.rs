//! Persistence behind the HTTP surface.
//!
//! [`Store`] dispatches to an in-memory backend or to PostgreSQL. Both keep
//! the same one-vote-per-voter rule and derive tallies from the vote set.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::Config;
use crate::error::Result;
use crate::models::{
    Choice, ExportVote, HistoryEntry, NextStatement, Statement, StatementId, StatementStats,
    Submission, Tally,
};

#[derive(Debug)]
pub enum Store {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl Store {
    pub async fn from_config(config: &Config) -> Result<Self> {
        Ok(match &config.database_url {
            Some(url) => Store::Postgres(PgStore::connect(url, config.max_connections).await?),
            None => Store::Memory(MemoryStore::new()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Postgres(_) => "postgres",
        }
    }

    pub async fn health(&self) -> Result<()> {
        match self {
            Store::Memory(_) => Ok(()),
            Store::Postgres(pg) => pg.health().await,
        }
    }

    /// Registers the voter on first sight.
    pub async fn ensure_voter(&self, voter: &str) -> Result<()> {
        match self {
            Store::Memory(mem) => {
                mem.ensure_voter(voter);
                Ok(())
            }
            Store::Postgres(pg) => pg.ensure_voter(voter).await,
        }
    }

    /// Creates a statement and subscribes its author, if any.
    pub async fn create_statement(&self, author: Option<&str>, text: &str) -> Result<Statement> {
        let statement = match self {
            Store::Memory(mem) => mem.create_statement(author, text)?,
            Store::Postgres(pg) => pg.create_statement(author, text).await?,
        };
        tracing::info!(id = statement.id, author, "statement created");
        Ok(statement)
    }

    pub async fn get_statement(&self, id: StatementId) -> Result<Statement> {
        match self {
            Store::Memory(mem) => mem.get_statement(id),
            Store::Postgres(pg) => pg.get_statement(id).await,
        }
    }

    pub async fn statement_exists_with_text(&self, text: &str) -> Result<bool> {
        match self {
            Store::Memory(mem) => Ok(mem.statement_exists_with_text(text)),
            Store::Postgres(pg) => pg.statement_exists_with_text(text).await,
        }
    }

    pub async fn subscribe(&self, voter: &str, statement: StatementId) -> Result<()> {
        match self {
            Store::Memory(mem) => mem.subscribe(voter, statement)?,
            Store::Postgres(pg) => pg.subscribe(voter, statement).await?,
        }
        tracing::info!(voter, statement, "subscribed");
        Ok(())
    }

    pub async fn subscriptions(&self, voter: &str) -> Result<Vec<Statement>> {
        match self {
            Store::Memory(mem) => Ok(mem.subscriptions(voter)),
            Store::Postgres(pg) => pg.subscriptions(voter).await,
        }
    }

    pub async fn record_vote(
        &self,
        statement: StatementId,
        voter: &str,
        choice: Choice,
    ) -> Result<Tally> {
        match self {
            Store::Memory(mem) => mem.record_vote(statement, voter, choice),
            Store::Postgres(pg) => pg.record_vote(statement, voter, choice).await,
        }
    }

    pub async fn get_tally(&self, statement: StatementId) -> Result<Tally> {
        match self {
            Store::Memory(mem) => mem.get_tally(statement),
            Store::Postgres(pg) => pg.get_tally(statement).await,
        }
    }

    pub async fn current_vote(&self, statement: StatementId, voter: &str) -> Result<Option<Choice>> {
        match self {
            Store::Memory(mem) => Ok(mem.current_vote(statement, voter)),
            Store::Postgres(pg) => pg.current_vote(statement, voter).await,
        }
    }

    pub async fn next_statement(&self, voter: &str) -> Result<NextStatement> {
        match self {
            Store::Memory(mem) => Ok(mem.next_statement(voter)),
            Store::Postgres(pg) => pg.next_statement(voter).await,
        }
    }

    pub async fn vote_history(&self, voter: &str) -> Result<Vec<HistoryEntry>> {
        match self {
            Store::Memory(mem) => Ok(mem.vote_history(voter)),
            Store::Postgres(pg) => pg.vote_history(voter).await,
        }
    }

    pub async fn submissions(&self, voter: &str) -> Result<Vec<Submission>> {
        match self {
            Store::Memory(mem) => Ok(mem.submissions(voter)),
            Store::Postgres(pg) => pg.submissions(voter).await,
        }
    }

    pub async fn stats(&self) -> Result<Vec<StatementStats>> {
        match self {
            Store::Memory(mem) => Ok(mem.stats()),
            Store::Postgres(pg) => pg.stats().await,
        }
    }

    pub async fn export(&self) -> Result<Vec<ExportVote>> {
        match self {
            Store::Memory(mem) => Ok(mem.export()),
            Store::Postgres(pg) => pg.export().await,
        }
    }
}
