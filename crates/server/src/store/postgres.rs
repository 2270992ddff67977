use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, postgres::PgPoolOptions};

use crate::error::{Entity, Error, Result};
use crate::models::{
    Choice, ExportVote, HistoryEntry, NextStatement, Statement, StatementId, StatementStats,
    Submission, Tally,
};

#[derive(sqlx::FromRow)]
struct TallyRow {
    agree: i64,
    skip: i64,
    disagree: i64,
}

impl From<TallyRow> for Tally {
    fn from(row: TallyRow) -> Self {
        Tally {
            agree: count(row.agree),
            skip: count(row.skip),
            disagree: count(row.disagree),
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    statement_id: i64,
    text: String,
    agree: i64,
    skip: i64,
    disagree: i64,
}

#[derive(sqlx::FromRow)]
struct ExportRow {
    voter_id: String,
    statement_id: i64,
    statement_text: String,
    choice: i16,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    statement_id: i64,
    statement_text: String,
    choice: i16,
    voted_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    text: String,
    created_at: DateTime<Utc>,
    agree: i64,
    skip: i64,
    disagree: i64,
    own_choice: Option<i16>,
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .map_err(sqlx::Error::from)?;

        Ok(Self::from_pool(db))
    }

    /// Wraps a pool whose schema is already migrated.
    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn health(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    pub async fn ensure_voter(&self, voter: &str) -> Result<()> {
        let inserted = sqlx::query("INSERT INTO voters (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(voter)
            .execute(&self.db)
            .await?
            .rows_affected();
        if inserted > 0 {
            tracing::info!(voter, "registered voter");
        }
        Ok(())
    }

    pub async fn create_statement(&self, author: Option<&str>, text: &str) -> Result<Statement> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyStatement);
        }

        let mut tx = self.db.begin().await?;
        if let Some(author) = author {
            require_voter(&mut tx, author).await?;
        }

        let statement: Statement = sqlx::query_as(
            "INSERT INTO statements (text, author_id) VALUES ($1, $2)
             RETURNING id, text, created_at",
        )
        .bind(text)
        .bind(author)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(author) = author {
            sqlx::query(
                "INSERT INTO subscriptions (voter_id, statement_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(author)
            .bind(statement.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(statement)
    }

    pub async fn get_statement(&self, id: StatementId) -> Result<Statement> {
        sqlx::query_as("SELECT id, text, created_at FROM statements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(Error::NotFound(Entity::Statement(id)))
    }

    pub async fn statement_exists_with_text(&self, text: &str) -> Result<bool> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM statements WHERE text = $1)")
                .bind(text.trim())
                .fetch_one(&self.db)
                .await?,
        )
    }

    pub async fn subscribe(&self, voter: &str, statement: StatementId) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        require_voter(&mut conn, voter).await?;
        require_statement(&mut conn, statement).await?;

        sqlx::query(
            "INSERT INTO subscriptions (voter_id, statement_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(voter)
        .bind(statement)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn subscriptions(&self, voter: &str) -> Result<Vec<Statement>> {
        Ok(sqlx::query_as(
            "SELECT s.id, s.text, s.created_at FROM subscriptions sub
             JOIN statements s ON s.id = sub.statement_id
             WHERE sub.voter_id = $1
             ORDER BY sub.id DESC",
        )
        .bind(voter)
        .fetch_all(&self.db)
        .await?)
    }

    /// The statement row lock serializes concurrent votes on one statement.
    pub async fn record_vote(
        &self,
        statement: StatementId,
        voter: &str,
        choice: Choice,
    ) -> Result<Tally> {
        let mut tx = self.db.begin().await?;

        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM statements WHERE id = $1 FOR UPDATE")
                .bind(statement)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(Error::NotFound(Entity::Statement(statement)));
        }
        require_voter(&mut tx, voter).await?;

        sqlx::query(
            "INSERT INTO votes (statement_id, voter_id, choice)
             VALUES ($1, $2, $3)
             ON CONFLICT (statement_id, voter_id)
             DO UPDATE SET choice = $3, updated_at = NOW()",
        )
        .bind(statement)
        .bind(voter)
        .bind(choice.to_db())
        .execute(&mut *tx)
        .await?;

        let tally = tally_of(&mut tx, statement).await?;
        tx.commit().await?;

        tracing::debug!(statement, voter, %choice, ?tally, "vote recorded");
        Ok(tally)
    }

    pub async fn get_tally(&self, statement: StatementId) -> Result<Tally> {
        let mut conn = self.db.acquire().await?;
        require_statement(&mut conn, statement).await?;
        tally_of(&mut conn, statement).await
    }

    pub async fn current_vote(&self, statement: StatementId, voter: &str) -> Result<Option<Choice>> {
        let choice: Option<i16> =
            sqlx::query_scalar("SELECT choice FROM votes WHERE statement_id = $1 AND voter_id = $2")
                .bind(statement)
                .bind(voter)
                .fetch_optional(&self.db)
                .await?;
        choice.map(Choice::from_db).transpose()
    }

    pub async fn next_statement(&self, voter: &str) -> Result<NextStatement> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM statements")
            .fetch_one(&self.db)
            .await?;

        let seen: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE voter_id = $1")
            .bind(voter)
            .fetch_one(&self.db)
            .await?;

        let statement: Option<Statement> = sqlx::query_as(
            "SELECT id, text, created_at FROM statements s
             WHERE NOT EXISTS (
                 SELECT 1 FROM votes v WHERE v.statement_id = s.id AND v.voter_id = $1
             )
             ORDER BY s.created_at, s.id
             LIMIT 1",
        )
        .bind(voter)
        .fetch_optional(&self.db)
        .await?;

        Ok(NextStatement {
            statement,
            total,
            seen,
        })
    }

    pub async fn vote_history(&self, voter: &str) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT v.statement_id, s.text AS statement_text, v.choice, v.updated_at AS voted_at
             FROM votes v
             JOIN statements s ON s.id = v.statement_id
             WHERE v.voter_id = $1 AND v.choice <> 0
             ORDER BY v.updated_at DESC, v.statement_id DESC",
        )
        .bind(voter)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEntry {
                    statement_id: row.statement_id,
                    statement_text: row.statement_text,
                    choice: Choice::from_db(row.choice)?,
                    voted_at: row.voted_at,
                })
            })
            .collect()
    }

    pub async fn submissions(&self, voter: &str) -> Result<Vec<Submission>> {
        let rows: Vec<SubmissionRow> = sqlx::query_as(
            "SELECT
                s.id,
                s.text,
                s.created_at,
                COUNT(v.choice) FILTER (WHERE v.choice = 1) AS agree,
                COUNT(v.choice) FILTER (WHERE v.choice = 0) AS skip,
                COUNT(v.choice) FILTER (WHERE v.choice = -1) AS disagree,
                own.choice AS own_choice
             FROM statements s
             LEFT JOIN votes v ON v.statement_id = s.id
             LEFT JOIN votes own ON own.statement_id = s.id AND own.voter_id = $1
             WHERE s.author_id = $1
             GROUP BY s.id, s.text, s.created_at, own.choice
             ORDER BY s.created_at DESC, s.id DESC",
        )
        .bind(voter)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Submission {
                    statement: Statement {
                        id: row.id,
                        text: row.text,
                        created_at: row.created_at,
                    },
                    tally: Tally {
                        agree: count(row.agree),
                        skip: count(row.skip),
                        disagree: count(row.disagree),
                    },
                    own_choice: row.own_choice.map(Choice::from_db).transpose()?,
                })
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<Vec<StatementStats>> {
        let rows: Vec<StatsRow> = sqlx::query_as(
            "SELECT
                s.id AS statement_id,
                s.text,
                COUNT(v.choice) FILTER (WHERE v.choice = 1) AS agree,
                COUNT(v.choice) FILTER (WHERE v.choice = 0) AS skip,
                COUNT(v.choice) FILTER (WHERE v.choice = -1) AS disagree
             FROM statements s
             LEFT JOIN votes v ON v.statement_id = s.id
             GROUP BY s.id, s.text
             ORDER BY agree DESC, s.id ASC",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let (agree, skip, disagree) = (count(row.agree), count(row.skip), count(row.disagree));
                StatementStats {
                    statement_id: row.statement_id,
                    text: row.text,
                    agree,
                    skip,
                    disagree,
                    total: agree + skip + disagree,
                }
            })
            .collect())
    }

    pub async fn export(&self) -> Result<Vec<ExportVote>> {
        let rows: Vec<ExportRow> = sqlx::query_as(
            "SELECT v.voter_id, v.statement_id, s.text AS statement_text, v.choice
             FROM votes v
             JOIN statements s ON s.id = v.statement_id
             ORDER BY v.updated_at DESC, v.statement_id DESC, v.voter_id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ExportVote {
                    voter_id: row.voter_id,
                    statement_id: row.statement_id,
                    statement_text: row.statement_text,
                    choice: Choice::from_db(row.choice)?,
                })
            })
            .collect()
    }
}

async fn require_voter(conn: &mut PgConnection, voter: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM voters WHERE id = $1)")
        .bind(voter)
        .fetch_one(&mut *conn)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(Error::NotFound(Entity::Voter(voter.to_string())))
    }
}

async fn require_statement(conn: &mut PgConnection, statement: StatementId) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM statements WHERE id = $1)")
        .bind(statement)
        .fetch_one(&mut *conn)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(Error::NotFound(Entity::Statement(statement)))
    }
}

async fn tally_of(conn: &mut PgConnection, statement: StatementId) -> Result<Tally> {
    let row: TallyRow = sqlx::query_as(
        "SELECT
            COUNT(*) FILTER (WHERE choice = 1) AS agree,
            COUNT(*) FILTER (WHERE choice = 0) AS skip,
            COUNT(*) FILTER (WHERE choice = -1) AS disagree
         FROM votes WHERE statement_id = $1",
    )
    .bind(statement)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.into())
}

// Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_voters(db: PgPool, voters: &[&str]) -> PgStore {
        let store = PgStore::from_pool(db);
        for voter in voters {
            store.ensure_voter(voter).await.unwrap();
        }
        store
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn revote_moves_exactly_one_count(db: PgPool) {
        let store = store_with_voters(db, &["u1", "u2"]).await;
        let s = store.create_statement(Some("u1"), "The earth is flat.").await.unwrap();

        store.record_vote(s.id, "u1", Choice::Agree).await.unwrap();
        store.record_vote(s.id, "u2", Choice::Disagree).await.unwrap();
        let tally = store.record_vote(s.id, "u1", Choice::Skip).await.unwrap();
        assert_eq!(
            tally,
            Tally {
                agree: 0,
                skip: 1,
                disagree: 1
            }
        );

        let again = store.record_vote(s.id, "u1", Choice::Skip).await.unwrap();
        assert_eq!(again, tally);
        assert_eq!(store.get_tally(s.id).await.unwrap(), tally);
        assert_eq!(
            store.current_vote(s.id, "u1").await.unwrap(),
            Some(Choice::Skip)
        );

        let stats = store.stats().await.unwrap();
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].disagree, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn unknown_statement_and_voter_are_not_found(db: PgPool) {
        let store = store_with_voters(db, &["u1"]).await;
        assert!(matches!(
            store.record_vote(99, "u1", Choice::Agree).await,
            Err(Error::NotFound(Entity::Statement(99)))
        ));

        let s = store.create_statement(None, "seeded").await.unwrap();
        assert!(matches!(
            store.record_vote(s.id, "ghost", Choice::Agree).await,
            Err(Error::NotFound(Entity::Voter(_)))
        ));
        assert_eq!(store.get_tally(s.id).await.unwrap(), Tally::default());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_voters_are_all_counted(db: PgPool) {
        let voters: Vec<String> = (0..16).map(|i| format!("voter-{i}")).collect();
        let names: Vec<&str> = voters.iter().map(String::as_str).collect();
        let store = store_with_voters(db, &names).await;
        let id = store.create_statement(None, "Tabs over spaces.").await.unwrap().id;

        let handles: Vec<_> = voters
            .iter()
            .cloned()
            .map(|voter| {
                let store = store.clone();
                tokio::spawn(async move { store.record_vote(id, &voter, Choice::Agree).await })
            })
            .collect();

        let mut totals = Vec::new();
        for handle in handles {
            totals.push(handle.await.unwrap().unwrap().total());
        }
        totals.sort_unstable();

        // the row lock serializes the votes, so each one saw the ones before it
        assert_eq!(totals, (1..=voters.len() as u64).collect::<Vec<_>>());
        assert_eq!(
            store.get_tally(id).await.unwrap().agree,
            voters.len() as u64
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn subscriptions_come_back_newest_first(db: PgPool) {
        let store = store_with_voters(db, &["alice", "bob"]).await;
        let older = store.create_statement(Some("alice"), "Old news.").await.unwrap();
        let own = store.create_statement(Some("bob"), "Bob's own.").await.unwrap();
        let newer = store.create_statement(Some("alice"), "Fresh.").await.unwrap();

        store.subscribe("bob", older.id).await.unwrap();
        store.subscribe("bob", newer.id).await.unwrap();
        store.subscribe("bob", older.id).await.unwrap();

        let ids: Vec<StatementId> = store
            .subscriptions("bob")
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id, own.id]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn next_statement_skips_voted_ones(db: PgPool) {
        let store = store_with_voters(db, &["alice"]).await;
        let first = store.create_statement(None, "one").await.unwrap();
        let second = store.create_statement(None, "two").await.unwrap();

        let next = store.next_statement("alice").await.unwrap();
        assert_eq!(next.statement.map(|s| s.id), Some(first.id));
        assert_eq!((next.total, next.seen), (2, 0));

        store.record_vote(first.id, "alice", Choice::Skip).await.unwrap();
        let next = store.next_statement("alice").await.unwrap();
        assert_eq!(next.statement.map(|s| s.id), Some(second.id));
        assert_eq!(next.seen, 1);

        store.record_vote(second.id, "alice", Choice::Agree).await.unwrap();
        let next = store.next_statement("alice").await.unwrap();
        assert_eq!(next.statement, None);
        assert_eq!(next.seen, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn history_submissions_and_export(db: PgPool) {
        let store = store_with_voters(db, &["alice", "bob"]).await;
        let mine = store.create_statement(Some("alice"), "Mine.").await.unwrap();
        let theirs = store.create_statement(Some("bob"), "Theirs.").await.unwrap();

        store.record_vote(mine.id, "alice", Choice::Agree).await.unwrap();
        store.record_vote(theirs.id, "alice", Choice::Skip).await.unwrap();
        store.record_vote(mine.id, "bob", Choice::Disagree).await.unwrap();
        store.record_vote(theirs.id, "alice", Choice::Disagree).await.unwrap();

        let history: Vec<(StatementId, Choice)> = store
            .vote_history("alice")
            .await
            .unwrap()
            .iter()
            .map(|e| (e.statement_id, e.choice))
            .collect();
        assert_eq!(
            history,
            vec![(theirs.id, Choice::Disagree), (mine.id, Choice::Agree)]
        );

        let submissions = store.submissions("alice").await.unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].statement.id, mine.id);
        assert_eq!(submissions[0].own_choice, Some(Choice::Agree));
        assert_eq!(
            submissions[0].tally,
            Tally {
                agree: 1,
                skip: 0,
                disagree: 1
            }
        );

        let export = store.export().await.unwrap();
        assert_eq!(export.len(), 3);
        assert_eq!(export[0].voter_id, "alice");
        assert_eq!(export[0].statement_id, theirs.id);
        assert_eq!(export[0].choice, Choice::Disagree);
    }
}
