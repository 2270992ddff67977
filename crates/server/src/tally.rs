//! Vote tally model.
//!
//! Each voter holds at most one [`Choice`] per statement. Votes on the same
//! statement serialize on that statement's mutex, so a changed vote moves
//! exactly one count from the old bucket to the new one and no reader ever
//! sees the voter counted twice or not at all.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::error::{Entity, Error, Result};
use crate::models::{Choice, StatementId, Tally, VoterId};

/// A voter's current choice on one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastVote {
    pub statement: StatementId,
    pub voter: VoterId,
    pub choice: Choice,
    /// Book-wide cast order. Larger is more recent.
    pub seq: u64,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Ballot {
    choice: Choice,
    seq: u64,
    cast_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ballots {
    choices: HashMap<VoterId, Ballot>,
    tally: Tally,
}

impl Ballots {
    fn cast(&mut self, voter: &str, ballot: Ballot) -> Tally {
        let choice = ballot.choice;
        match self.choices.insert(voter.to_string(), ballot) {
            Some(previous) if previous.choice == choice => {}
            Some(previous) => {
                *self.tally.bucket_mut(previous.choice) -= 1;
                *self.tally.bucket_mut(choice) += 1;
            }
            None => *self.tally.bucket_mut(choice) += 1,
        }
        self.tally
    }
}

#[derive(Debug, Default)]
pub struct TallyBook {
    statements: RwLock<HashMap<StatementId, Arc<Mutex<Ballots>>>>,
    voters: RwLock<HashSet<VoterId>>,
    next_seq: AtomicU64,
}

impl TallyBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_statement(&self, id: StatementId) {
        self.statements
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default();
    }

    /// Returns true if the voter was not known before.
    pub fn register_voter(&self, id: &str) -> bool {
        self.voters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
    }

    pub fn has_voter(&self, id: &str) -> bool {
        self.voters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn has_statement(&self, id: StatementId) -> bool {
        self.statements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn ballots(&self, id: StatementId) -> Result<Arc<Mutex<Ballots>>> {
        self.statements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(Entity::Statement(id)))
    }

    /// Records `voter`'s choice on `statement`, replacing any earlier one.
    pub fn record_vote(&self, statement: StatementId, voter: &str, choice: Choice) -> Result<Tally> {
        let shared = self.ballots(statement)?;
        if !self.has_voter(voter) {
            return Err(Error::NotFound(Entity::Voter(voter.to_string())));
        }
        let mut ballots = lock(&shared);
        // taken under the statement lock so seq order matches cast order
        let ballot = Ballot {
            choice,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            cast_at: Utc::now(),
        };
        let tally = ballots.cast(voter, ballot);
        drop(ballots);
        tracing::debug!(statement, voter, %choice, ?tally, "vote recorded");
        Ok(tally)
    }

    pub fn tally(&self, statement: StatementId) -> Result<Tally> {
        let ballots = self.ballots(statement)?;
        let tally = lock(&ballots).tally;
        Ok(tally)
    }

    pub fn choice_of(&self, statement: StatementId, voter: &str) -> Option<Choice> {
        let ballots = self.ballots(statement).ok()?;
        let choice = lock(&ballots).choices.get(voter).map(|ballot| ballot.choice);
        choice
    }

    /// Every current vote, most recently cast first.
    pub fn votes(&self) -> Vec<CastVote> {
        self.collect_votes(|_| true)
    }

    /// `voter`'s current votes, most recently cast first.
    pub fn votes_of(&self, voter: &str) -> Vec<CastVote> {
        self.collect_votes(|candidate| candidate == voter)
    }

    fn collect_votes(&self, keep: impl Fn(&str) -> bool) -> Vec<CastVote> {
        let statements: Vec<(StatementId, Arc<Mutex<Ballots>>)> = self
            .statements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, ballots)| (*id, Arc::clone(ballots)))
            .collect();

        let mut votes: Vec<CastVote> = statements
            .iter()
            .flat_map(|(statement, ballots)| {
                lock(ballots)
                    .choices
                    .iter()
                    .filter(|(voter, _)| keep(voter))
                    .map(|(voter, ballot)| CastVote {
                        statement: *statement,
                        voter: voter.clone(),
                        choice: ballot.choice,
                        seq: ballot.seq,
                        cast_at: ballot.cast_at,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        votes.sort_by(|a, b| b.seq.cmp(&a.seq));
        votes
    }
}

fn lock(ballots: &Mutex<Ballots>) -> MutexGuard<'_, Ballots> {
    ballots.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn book_with(statement: StatementId, voters: &[&str]) -> TallyBook {
        let book = TallyBook::new();
        book.register_statement(statement);
        for voter in voters {
            book.register_voter(voter);
        }
        book
    }

    #[test]
    fn revote_moves_the_count() {
        let book = book_with(1, &["u1"]);
        book.record_vote(1, "u1", Choice::Agree).unwrap();
        let tally = book.record_vote(1, "u1", Choice::Disagree).unwrap();
        assert_eq!(
            tally,
            Tally {
                agree: 0,
                skip: 0,
                disagree: 1
            }
        );
    }

    #[test]
    fn identical_vote_is_a_noop() {
        let book = book_with(1, &["u1"]);
        let first = book.record_vote(1, "u1", Choice::Skip).unwrap();
        let second = book.record_vote(1, "u1", Choice::Skip).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.total(), 1);
    }

    #[test]
    fn unknown_statement_is_not_found() {
        let book = book_with(1, &["u1"]);
        assert!(matches!(
            book.record_vote(2, "u1", Choice::Agree),
            Err(Error::NotFound(Entity::Statement(2)))
        ));
        assert!(matches!(
            book.tally(2),
            Err(Error::NotFound(Entity::Statement(2)))
        ));
    }

    #[test]
    fn unknown_voter_is_not_found_and_nothing_changes() {
        let book = book_with(1, &[]);
        assert!(matches!(
            book.record_vote(1, "ghost", Choice::Agree),
            Err(Error::NotFound(Entity::Voter(_)))
        ));
        assert_eq!(book.tally(1).unwrap(), Tally::default());
    }

    #[test]
    fn tally_of_fresh_statement_is_zero() {
        let book = book_with(5, &[]);
        assert_eq!(book.tally(5).unwrap(), Tally::default());
        assert_eq!(book.choice_of(5, "u1"), None);
    }

    #[test]
    fn concurrent_voters_are_all_counted() {
        let voters: Vec<String> = (0..64).map(|i| format!("voter-{i}")).collect();
        let book = Arc::new(TallyBook::new());
        book.register_statement(1);
        for voter in &voters {
            book.register_voter(voter);
        }

        let handles: Vec<_> = voters
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, voter)| {
                let book = Arc::clone(&book);
                thread::spawn(move || {
                    // every voter cycles through all three choices
                    for round in 0..10 {
                        let choice = Choice::ALL[(i + round) % 3];
                        book.record_vote(1, &voter, choice).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let tally = book.tally(1).unwrap();
        assert_eq!(tally.total(), voters.len() as u64);
        for (i, voter) in voters.iter().enumerate() {
            assert_eq!(book.choice_of(1, voter), Some(Choice::ALL[(i + 9) % 3]));
        }
    }

    #[test]
    fn votes_are_listed_in_cast_order() {
        let book = book_with(1, &["a", "b"]);
        book.register_statement(2);
        book.record_vote(1, "a", Choice::Agree).unwrap();
        book.record_vote(2, "b", Choice::Skip).unwrap();
        book.record_vote(2, "a", Choice::Disagree).unwrap();
        book.record_vote(1, "a", Choice::Skip).unwrap();

        let order: Vec<(StatementId, String, Choice)> = book
            .votes()
            .into_iter()
            .map(|vote| (vote.statement, vote.voter, vote.choice))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "a".to_string(), Choice::Skip),
                (2, "a".to_string(), Choice::Disagree),
                (2, "b".to_string(), Choice::Skip),
            ]
        );

        let mine: Vec<StatementId> = book.votes_of("a").iter().map(|v| v.statement).collect();
        assert_eq!(mine, vec![1, 2]);
    }

    #[test]
    fn concurrent_votes_keep_cast_order_per_statement() {
        let book = Arc::new(book_with(1, &[]));
        let voters: Vec<String> = (0..32).map(|i| format!("voter-{i}")).collect();
        for voter in &voters {
            book.register_voter(voter);
        }
        let handles: Vec<_> = voters
            .iter()
            .cloned()
            .map(|voter| {
                let book = Arc::clone(&book);
                thread::spawn(move || book.record_vote(1, &voter, Choice::Agree).unwrap())
            })
            .collect();
        let counts: Vec<u64> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().agree)
            .collect();

        let votes = book.votes();
        assert_eq!(votes.len(), voters.len());
        let seqs: Vec<u64> = votes.iter().map(|v| v.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(seqs, sorted);
        // each cast saw one more agree than the one before it
        let mut counts = counts;
        counts.sort_unstable();
        assert_eq!(counts, (1..=voters.len() as u64).collect::<Vec<_>>());
    }

    fn choice_strategy() -> impl Strategy<Value = Choice> {
        prop_oneof![Just(Choice::Agree), Just(Choice::Skip), Just(Choice::Disagree)]
    }

    proptest! {
        #[test]
        fn total_always_equals_distinct_voters(
            votes in proptest::collection::vec((0usize..8, choice_strategy()), 0..64)
        ) {
            let book = TallyBook::new();
            book.register_statement(1);
            let mut seen = HashSet::new();
            for (voter, choice) in votes {
                let voter = format!("v{voter}");
                book.register_voter(&voter);
                seen.insert(voter.clone());
                let tally = book.record_vote(1, &voter, choice).unwrap();
                prop_assert_eq!(tally.total(), seen.len() as u64);
            }
        }

        #[test]
        fn changing_a_vote_moves_exactly_one_count(
            setup in proptest::collection::vec((0usize..5, choice_strategy()), 0..20),
            from in choice_strategy(),
            to in choice_strategy(),
        ) {
            prop_assume!(from != to);
            let book = TallyBook::new();
            book.register_statement(1);
            book.register_voter("target");
            for (voter, choice) in setup {
                let voter = format!("v{voter}");
                book.register_voter(&voter);
                book.record_vote(1, &voter, choice).unwrap();
            }

            let before = book.record_vote(1, "target", from).unwrap();
            let after = book.record_vote(1, "target", to).unwrap();
            prop_assert_eq!(after.get(from) + 1, before.get(from));
            prop_assert_eq!(after.get(to), before.get(to) + 1);
            prop_assert_eq!(after.total(), before.total());
        }
    }
}
