use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

mod reconcile;

pub use reconcile::{reconcile_departure, reconcile_expected_count, Reconciliation};

pub type ParticipantId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Player,
}

impl Role {
    /// Ballot weight carried by this role. Participants without a stored role weigh 1.
    pub fn weight(self) -> i64 {
        match self {
            Role::Host => 2,
            Role::Player => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome<T> {
    pub selected_index: usize,
    pub max_weight: i64,
    pub was_tie: bool,
    pub selected_option: T,
}

/// Wire snapshot of a ledger. Built fresh on every call to [`VotingLedger::snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VotingState<T> {
    pub active: bool,
    pub options: Vec<T>,
    pub ballots: BTreeMap<ParticipantId, usize>,
    pub tally: BTreeMap<usize, i64>,
    pub roles: BTreeMap<ParticipantId, Role>,
    pub expected_count: usize,
    pub outcome: Option<VoteOutcome<T>>,
    pub is_fresh_round: bool,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VotingError {
    #[error("no voting round in progress")]
    InvalidState,
    #[error("invalid voting option")]
    InvalidChoice,
    #[error("no votes cast yet, cannot settle")]
    NoVotes,
}

/// Per-room voting state machine.
///
/// Options are opaque to the ledger; it only indexes into them. Tallies are
/// signed because the weight subtracted on a re-vote is looked up at that
/// moment, so a role change between two ballots can leave an option below zero.
#[derive(Debug)]
pub struct VotingLedger<T> {
    room_id: String,
    active: bool,
    options: Vec<T>,
    ballots: BTreeMap<ParticipantId, usize>,
    tally: BTreeMap<usize, i64>,
    roles: BTreeMap<ParticipantId, Role>,
    expected_count: usize,
    outcome: Option<VoteOutcome<T>>,
    is_fresh_round: bool,
    rng: ChaCha8Rng,
}

impl<T: Clone> VotingLedger<T> {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self::with_rng(room_id.into(), ChaCha8Rng::from_entropy())
    }

    /// Ledger whose tie breaks are reproducible for a given seed.
    pub fn with_seed(room_id: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(room_id.into(), ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(room_id: String, rng: ChaCha8Rng) -> Self {
        Self {
            room_id,
            active: false,
            options: Vec::new(),
            ballots: BTreeMap::new(),
            tally: BTreeMap::new(),
            roles: BTreeMap::new(),
            expected_count: 0,
            outcome: None,
            is_fresh_round: false,
            rng,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn outcome(&self) -> Option<&VoteOutcome<T>> {
        self.outcome.as_ref()
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    pub fn ballot_count(&self) -> usize {
        self.ballots.len()
    }

    pub fn weight_of(&self, participant_id: &str) -> i64 {
        self.roles
            .get(participant_id)
            .map(|role| role.weight())
            .unwrap_or(1)
    }

    /// Opens a new round, discarding whatever round was in progress.
    pub fn start_voting(&mut self, options: Vec<T>, expected_count: usize) -> VotingState<T> {
        info!(
            room = %self.room_id,
            options = options.len(),
            expected = expected_count,
            already_active = self.active,
            "voting round started"
        );
        self.active = true;
        self.tally = (0..options.len()).map(|index| (index, 0)).collect();
        self.options = options;
        self.ballots.clear();
        self.expected_count = expected_count;
        self.outcome = None;
        self.is_fresh_round = true;
        self.snapshot()
    }

    pub fn set_role(&mut self, participant_id: impl Into<ParticipantId>, role: Role) {
        let participant_id = participant_id.into();
        debug!(room = %self.room_id, participant = %participant_id, ?role, "role set");
        self.roles.insert(participant_id, role);
    }

    pub fn vote(
        &mut self,
        participant_id: &str,
        option_index: usize,
    ) -> Result<VotingState<T>, VotingError> {
        if !self.active {
            return Err(VotingError::InvalidState);
        }
        if option_index >= self.options.len() {
            return Err(VotingError::InvalidChoice);
        }

        if let Some(previous) = self.ballots.get(participant_id).copied() {
            let weight = self.weight_of(participant_id);
            *self.tally.entry(previous).or_insert(0) -= weight;
            debug!(
                room = %self.room_id,
                participant = %participant_id,
                previous,
                weight,
                "previous ballot withdrawn"
            );
        }

        self.ballots.insert(participant_id.to_owned(), option_index);
        let weight = self.weight_of(participant_id);
        let total = self.tally.entry(option_index).or_insert(0);
        *total += weight;
        info!(
            room = %self.room_id,
            participant = %participant_id,
            option = option_index,
            weight,
            total = *total,
            progress = format_args!("{}/{}", self.ballots.len(), self.expected_count),
            "ballot cast"
        );

        self.is_fresh_round = false;

        if self.ballots.len() >= self.expected_count {
            self.finish_voting();
        }

        Ok(self.snapshot())
    }

    /// Concludes the round from the current tally. Returns whether the round
    /// actually concluded; a tally without any positive entry carries no
    /// information and leaves the round untouched.
    pub(crate) fn finish_voting(&mut self) -> bool {
        let Some(max_weight) = self.tally.values().copied().filter(|w| *w > 0).max() else {
            warn!(room = %self.room_id, tally = ?self.tally, "no effective ballots, round left open");
            return false;
        };

        let winners = self
            .tally
            .iter()
            .filter(|(_, weight)| **weight == max_weight)
            .map(|(index, _)| *index)
            .collect::<Vec<_>>();
        let Some(&selected_index) = winners.choose(&mut self.rng) else {
            return false;
        };
        let Some(selected_option) = self.options.get(selected_index).cloned() else {
            warn!(room = %self.room_id, selected_index, "tally references a missing option");
            return false;
        };

        let was_tie = winners.len() > 1;
        if was_tie {
            info!(room = %self.room_id, ?winners, selected_index, "tie broken at random");
        }

        self.outcome = Some(VoteOutcome {
            selected_index,
            max_weight,
            was_tie,
            selected_option,
        });
        self.active = false;
        info!(
            room = %self.room_id,
            selected_index,
            max_weight,
            was_tie,
            tally = ?self.tally,
            "voting round concluded"
        );
        true
    }

    /// Host escape hatch for rounds where not every expected voter will show up.
    pub fn force_finish(&mut self) -> Result<VotingState<T>, VotingError> {
        if !self.active {
            return Err(VotingError::InvalidState);
        }
        if !self.tally.values().any(|weight| *weight > 0) {
            return Err(VotingError::NoVotes);
        }
        info!(room = %self.room_id, tally = ?self.tally, "forced settlement");
        self.finish_voting();
        Ok(self.snapshot())
    }

    /// Withdraws a departing participant's ballot and forgets their role.
    /// Does not re-evaluate the conclusion threshold; see [`reconcile_departure`].
    pub fn remove_ballot(&mut self, participant_id: &str) {
        let Some(index) = self.ballots.get(participant_id).copied() else {
            return;
        };
        let weight = self.weight_of(participant_id);
        *self.tally.entry(index).or_insert(0) -= weight;
        self.ballots.remove(participant_id);
        self.roles.remove(participant_id);
        info!(
            room = %self.room_id,
            participant = %participant_id,
            option = index,
            weight,
            "ballot removed"
        );
    }

    pub(crate) fn set_expected_count(&mut self, expected_count: usize) {
        self.expected_count = expected_count;
    }

    pub fn snapshot(&self) -> VotingState<T> {
        VotingState {
            active: self.active,
            options: self.options.clone(),
            ballots: self.ballots.clone(),
            tally: self.tally.clone(),
            roles: self.roles.clone(),
            expected_count: self.expected_count,
            outcome: self.outcome.clone(),
            is_fresh_round: self.is_fresh_round,
        }
    }

    /// Clears the round. Role assignments belong to room membership and survive.
    pub fn reset_round(&mut self) {
        self.active = false;
        self.options.clear();
        self.ballots.clear();
        self.tally.clear();
        self.outcome = None;
        self.is_fresh_round = false;
        info!(room = %self.room_id, "voting round reset");
    }
}
