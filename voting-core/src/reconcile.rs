//! Keeps a round's required-vote threshold in step with room membership.

use tracing::info;

use crate::{VotingLedger, VotingState};

/// Snapshots a membership change produced, in the order they must be broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation<T> {
    /// No round in progress; nothing to publish.
    Inactive,
    /// The expected count changed but the round stays open.
    Updated(VotingState<T>),
    /// The new count was already satisfied and the round concluded.
    Concluded {
        updated: VotingState<T>,
        concluded: VotingState<T>,
    },
}

impl<T> Reconciliation<T> {
    pub fn into_broadcasts(self) -> Vec<VotingState<T>> {
        match self {
            Reconciliation::Inactive => Vec::new(),
            Reconciliation::Updated(state) => vec![state],
            Reconciliation::Concluded { updated, concluded } => vec![updated, concluded],
        }
    }
}

pub fn reconcile_expected_count<T: Clone>(
    ledger: &mut VotingLedger<T>,
    expected_count: usize,
) -> Reconciliation<T> {
    if !ledger.is_active() {
        return Reconciliation::Inactive;
    }

    let previous = ledger.expected_count();
    ledger.set_expected_count(expected_count);
    let ballots = ledger.ballot_count();
    info!(
        room = %ledger.room_id,
        previous,
        expected = expected_count,
        ballots,
        "expected voter count changed mid-round"
    );
    let updated = ledger.snapshot();

    // A room that shrinks around zero ballots never concludes on its own.
    if ballots == 0 || ballots < expected_count {
        return Reconciliation::Updated(updated);
    }

    info!(room = %ledger.room_id, "membership change satisfied the round");
    if ledger.finish_voting() {
        Reconciliation::Concluded {
            updated,
            concluded: ledger.snapshot(),
        }
    } else {
        Reconciliation::Updated(updated)
    }
}

/// Withdraws the departing participant's ballot before re-evaluating the
/// threshold, so the departed ballot is never counted toward completion.
pub fn reconcile_departure<T: Clone>(
    ledger: &mut VotingLedger<T>,
    participant_id: &str,
    remaining_count: usize,
) -> Reconciliation<T> {
    ledger.remove_ballot(participant_id);
    reconcile_expected_count(ledger, remaining_count)
}
