use std::iter;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use voting_core::{
    reconcile_departure, reconcile_expected_count, Reconciliation, Role, VotingError,
    VotingLedger, VotingState,
};

use crate::gateway::{broadcast, Connection, ConnectionId};
use crate::protocol::ServerMessage;
use crate::registry::RoomRegistry;

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        connection: Connection,
        player_id: Option<String>,
    },
    StartVoting {
        connection: Connection,
        host_id: Option<String>,
        missions: Vec<Value>,
    },
    SubmitVote {
        connection: Connection,
        player_id: String,
        mission_index: i64,
    },
    ManualSettle {
        connection: Connection,
    },
    UpdateState {
        connection: Connection,
        state: Value,
        history: Vec<Value>,
    },
    SyncVote {
        vote_data: Value,
        sender_id: Option<Value>,
    },
    SyncVotingResult {
        result_data: Value,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found or you are not the host")]
    NotHost,
    #[error("room is full")]
    RoomFull,
    #[error(transparent)]
    Voting(#[from] VotingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomFlow {
    Continue,
    Closed,
}

#[derive(Debug)]
struct Participant {
    connection: Connection,
    player_id: String,
}

/// Everything one room owns. Only its actor task touches it, so each command
/// runs to completion before the next one is looked at.
#[derive(Debug)]
pub struct Room {
    id: String,
    host: Connection,
    participants: Vec<Participant>,
    game_state: Value,
    history: Vec<Value>,
    ledger: VotingLedger<Value>,
    vote_data: Option<Value>,
    max_players: usize,
}

impl Room {
    pub fn new(
        id: String,
        host: Connection,
        host_id: Option<String>,
        mut ledger: VotingLedger<Value>,
        max_players: usize,
    ) -> Self {
        if let Some(host_id) = host_id {
            ledger.set_role(host_id, Role::Host);
        }
        Self {
            id,
            host,
            participants: Vec::new(),
            game_state: Value::Object(Map::new()),
            history: Vec::new(),
            ledger,
            vote_data: None,
            max_players,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&mut self, command: RoomCommand) -> RoomFlow {
        let (requester, result) = match command {
            RoomCommand::Join {
                connection,
                player_id,
            } => {
                let result = self.join(connection.clone(), player_id);
                (connection, result)
            }
            RoomCommand::StartVoting {
                connection,
                host_id,
                missions,
            } => {
                let result = self.start_voting(&connection, host_id, missions);
                (connection, result)
            }
            RoomCommand::SubmitVote {
                connection,
                player_id,
                mission_index,
            } => {
                let result = self.submit_vote(&player_id, mission_index);
                (connection, result)
            }
            RoomCommand::ManualSettle { connection } => {
                let result = self.manual_settle(&connection);
                (connection, result)
            }
            RoomCommand::UpdateState {
                connection,
                state,
                history,
            } => {
                let result = self.update_state(&connection, state, history);
                (connection, result)
            }
            RoomCommand::SyncVote {
                vote_data,
                sender_id,
            } => {
                self.sync_vote(vote_data, sender_id);
                return RoomFlow::Continue;
            }
            RoomCommand::SyncVotingResult { result_data } => {
                self.sync_voting_result(result_data);
                return RoomFlow::Continue;
            }
            RoomCommand::Disconnect { connection_id } => return self.disconnect(connection_id),
        };

        if let Err(err) = result {
            warn!(room = %self.id, conn = %requester.id(), %err, "request rejected");
            requester.send(&ServerMessage::error(err.to_string()));
        }
        RoomFlow::Continue
    }

    fn is_host(&self, connection: &Connection) -> bool {
        self.host.id() == connection.id()
    }

    fn occupant_count(&self) -> usize {
        self.participants.len() + 1
    }

    fn recipients(&self) -> impl Iterator<Item = &Connection> {
        iter::once(&self.host).chain(self.participants.iter().map(|p| &p.connection))
    }

    fn broadcast(&self, message: &ServerMessage) {
        broadcast(self.recipients(), message);
    }

    fn broadcast_voting(&self, voting_state: VotingState<Value>) {
        self.broadcast(&ServerMessage::VotingStateSync { voting_state });
    }

    fn broadcast_reconciliation(&self, reconciliation: Reconciliation<Value>) {
        for voting_state in reconciliation.into_broadcasts() {
            self.broadcast_voting(voting_state);
        }
    }

    fn has_game_state(&self) -> bool {
        match &self.game_state {
            Value::Null => false,
            Value::Object(fields) => !fields.is_empty(),
            _ => true,
        }
    }

    fn join(&mut self, connection: Connection, player_id: Option<String>) -> Result<(), RoomError> {
        if self.participants.len() >= self.max_players {
            return Err(RoomError::RoomFull);
        }

        let player_id = player_id.unwrap_or_else(generate_player_id);
        self.ledger.set_role(player_id.clone(), Role::Player);
        connection.send(&ServerMessage::RoomJoined {
            room_id: self.id.clone(),
            player_id: player_id.clone(),
        });

        if self.has_game_state() {
            connection.send(&ServerMessage::StateUpdated {
                state: self.game_state.clone(),
                history: self.history.clone(),
            });
        }
        if self.ledger.is_active() || self.ledger.outcome().is_some() {
            connection.send(&ServerMessage::VotingStateSync {
                voting_state: self.ledger.snapshot(),
            });
        }

        info!(room = %self.id, player = %player_id, "player joined");
        self.participants.push(Participant {
            connection,
            player_id,
        });

        let count = self.occupant_count();
        self.broadcast(&ServerMessage::PlayerCount { count });
        let reconciliation = reconcile_expected_count(&mut self.ledger, count);
        self.broadcast_reconciliation(reconciliation);
        Ok(())
    }

    fn start_voting(
        &mut self,
        connection: &Connection,
        host_id: Option<String>,
        missions: Vec<Value>,
    ) -> Result<(), RoomError> {
        if !self.is_host(connection) {
            return Err(RoomError::NotHost);
        }
        if let Some(host_id) = host_id {
            self.ledger.set_role(host_id, Role::Host);
        }
        let state = self.ledger.start_voting(missions, self.occupant_count());
        self.broadcast_voting(state);
        Ok(())
    }

    fn submit_vote(&mut self, player_id: &str, mission_index: i64) -> Result<(), RoomError> {
        // Negative indices fall out of range and are rejected by the ledger.
        let index = usize::try_from(mission_index).unwrap_or(usize::MAX);
        let state = self.ledger.vote(player_id, index)?;
        self.broadcast_voting(state);
        Ok(())
    }

    fn manual_settle(&mut self, connection: &Connection) -> Result<(), RoomError> {
        if !self.is_host(connection) {
            return Err(RoomError::NotHost);
        }
        let state = self.ledger.force_finish()?;
        self.broadcast_voting(state);
        Ok(())
    }

    fn update_state(
        &mut self,
        connection: &Connection,
        state: Value,
        history: Vec<Value>,
    ) -> Result<(), RoomError> {
        if !self.is_host(connection) {
            return Err(RoomError::NotHost);
        }
        self.game_state = state;
        self.history = history;
        let message = ServerMessage::StateUpdated {
            state: self.game_state.clone(),
            history: self.history.clone(),
        };
        broadcast(self.participants.iter().map(|p| &p.connection), &message);
        Ok(())
    }

    fn sync_vote(&mut self, vote_data: Value, sender_id: Option<Value>) {
        self.vote_data = Some(vote_data.clone());
        self.broadcast(&ServerMessage::SyncVote {
            vote_data,
            sender_id,
        });
    }

    fn sync_voting_result(&mut self, result_data: Value) {
        self.vote_data = None;
        self.broadcast(&ServerMessage::SyncVotingResult { result_data });
    }

    fn disconnect(&mut self, connection_id: ConnectionId) -> RoomFlow {
        if self.host.id() == connection_id {
            info!(room = %self.id, "host disconnected, closing room");
            broadcast(
                self.participants.iter().map(|p| &p.connection),
                &ServerMessage::RoomClosed,
            );
            return RoomFlow::Closed;
        }

        let (leaving, staying) = std::mem::take(&mut self.participants)
            .into_iter()
            .partition::<Vec<_>, _>(|p| p.connection.id() == connection_id);
        self.participants = staying;
        if leaving.is_empty() {
            return RoomFlow::Continue;
        }

        let count = self.occupant_count();
        let mut voting_states = Vec::new();
        for participant in &leaving {
            info!(room = %self.id, player = %participant.player_id, "player left");
            voting_states.extend(
                reconcile_departure(&mut self.ledger, &participant.player_id, count)
                    .into_broadcasts(),
            );
        }
        self.broadcast(&ServerMessage::PlayerCount { count });
        for voting_state in voting_states {
            self.broadcast_voting(voting_state);
        }
        RoomFlow::Continue
    }
}

fn generate_player_id() -> String {
    let suffix = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect::<String>();
    format!("player_{suffix}")
}

/// Drives one room until its host leaves or every command sender is gone.
pub async fn run_room(
    mut room: Room,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    registry: RoomRegistry,
) {
    while let Some(command) = commands.recv().await {
        if room.handle(command) == RoomFlow::Closed {
            break;
        }
    }
    registry.remove(room.id()).await;
    info!(room = %room.id(), "room task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        connection: Connection,
        rx: UnboundedReceiver<String>,
    }

    impl Client {
        fn new() -> Self {
            let (connection, rx) = Connection::open();
            Self { connection, rx }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(text) = self.rx.try_recv() {
                out.push(serde_json::from_str(&text).unwrap());
            }
            out
        }
    }

    fn room_with_host(max_players: usize) -> (Room, Client) {
        let host = Client::new();
        let room = Room::new(
            "ROOM01".into(),
            host.connection.clone(),
            Some("host".into()),
            VotingLedger::with_seed("ROOM01", 3),
            max_players,
        );
        (room, host)
    }

    fn join(room: &mut Room, player_id: &str) -> Client {
        let client = Client::new();
        room.handle(RoomCommand::Join {
            connection: client.connection.clone(),
            player_id: Some(player_id.into()),
        });
        client
    }

    fn voting_syncs(messages: &[Value]) -> Vec<&Value> {
        messages
            .iter()
            .filter(|m| m["type"] == "votingStateSync")
            .map(|m| &m["votingState"])
            .collect()
    }

    fn start(room: &mut Room, host: &Client) {
        room.handle(RoomCommand::StartVoting {
            connection: host.connection.clone(),
            host_id: Some("host".into()),
            missions: vec![json!("A"), json!("B"), json!("C")],
        });
    }

    fn vote(room: &mut Room, client: &Client, player_id: &str, index: i64) {
        room.handle(RoomCommand::SubmitVote {
            connection: client.connection.clone(),
            player_id: player_id.into(),
            mission_index: index,
        });
    }

    #[test]
    fn join_replies_and_announces_count() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");

        let p1_msgs = p1.drain();
        assert_eq!(p1_msgs[0], json!({ "type": "roomJoined", "roomId": "ROOM01", "playerId": "p1" }));
        assert_eq!(p1_msgs[1], json!({ "type": "playerCount", "count": 2 }));
        assert_eq!(host.drain(), vec![json!({ "type": "playerCount", "count": 2 })]);
    }

    #[test]
    fn join_generates_player_id_when_missing() {
        let (mut room, _host) = room_with_host(6);
        let mut client = Client::new();
        room.handle(RoomCommand::Join {
            connection: client.connection.clone(),
            player_id: None,
        });

        let joined = &client.drain()[0];
        let player_id = joined["playerId"].as_str().unwrap();
        assert!(player_id.starts_with("player_"));
        assert_eq!(player_id.len(), "player_".len() + 9);
    }

    #[test]
    fn full_room_rejects_join() {
        let (mut room, _host) = room_with_host(1);
        let _p1 = join(&mut room, "p1");
        let mut p2 = join(&mut room, "p2");

        assert_eq!(p2.drain(), vec![json!({ "type": "error", "message": "room is full" })]);
        assert_eq!(room.occupant_count(), 2);
    }

    #[test]
    fn late_joiner_receives_state_and_vote() {
        let (mut room, host) = room_with_host(6);
        room.handle(RoomCommand::UpdateState {
            connection: host.connection.clone(),
            state: json!({ "round": 3 }),
            history: vec![json!("went left")],
        });
        start(&mut room, &host);

        let mut p1 = join(&mut room, "p1");
        let msgs = p1.drain();
        let types = msgs.iter().map(|m| m["type"].as_str().unwrap()).collect::<Vec<_>>();
        assert_eq!(
            types,
            vec!["roomJoined", "stateUpdated", "votingStateSync", "playerCount", "votingStateSync"]
        );
        assert_eq!(msgs[1]["state"], json!({ "round": 3 }));
        assert_eq!(msgs[2]["votingState"]["expectedCount"], 1);
        assert_eq!(msgs[4]["votingState"]["expectedCount"], 2);
    }

    #[test]
    fn weighted_round_concludes_and_reaches_everyone() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        start(&mut room, &host);
        vote(&mut room, &host, "host", 0);
        vote(&mut room, &p1, "p1", 1);

        let host_msgs = host.drain();
        let p1_msgs = p1.drain();
        let host_syncs = voting_syncs(&host_msgs);
        assert_eq!(host_syncs, voting_syncs(&p1_msgs));
        assert_eq!(host_syncs.len(), 3);
        assert_eq!(host_syncs[0]["isFreshRound"], true);
        let last = host_syncs[2];
        assert_eq!(last["active"], false);
        assert_eq!(last["tally"], json!({ "0": 2, "1": 1, "2": 0 }));
        assert_eq!(
            last["outcome"],
            json!({ "selectedIndex": 0, "maxWeight": 2, "wasTie": false, "selectedOption": "A" })
        );
    }

    #[test]
    fn voting_errors_go_to_requester_only() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        host.drain();
        p1.drain();

        vote(&mut room, &p1, "p1", 0);
        assert_eq!(
            p1.drain(),
            vec![json!({ "type": "error", "message": "no voting round in progress" })]
        );

        start(&mut room, &host);
        host.drain();
        p1.drain();
        vote(&mut room, &p1, "p1", -1);
        vote(&mut room, &p1, "p1", 3);
        let errors = p1.drain();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|m| m["message"] == "invalid voting option"));
        assert!(host.drain().is_empty());
    }

    #[test]
    fn host_only_operations_reject_players() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        host.drain();
        p1.drain();

        room.handle(RoomCommand::StartVoting {
            connection: p1.connection.clone(),
            host_id: None,
            missions: vec![json!("A")],
        });
        room.handle(RoomCommand::ManualSettle {
            connection: p1.connection.clone(),
        });
        room.handle(RoomCommand::UpdateState {
            connection: p1.connection.clone(),
            state: json!({ "hijack": true }),
            history: Vec::new(),
        });

        let errors = p1.drain();
        assert_eq!(errors.len(), 3);
        assert!(errors
            .iter()
            .all(|m| m["message"] == "room not found or you are not the host"));
        assert!(host.drain().is_empty());
        assert!(!room.has_game_state());
    }

    #[test]
    fn manual_settle_needs_a_ballot() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        let _p2 = join(&mut room, "p2");
        start(&mut room, &host);
        host.drain();
        p1.drain();

        room.handle(RoomCommand::ManualSettle {
            connection: host.connection.clone(),
        });
        assert_eq!(
            host.drain(),
            vec![json!({ "type": "error", "message": "no votes cast yet, cannot settle" })]
        );

        vote(&mut room, &p1, "p1", 2);
        room.handle(RoomCommand::ManualSettle {
            connection: host.connection.clone(),
        });
        let msgs = p1.drain();
        let syncs = voting_syncs(&msgs);
        assert_eq!(syncs.len(), 2);
        assert_eq!(syncs[1]["outcome"]["selectedOption"], "C");
    }

    #[test]
    fn departure_of_holdout_concludes_round() {
        let (mut room, mut host) = room_with_host(6);
        let p1 = join(&mut room, "p1");
        let p2 = join(&mut room, "p2");
        start(&mut room, &host);
        vote(&mut room, &host, "host", 1);
        vote(&mut room, &p1, "p1", 0);
        host.drain();

        room.handle(RoomCommand::Disconnect {
            connection_id: p2.connection.id(),
        });

        let msgs = host.drain();
        assert_eq!(msgs[0], json!({ "type": "playerCount", "count": 2 }));
        let syncs = voting_syncs(&msgs);
        assert_eq!(syncs.len(), 2);
        assert_eq!(syncs[0]["active"], true);
        assert_eq!(syncs[0]["expectedCount"], 2);
        assert_eq!(syncs[1]["active"], false);
        assert_eq!(syncs[1]["outcome"]["selectedIndex"], 1);
    }

    #[test]
    fn departure_withdraws_ballot_before_threshold_check() {
        let (mut room, mut host) = room_with_host(6);
        let p1 = join(&mut room, "p1");
        let _p2 = join(&mut room, "p2");
        start(&mut room, &host);
        vote(&mut room, &p1, "p1", 0);
        host.drain();

        room.handle(RoomCommand::Disconnect {
            connection_id: p1.connection.id(),
        });

        let msgs = host.drain();
        let syncs = voting_syncs(&msgs);
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0]["active"], true);
        assert_eq!(syncs[0]["ballots"], json!({}));
        assert_eq!(syncs[0]["tally"]["0"], 0);
    }

    #[test]
    fn departure_without_round_only_updates_count() {
        let (mut room, mut host) = room_with_host(6);
        let p1 = join(&mut room, "p1");
        host.drain();

        let flow = room.handle(RoomCommand::Disconnect {
            connection_id: p1.connection.id(),
        });
        assert_eq!(flow, RoomFlow::Continue);
        assert_eq!(host.drain(), vec![json!({ "type": "playerCount", "count": 1 })]);

        let (stranger, _rx) = Connection::open();
        room.handle(RoomCommand::Disconnect {
            connection_id: stranger.id(),
        });
        assert!(host.drain().is_empty());
    }

    #[test]
    fn host_disconnect_closes_room() {
        let (mut room, host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        p1.drain();

        let flow = room.handle(RoomCommand::Disconnect {
            connection_id: host.connection.id(),
        });
        assert_eq!(flow, RoomFlow::Closed);
        assert_eq!(p1.drain(), vec![json!({ "type": "roomClosed" })]);
    }

    #[test]
    fn state_updates_reach_players_only() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        host.drain();
        p1.drain();

        room.handle(RoomCommand::UpdateState {
            connection: host.connection.clone(),
            state: json!({ "hp": 7 }),
            history: vec![json!({ "event": "crash" })],
        });

        assert!(host.drain().is_empty());
        assert_eq!(
            p1.drain(),
            vec![json!({
                "type": "stateUpdated",
                "state": { "hp": 7 },
                "history": [{ "event": "crash" }]
            })]
        );
    }

    #[test]
    fn legacy_vote_relays_reach_everyone() {
        let (mut room, mut host) = room_with_host(6);
        let mut p1 = join(&mut room, "p1");
        host.drain();
        p1.drain();

        room.handle(RoomCommand::SyncVote {
            vote_data: json!({ "choice": 1 }),
            sender_id: Some(json!("p1")),
        });
        assert_eq!(room.vote_data, Some(json!({ "choice": 1 })));
        room.handle(RoomCommand::SyncVotingResult {
            result_data: json!({ "winner": 1 }),
        });
        assert_eq!(room.vote_data, None);

        let expected = vec![
            json!({ "type": "syncVote", "voteData": { "choice": 1 }, "senderId": "p1" }),
            json!({ "type": "syncVotingResult", "resultData": { "winner": 1 } }),
        ];
        assert_eq!(host.drain(), expected);
        assert_eq!(p1.drain(), expected);
    }

    #[test]
    fn dead_recipient_does_not_block_broadcast() {
        let (mut room, mut host) = room_with_host(6);
        let p1 = join(&mut room, "p1");
        let mut p2 = join(&mut room, "p2");
        drop(p1.rx);

        start(&mut room, &host);
        assert_eq!(voting_syncs(&host.drain()).len(), 1);
        assert_eq!(voting_syncs(&p2.drain()).len(), 1);
    }
}
