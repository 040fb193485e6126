use serde::{Deserialize, Serialize};
use serde_json::Value;
use voting_core::VotingState;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateRoom {
        host_id: Option<String>,
    },
    JoinRoom {
        room_id: String,
        player_id: Option<String>,
    },
    StartVoting {
        room_id: String,
        host_id: Option<String>,
        missions: Vec<Value>,
    },
    SubmitVote {
        room_id: String,
        player_id: String,
        mission_index: i64,
    },
    ManualSettleVoting {
        room_id: String,
    },
    UpdateState {
        room_id: String,
        state: Value,
        #[serde(default)]
        history: Option<Vec<Value>>,
    },
    SyncVote {
        room_id: String,
        vote_data: Value,
        #[serde(default)]
        sender_id: Option<Value>,
    },
    SyncVotingResult {
        room_id: String,
        result_data: Value,
    },
    Heartbeat {
        player_id: Option<String>,
        room_id: Option<String>,
        timestamp: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        room_id: String,
        player_id: String,
    },
    StateUpdated {
        state: Value,
        history: Vec<Value>,
    },
    VotingStateSync {
        voting_state: VotingState<Value>,
    },
    PlayerCount {
        count: usize,
    },
    RoomClosed,
    SyncVote {
        vote_data: Value,
        sender_id: Option<Value>,
    },
    SyncVotingResult {
        result_data: Value,
    },
    HeartbeatAck {
        timestamp: i64,
        original_timestamp: Option<Value>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
