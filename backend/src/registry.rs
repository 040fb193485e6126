use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;
use uuid::Uuid;
use voting_core::VotingLedger;

use crate::gateway::Connection;
use crate::room::{run_room, Room, RoomCommand};

/// Command queue of a running room task.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    /// Queues a command. False once the room task has stopped.
    pub fn send(&self, command: RoomCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    seeds: Option<Arc<Mutex<ChaCha8Rng>>>,
}

impl RoomRegistry {
    /// Registry whose rooms break vote ties reproducibly.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rooms: Arc::default(),
            seeds: Some(Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed)))),
        }
    }

    pub async fn create_room(
        &self,
        host: Connection,
        host_id: Option<String>,
        max_players: usize,
    ) -> String {
        let ledger_seed = match &self.seeds {
            Some(seeds) => Some(seeds.lock().await.gen::<u64>()),
            None => None,
        };

        let mut rooms = self.rooms.write().await;
        let room_id = loop {
            let code = generate_room_code();
            if !rooms.contains_key(&code) {
                break code;
            }
        };

        let ledger = match ledger_seed {
            Some(seed) => VotingLedger::with_seed(room_id.clone(), seed),
            None => VotingLedger::new(room_id.clone()),
        };
        let room = Room::new(room_id.clone(), host, host_id, ledger, max_players);
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.insert(room_id.clone(), RoomHandle { commands: tx });
        drop(rooms);

        tokio::spawn(run_room(room, rx, self.clone()));
        info!(room = %room_id, "room created");
        room_id
    }

    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn remove(&self, room_id: &str) {
        self.rooms.write().await.remove(room_id);
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }
}

fn generate_room_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}
