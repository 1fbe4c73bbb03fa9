use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection_manager::{ClientHandle, ConnectionManager};

enum HubCommand {
    Register {
        client: ClientHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        user_id: u64,
        connection_id: Uuid,
        ack: oneshot::Sender<bool>,
    },
    Evict {
        user_id: u64,
        connection_id: Uuid,
    },
    Broadcast {
        message: String,
        ack: oneshot::Sender<usize>,
    },
}

type Index = Arc<RwLock<HashMap<u64, ClientHandle>>>;

/// Registry of live connections, one per user.
///
/// A single coordination task owns every mutation (register, unregister,
/// eviction, broadcast). Targeted sends read the shared index directly.
/// Registering a user who is already connected replaces and closes the
/// older connection. A connection whose outbound queue is full is evicted
/// rather than waited on.
#[derive(Clone)]
pub struct ConnectionHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    index: Index,
    outbound_capacity: usize,
}

impl ConnectionHub {
    /// Spawns the coordination task. It stops once every hub handle is dropped.
    pub fn spawn(outbound_capacity: usize) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let index: Index = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(run_hub(receiver, Arc::clone(&index)));
        info!(outbound_capacity = outbound_capacity, "Connection hub started");
        Self {
            commands,
            index,
            outbound_capacity,
        }
    }

    /// New handle sized to the hub's outbound queue bound
    pub fn new_client(
        &self,
        user_id: u64,
        username: String,
    ) -> (ClientHandle, mpsc::Receiver<String>) {
        ClientHandle::new(user_id, username, self.outbound_capacity)
    }

    /// Returns once the client is visible to sends
    pub async fn register(&self, client: ClientHandle) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(HubCommand::Register { client, ack }).is_err() {
            warn!("Connection hub is stopped, dropping registration");
            return;
        }
        let _ = done.await;
    }

    /// Removes the user's entry if it still belongs to `connection_id`.
    /// Returns false when a newer connection has replaced it.
    pub async fn unregister(&self, user_id: u64, connection_id: Uuid) -> bool {
        let (ack, done) = oneshot::channel();
        let command = HubCommand::Unregister {
            user_id,
            connection_id,
            ack,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    pub async fn is_connected(&self, user_id: u64) -> bool {
        self.index.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.index.read().await.len()
    }

    fn evict(&self, user_id: u64, connection_id: Uuid) {
        let _ = self.commands.send(HubCommand::Evict {
            user_id,
            connection_id,
        });
    }
}

#[async_trait]
impl ConnectionManager for ConnectionHub {
    async fn send_to_user(&self, user_id: u64, message: &str) -> bool {
        let outcome = {
            let index = self.index.read().await;
            let Some(client) = index.get(&user_id) else {
                debug!(user_id = user_id, "No live connection for user");
                return false;
            };
            client
                .sender
                .try_send(message.to_string())
                .map_err(|e| (client.connection_id, e))
        };

        match outcome {
            Ok(()) => true,
            Err((connection_id, mpsc::error::TrySendError::Full(_))) => {
                warn!(user_id = user_id, "Outbound queue full, evicting slow connection");
                self.evict(user_id, connection_id);
                false
            }
            Err((connection_id, mpsc::error::TrySendError::Closed(_))) => {
                debug!(user_id = user_id, "Outbound queue closed, evicting connection");
                self.evict(user_id, connection_id);
                false
            }
        }
    }

    async fn broadcast(&self, message: &str) -> usize {
        let (ack, done) = oneshot::channel();
        let command = HubCommand::Broadcast {
            message: message.to_string(),
            ack,
        };
        if self.commands.send(command).is_err() {
            return 0;
        }
        done.await.unwrap_or(0)
    }
}

async fn run_hub(mut commands: mpsc::UnboundedReceiver<HubCommand>, index: Index) {
    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { client, ack } => {
                let user_id = client.user_id;
                let connection_id = client.connection_id;
                let displaced = index.write().await.insert(user_id, client);
                if let Some(old) = displaced {
                    // dropping the old handle closes its queue and ends its writer
                    info!(
                        user_id = user_id,
                        displaced_connection = %old.connection_id,
                        "Replacing existing connection"
                    );
                }
                debug!(user_id = user_id, connection_id = %connection_id, "Connection registered");
                let _ = ack.send(());
            }
            HubCommand::Unregister {
                user_id,
                connection_id,
                ack,
            } => {
                let removed = remove_if_current(&index, user_id, connection_id).await;
                if removed {
                    debug!(user_id = user_id, "Connection unregistered");
                }
                let _ = ack.send(removed);
            }
            HubCommand::Evict {
                user_id,
                connection_id,
            } => {
                if remove_if_current(&index, user_id, connection_id).await {
                    info!(user_id = user_id, "Connection evicted");
                }
            }
            HubCommand::Broadcast { message, ack } => {
                let mut map = index.write().await;
                let mut evicted = Vec::new();
                let mut delivered = 0;
                for (user_id, client) in map.iter() {
                    match client.sender.try_send(message.clone()) {
                        Ok(()) => delivered += 1,
                        Err(_) => evicted.push(*user_id),
                    }
                }
                for user_id in evicted {
                    warn!(user_id = user_id, "Evicting connection during broadcast");
                    map.remove(&user_id);
                }
                let _ = ack.send(delivered);
            }
        }
    }
    debug!("Connection hub stopped");
}

async fn remove_if_current(index: &Index, user_id: u64, connection_id: Uuid) -> bool {
    let mut map = index.write().await;
    if map
        .get(&user_id)
        .is_some_and(|c| c.connection_id == connection_id)
    {
        map.remove(&user_id);
        true
    } else {
        false
    }
}
