use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Push side of the live-connection registry
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Best-effort delivery. Returns false when the user has no live
    /// connection or their queue was full (and the connection was evicted).
    async fn send_to_user(&self, user_id: u64, message: &str) -> bool;

    /// Returns how many of the users the message was queued for
    async fn send_to_users(&self, user_ids: &[u64], message: &str) -> usize {
        let mut delivered = 0;
        for &user_id in user_ids {
            if self.send_to_user(user_id, message).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Returns how many connections the message was queued for
    async fn broadcast(&self, message: &str) -> usize;
}

/// Registry entry for one live connection. The hub holds the only strong
/// sender, so removing the entry closes the connection's outbound queue.
#[derive(Debug)]
pub struct ClientHandle {
    pub connection_id: Uuid,
    pub user_id: u64,
    pub username: String,
    pub(super) sender: mpsc::Sender<String>,
}

impl ClientHandle {
    /// Creates a handle with a bounded outbound queue and returns the
    /// receiving end for the connection's writer pump.
    pub fn new(user_id: u64, username: String, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                connection_id: Uuid::new_v4(),
                user_id,
                username,
                sender,
            },
            receiver,
        )
    }

    /// Sender for replies that does not keep the queue open
    pub fn reply_sender(&self) -> mpsc::WeakSender<String> {
        self.sender.downgrade()
    }
}
