use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::memory::ConversationMemory;
use crate::models::{ConversationRecord, Mention, Message};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum MemoryCommand {
    Record { handle: String, reply: oneshot::Sender<ConversationRecord> },
    AddDm { handle: String, message: Message, reply: oneshot::Sender<()> },
    AddMention { handle: String, mention: Mention, reply: oneshot::Sender<()> },
    DmHistory { handle: String, limit: Option<usize>, reply: oneshot::Sender<Vec<Message>> },
    HasReplied { tweet_id: String, reply: oneshot::Sender<bool> },
    AddTweetReply { tweet_id: String, reply: oneshot::Sender<()> },
    SaveAll { reply: oneshot::Sender<()> },
}

/// Sole owner of `ConversationMemory`. Both loops talk to it through a
/// `MemoryClient`, so mutations are applied one at a time in arrival order.
pub struct MemoryActor {
    memory: ConversationMemory,
    rx: mpsc::Receiver<MemoryCommand>,
}

impl MemoryActor {
    pub fn new(memory: ConversationMemory, rx: mpsc::Receiver<MemoryCommand>) -> Self {
        Self { memory, rx }
    }

    /// Starts the actor task and returns a handle for talking to it.
    pub fn spawn(memory: ConversationMemory) -> (MemoryClient, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(Self::new(memory, rx).run());
        (MemoryClient::new(tx), handle)
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                MemoryCommand::Record { handle, reply } => {
                    let _ = reply.send(self.memory.get_or_create(&handle).clone());
                }
                MemoryCommand::AddDm { handle, message, reply } => {
                    self.memory.add_dm(&handle, message);
                    let _ = reply.send(());
                }
                MemoryCommand::AddMention { handle, mention, reply } => {
                    self.memory.add_mention(&handle, mention);
                    let _ = reply.send(());
                }
                MemoryCommand::DmHistory { handle, limit, reply } => {
                    let _ = reply.send(self.memory.dm_history(&handle, limit));
                }
                MemoryCommand::HasReplied { tweet_id, reply } => {
                    let _ = reply.send(self.memory.has_replied_to_tweet(&tweet_id));
                }
                MemoryCommand::AddTweetReply { tweet_id, reply } => {
                    self.memory.add_tweet_reply(&tweet_id);
                    let _ = reply.send(());
                }
                MemoryCommand::SaveAll { reply } => {
                    self.memory.save_all_conversations();
                    let _ = reply.send(());
                }
            }
        }
        debug!("Memory channel closed, flushing conversations");
        self.memory.save_all_conversations();
        info!("Memory actor stopped");
    }
}

#[derive(Clone)]
pub struct MemoryClient {
    tx: mpsc::Sender<MemoryCommand>,
}

impl MemoryClient {
    pub fn new(tx: mpsc::Sender<MemoryCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> MemoryCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).await.ok()?;
        rx.await.ok()
    }

    /// The record for `handle`, created empty if it did not exist.
    pub async fn record(&self, handle: &str) -> Option<ConversationRecord> {
        self.request(|reply| MemoryCommand::Record { handle: handle.to_string(), reply })
            .await
    }

    pub async fn add_dm(&self, handle: &str, message: Message) {
        self.request(|reply| MemoryCommand::AddDm { handle: handle.to_string(), message, reply })
            .await;
    }

    pub async fn add_mention(&self, handle: &str, mention: Mention) {
        self.request(|reply| MemoryCommand::AddMention { handle: handle.to_string(), mention, reply })
            .await;
    }

    pub async fn dm_history(&self, handle: &str, limit: Option<usize>) -> Vec<Message> {
        self.request(|reply| MemoryCommand::DmHistory { handle: handle.to_string(), limit, reply })
            .await
            .unwrap_or_default()
    }

    /// Errs on the side of "already replied" if the actor is gone.
    pub async fn has_replied_to_tweet(&self, tweet_id: &str) -> bool {
        self.request(|reply| MemoryCommand::HasReplied { tweet_id: tweet_id.to_string(), reply })
            .await
            .unwrap_or(true)
    }

    pub async fn add_tweet_reply(&self, tweet_id: &str) {
        self.request(|reply| MemoryCommand::AddTweetReply { tweet_id: tweet_id.to_string(), reply })
            .await;
    }

    pub async fn save_all(&self) {
        self.request(|reply| MemoryCommand::SaveAll { reply }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_actor_serves_queries_and_mutations() {
        let dir = tempdir().unwrap();
        let (client, handle) = MemoryActor::spawn(ConversationMemory::load(dir.path()));

        let fresh = client.record("@alice").await.unwrap();
        assert!(fresh.dms.is_empty());
        assert_eq!(fresh.metadata.total_interactions, 0);

        client.add_dm("@alice", Message::incoming("draw a whale")).await;
        client.add_dm("@alice", Message::outgoing("here it is", true)).await;
        let history = client.dm_history("@alice", Some(1)).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].is_from_us);

        assert!(!client.has_replied_to_tweet("99").await);
        client.add_tweet_reply("99").await;
        assert!(client.has_replied_to_tweet("99").await);

        drop(client);
        handle.await.unwrap();
        assert!(dir.path().join("conversations").join("@alice.json").exists());
    }

    #[tokio::test]
    async fn test_clones_share_one_owner() {
        let dir = tempdir().unwrap();
        let (client, handle) = MemoryActor::spawn(ConversationMemory::load(dir.path()));
        let other = client.clone();

        let mention = Mention {
            tweet_id: "7".to_string(),
            text: "@bot paint a fox".to_string(),
            reply: "done".to_string(),
            timestamp: Utc::now(),
            is_from_us: false,
        };
        let writer = tokio::spawn(async move {
            other.add_mention("@bob", mention).await;
            other.add_tweet_reply("7").await;
        });
        writer.await.unwrap();

        let record = client.record("@bob").await.unwrap();
        assert_eq!(record.mentions.len(), 1);
        assert!(client.has_replied_to_tweet("7").await);

        client.save_all().await;
        drop(client);
        handle.await.unwrap();

        let mut reloaded = ConversationMemory::load(dir.path());
        assert!(reloaded.has_replied_to_tweet("7"));
        assert_eq!(reloaded.get_or_create("@bob").mentions.len(), 1);
    }
}
