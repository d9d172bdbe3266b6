//! Message buffer for the vertices of one shard
//!
//! A single task owns the buffer; everything else talks to it through a
//! cloneable [`MailboxHandle`]. Messages for vertices the shard does not own
//! are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PregelError;
use crate::message::{VertexId, VertexMessage};

/// Buffered messages keyed by destination vertex
pub type Inbox = HashMap<VertexId, Vec<VertexMessage>>;

enum MailboxCommand {
    Deliver(VertexMessage),
    /// Take every buffered message, leaving the buffer empty
    Drain(oneshot::Sender<Inbox>),
    /// Copy every buffered message, leaving the buffer untouched
    Snapshot(oneshot::Sender<Inbox>),
    Stop,
}

/// Handle to a running mailbox task
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    tx: mpsc::Sender<MailboxCommand>,
}

impl MailboxHandle {
    /// Start a mailbox accepting messages for `owned`, pre-filled with `seed`
    pub fn spawn(
        owned: Arc<HashSet<VertexId>>,
        seed: Inbox,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_mailbox(owned, seed, rx));
        (Self { tx }, task)
    }

    pub async fn deliver(&self, message: VertexMessage) -> Result<(), PregelError> {
        self.tx
            .send(MailboxCommand::Deliver(message))
            .await
            .map_err(|_| PregelError::channel_closed("mailbox"))
    }

    pub async fn drain(&self) -> Result<Inbox, PregelError> {
        self.request(MailboxCommand::Drain).await
    }

    pub async fn snapshot(&self) -> Result<Inbox, PregelError> {
        self.request(MailboxCommand::Snapshot).await
    }

    /// Ask the mailbox task to exit; buffered messages are discarded
    pub async fn stop(&self) {
        let _ = self.tx.send(MailboxCommand::Stop).await;
    }

    async fn request(
        &self,
        make: fn(oneshot::Sender<Inbox>) -> MailboxCommand,
    ) -> Result<Inbox, PregelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| PregelError::channel_closed("mailbox"))?;
        reply_rx
            .await
            .map_err(|_| PregelError::channel_closed("mailbox reply"))
    }
}

async fn run_mailbox(
    owned: Arc<HashSet<VertexId>>,
    mut inbox: Inbox,
    mut rx: mpsc::Receiver<MailboxCommand>,
) {
    inbox.retain(|id, _| owned.contains(id));

    while let Some(command) = rx.recv().await {
        match command {
            MailboxCommand::Deliver(message) => {
                if owned.contains(&message.to) {
                    inbox.entry(message.to).or_default().push(message);
                } else {
                    debug!(
                        to = %message.to,
                        from = %message.from,
                        "Dropping message for unowned vertex"
                    );
                }
            }
            MailboxCommand::Drain(reply) => {
                if reply.send(std::mem::take(&mut inbox)).is_err() {
                    warn!("Mailbox drain requester went away");
                }
            }
            MailboxCommand::Snapshot(reply) => {
                let _ = reply.send(inbox.clone());
            }
            MailboxCommand::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(ids: &[u64]) -> Arc<HashSet<VertexId>> {
        Arc::new(ids.iter().copied().map(VertexId).collect())
    }

    fn msg(to: u64, value: f64) -> VertexMessage {
        VertexMessage::new(VertexId(0), VertexId(to), value, 1)
    }

    #[tokio::test]
    async fn test_deliver_and_drain() {
        let (mailbox, _task) = MailboxHandle::spawn(owned(&[1, 2]), Inbox::new(), 16);
        mailbox.deliver(msg(1, 0.5)).await.unwrap();
        mailbox.deliver(msg(1, 0.25)).await.unwrap();
        mailbox.deliver(msg(2, 1.0)).await.unwrap();

        let drained = mailbox.drain().await.unwrap();
        assert_eq!(drained[&VertexId(1)].len(), 2);
        assert_eq!(drained[&VertexId(2)].len(), 1);
        assert!(mailbox.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unowned_messages_dropped() {
        let (mailbox, _task) = MailboxHandle::spawn(owned(&[1]), Inbox::new(), 16);
        mailbox.deliver(msg(7, 0.5)).await.unwrap();
        assert!(mailbox.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_keeps_buffer() {
        let mut seed = Inbox::new();
        seed.insert(VertexId(1), vec![msg(1, 3.0)]);
        seed.insert(VertexId(9), vec![msg(9, 3.0)]);
        let (mailbox, _task) = MailboxHandle::spawn(owned(&[1]), seed, 16);

        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(mailbox.drain().await.unwrap()[&VertexId(1)][0].value, 3.0);
    }

    #[tokio::test]
    async fn test_stop() {
        let (mailbox, task) = MailboxHandle::spawn(owned(&[1]), Inbox::new(), 4);
        mailbox.stop().await;
        task.await.unwrap();
        assert!(matches!(
            mailbox.deliver(msg(1, 1.0)).await,
            Err(PregelError::ChannelClosed(_))
        ));
    }
}
