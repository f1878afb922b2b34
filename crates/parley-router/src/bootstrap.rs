//! Session bootstrap: replay recent room history to a new connection.
//!
//! Runs as its own short-lived task per registration so that neither the
//! router nor the connection's pumps ever wait on the message store.
//!
//! ```text
//! resolve room ─→ member? ─→ recent(room, limit) ─→ enqueue oldest first
//!                                                      │ (1s per item, skip on timeout)
//!                                                      ▼
//!                                        tell router replay is done
//!                                                      │
//!                                                      ▼
//!                                     mark delivered unread messages read
//! ```

use std::sync::Arc;
use std::time::Duration;

use parley_protocol::{Message, MessageId, RoomId, UserId};
use parley_store::{MessageStore, RoomDirectory};
use parley_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::RouterError;
use crate::router::RouterCommand;

/// Outcome of one replay, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ReplayReport {
    pub delivered: usize,
    pub skipped: usize,
    /// The connection went away before replay finished.
    pub aborted: bool,
    /// Delivered messages that should now be flagged as read.
    pub newly_read: Vec<MessageId>,
}

pub(crate) struct Bootstrap<D, S> {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Weak so that eviction by the router closes the queue even while a
    /// replay is in progress.
    pub outbound: mpsc::WeakSender<Message>,
    pub router: mpsc::WeakSender<RouterCommand>,
    pub directory: Arc<D>,
    pub store: Arc<S>,
    pub limit: usize,
    pub item_timeout: Duration,
}

impl<D, S> Bootstrap<D, S>
where
    D: RoomDirectory,
    S: MessageStore,
{
    pub(crate) async fn run(self) {
        let result = self.replay().await;

        match &result {
            Ok(report) => tracing::debug!(
                conn_id = %self.id,
                room_id = %self.room_id,
                delivered = report.delivered,
                skipped = report.skipped,
                aborted = report.aborted,
                "history replayed"
            ),
            Err(e) => tracing::warn!(
                conn_id = %self.id,
                room_id = %self.room_id,
                error = %e,
                "history replay failed"
            ),
        }

        // Release held live traffic whatever the outcome.
        if let Some(router) = self.router.upgrade() {
            let _ = router
                .send(RouterCommand::HistoryReplayed { id: self.id })
                .await;
        }

        let Ok(report) = result else { return };
        if report.newly_read.is_empty() {
            return;
        }
        match self.store.mark_read(&report.newly_read).await {
            Ok(count) => {
                tracing::debug!(conn_id = %self.id, count, "history marked read");
            }
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "failed to mark history read");
            }
        }
    }

    async fn replay(&self) -> Result<ReplayReport, RouterError> {
        let mut report = ReplayReport::default();

        let Some(room) = self.directory.resolve(&self.room_id).await? else {
            tracing::debug!(room_id = %self.room_id, "history requested for unknown room");
            return Ok(report);
        };
        if !room.is_participant(&self.user_id) {
            tracing::warn!(
                user_id = %self.user_id,
                room_id = %self.room_id,
                "history requested by non-member, skipping"
            );
            return Ok(report);
        }

        let history = self.store.recent(&self.room_id, self.limit).await?;

        for message in history {
            let Some(outbound) = self.outbound.upgrade() else {
                report.aborted = true;
                break;
            };

            let read_candidate = message
                .id()
                .filter(|_| {
                    !message.is_read()
                        && message.kind().counts_as_unread()
                        && message.sender_id() != Some(&self.user_id)
                })
                .cloned();

            match outbound.send_timeout(message, self.item_timeout).await {
                Ok(()) => {
                    report.delivered += 1;
                    report.newly_read.extend(read_candidate);
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    report.skipped += 1;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    report.aborted = true;
                    break;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::{InMemoryMessageStore, InMemoryRoomDirectory};

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn rid(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    async fn fixture() -> (InMemoryRoomDirectory, InMemoryMessageStore) {
        let directory = InMemoryRoomDirectory::new();
        directory
            .upsert_room(rid("r1"), "Room", [uid("alice"), uid("bob")])
            .await;
        (directory, InMemoryMessageStore::new())
    }

    fn bootstrap(
        directory: &InMemoryRoomDirectory,
        store: &InMemoryMessageStore,
        user: &str,
        outbound: &mpsc::Sender<Message>,
        router: &mpsc::Sender<RouterCommand>,
    ) -> Bootstrap<InMemoryRoomDirectory, InMemoryMessageStore> {
        Bootstrap {
            id: ConnectionId::new(1),
            user_id: uid(user),
            room_id: rid("r1"),
            outbound: outbound.downgrade(),
            router: router.downgrade(),
            directory: Arc::new(directory.clone()),
            store: Arc::new(store.clone()),
            limit: 50,
            item_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order_and_marks_read() {
        let (directory, store) = fixture().await;
        for text in ["one", "two"] {
            store
                .insert(Message::normal(uid("bob"), "Bob", rid("r1"), "Room", text))
                .await
                .unwrap();
        }
        // Own messages stay untouched.
        store
            .insert(Message::normal(uid("alice"), "Alice", rid("r1"), "Room", "mine"))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (router_tx, mut router_rx) = mpsc::channel(8);
        bootstrap(&directory, &store, "alice", &tx, &router_tx).run().await;

        let contents: Vec<String> = (0..3)
            .map(|_| rx.try_recv().unwrap().content().to_string())
            .collect();
        assert_eq!(contents, vec!["one", "two", "mine"]);

        assert!(matches!(
            router_rx.try_recv().unwrap(),
            RouterCommand::HistoryReplayed { id } if id == ConnectionId::new(1)
        ));

        let stored = store.recent(&rid("r1"), 50).await.unwrap();
        let read: Vec<bool> = stored.iter().map(Message::is_read).collect();
        assert_eq!(read, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_replay_skips_items_that_time_out() {
        let (directory, store) = fixture().await;
        for text in ["a", "b", "c"] {
            store
                .insert(Message::normal(uid("bob"), "Bob", rid("r1"), "Room", text))
                .await
                .unwrap();
        }

        // Room for one item only, and nobody draining.
        let (tx, mut rx) = mpsc::channel(1);
        let (router_tx, _router_rx) = mpsc::channel(8);
        let report = bootstrap(&directory, &store, "alice", &tx, &router_tx)
            .replay()
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.newly_read.len(), 1);
        assert_eq!(rx.try_recv().unwrap().content(), "a");
    }

    #[tokio::test]
    async fn test_replay_for_non_member_sends_nothing() {
        let (directory, store) = fixture().await;
        store
            .insert(Message::normal(uid("bob"), "Bob", rid("r1"), "Room", "secret"))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (router_tx, _router_rx) = mpsc::channel(8);
        let report = bootstrap(&directory, &store, "mallory", &tx, &router_tx)
            .replay()
            .await
            .unwrap();

        assert_eq!(report, ReplayReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replay_stops_when_queue_owner_is_gone() {
        let (directory, store) = fixture().await;
        store
            .insert(Message::normal(uid("bob"), "Bob", rid("r1"), "Room", "x"))
            .await
            .unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let (router_tx, _router_rx) = mpsc::channel(8);
        let boot = bootstrap(&directory, &store, "alice", &tx, &router_tx);
        drop(tx);

        let report = boot.replay().await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_replay_store_failure_is_an_error() {
        let (directory, store) = fixture().await;
        store.set_available(false);

        let (tx, _rx) = mpsc::channel(8);
        let (router_tx, _router_rx) = mpsc::channel(8);
        let result = bootstrap(&directory, &store, "alice", &tx, &router_tx)
            .replay()
            .await;
        assert!(matches!(result, Err(RouterError::Store(_))));
    }
}
