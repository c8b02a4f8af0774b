//! Best-effort notification fan-out
//!
//! Completed mutations are posted to an external channel (forum thread, SMS
//! gateway, ...) through a Tokio actor:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   TransferEngine (commit)    │
//! └──────────────┬───────────────┘
//!                │ NotifierHandle::notify (try_send, never blocks)
//!                ▼
//! ┌──────────────────────────────┐
//! │   mpsc::channel (bounded)    │  full / closed -> dropped + counted
//! └──────────────┬───────────────┘
//!                ▼
//! ┌──────────────────────────────┐
//! │   NotifierActor (one task)   │
//! │   sink.deliver(&n).await     │  error -> logged + counted
//! └──────────────────────────────┘
//! ```
//!
//! Nothing here can fail or roll back a ledger write.

use crate::{metrics::Metrics, types::{EntryType, UserId}, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A committed mutation worth telling the community about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// New mother and root frag
    ItemAdded {
        /// Mother ID
        mother_id: Uuid,
        /// Root frag ID
        frag_id: Uuid,
        /// Holder
        owner_id: UserId,
        /// Display name
        name: String,
    },

    /// Split or transfer
    FragGiven {
        /// Source frag
        source_frag_id: Uuid,
        /// New frag
        new_frag_id: Uuid,
        /// Giver
        giver_id: UserId,
        /// Recipient
        recipient_id: UserId,
        /// Full hand-off
        transfer: bool,
    },

    /// Journal entry appended
    JournalUpdated {
        /// Frag
        frag_id: Uuid,
        /// Entry
        journal_id: Uuid,
        /// Entry type
        entry_type: EntryType,
    },

    /// Frag died
    FragDied {
        /// Frag
        frag_id: Uuid,
        /// Holder
        owner_id: UserId,
    },
}

/// External channel notifications are delivered to
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Sink that only writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        tracing::info!(?notification, "Notification");
        Ok(())
    }
}

/// Message sent to the notifier actor
enum NotifierMessage {
    /// Deliver a notification
    Deliver(Notification),

    /// Reply once everything queued before this message was handled
    Flush { response: oneshot::Sender<()> },

    /// Shutdown actor
    Shutdown,
}

/// Actor that drains the mailbox into the sink
struct NotifierActor {
    sink: Arc<dyn NotificationSink>,
    mailbox: mpsc::Receiver<NotifierMessage>,
    metrics: Metrics,
}

impl NotifierActor {
    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                NotifierMessage::Deliver(notification) => {
                    if let Err(e) = self.sink.deliver(&notification).await {
                        self.metrics.notifications_failed.inc();
                        tracing::error!(?notification, error = %e, "Notification delivery failed");
                    }
                }
                NotifierMessage::Flush { response } => {
                    let _ = response.send(());
                }
                NotifierMessage::Shutdown => break,
            }
        }
        tracing::debug!("Notifier stopped");
    }
}

/// Handle for posting notifications
#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierMessage>,
    metrics: Metrics,
}

impl NotifierHandle {
    /// Post a notification without waiting; drops it if the mailbox is full
    pub fn notify(&self, notification: Notification) {
        match self.sender.try_send(NotifierMessage::Deliver(notification)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.notifications_dropped.inc();
                tracing::warn!("Notifier mailbox full, notification dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.notifications_dropped.inc();
                tracing::warn!("Notifier stopped, notification dropped");
            }
        }
    }

    /// Wait until every notification posted so far was handed to the sink
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotifierMessage::Flush { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Notifier mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(NotifierMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Notifier mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the notifier actor; must be called inside a Tokio runtime
pub fn spawn_notifier(
    sink: Arc<dyn NotificationSink>,
    mailbox_capacity: usize,
    metrics: Metrics,
) -> NotifierHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let actor = NotifierActor {
        sink,
        mailbox: rx,
        metrics: metrics.clone(),
    };

    tokio::spawn(async move {
        actor.run().await;
    });

    NotifierHandle { sender: tx, metrics }
}
