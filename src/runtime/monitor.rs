// src/runtime/monitor.rs

use crate::message::MessageId;
use crate::runtime::worker::TaskId;

/// Significant events inside the bus, in the spirit of a socket monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BusEvent {
  /// A message passed validation and entered the outbound queue.
  Sent { id: MessageId, m_type: String, source: String },
  /// A send failed validation. Nothing was delivered.
  Rejected { m_type: String, error: String },
  /// A sync message is waiting for earlier messages to finalize.
  Parked { id: MessageId, in_flight: usize },
  /// A message was fanned out to `mailboxes` mailboxes.
  Delivered { id: MessageId, m_type: String, mailboxes: usize },
  /// The last hold was released and the finalizer (if any) has run.
  Finalized {
    id: MessageId,
    m_type: String,
    responses: usize,
    errors: usize,
  },
  /// A handler returned an error or panicked.
  HandlerFailed {
    module: String,
    id: MessageId,
    m_type: String,
    text: String,
  },
  /// A worker task returned an error or panicked.
  WorkerFailed {
    module: String,
    id: MessageId,
    task_id: TaskId,
    text: String,
  },
  /// `Bus::run` finished and module cleanup has run.
  ShutDown,
}

pub type MonitorSender = async_channel::Sender<BusEvent>;
pub type MonitorReceiver = async_channel::Receiver<BusEvent>;

pub const DEFAULT_MONITOR_CAPACITY: usize = 100;

/// Fans bus events out to every subscribed monitor channel.
///
/// Publishing never blocks the dispatch loop: a full channel drops the event.
#[derive(Debug)]
pub(crate) struct Monitor {
  capacity: usize,
  subscribers: Vec<MonitorSender>,
}

impl Monitor {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      subscribers: Vec::new(),
    }
  }

  pub fn subscribe(&mut self) -> MonitorReceiver {
    let (tx, rx) = async_channel::bounded(self.capacity);
    self.subscribers.push(tx);
    tracing::debug!(subscribers = self.subscribers.len(), "Monitor subscribed");
    rx
  }

  pub fn publish(&mut self, event: BusEvent) {
    if self.subscribers.is_empty() {
      return;
    }
    self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
      Ok(()) => true,
      Err(async_channel::TrySendError::Full(dropped)) => {
        tracing::warn!(event = ?dropped, "Monitor channel full, dropping event");
        true
      }
      Err(async_channel::TrySendError::Closed(_)) => {
        tracing::debug!("Monitor receiver dropped, unsubscribing");
        false
      }
    });
  }
}
