// src/bus/router.rs

use crate::bus::config::BusConfig;
use crate::error::BusError;
use crate::message::{Message, MessageBuilder, MessageId, TypeRegistry};
use crate::module::{ModuleId, Source, Subscription};
use crate::runtime::monitor::{BusEvent, Monitor};
use crate::runtime::worker::WorkerPool;
use crate::runtime::{CommandSender, Mailbox};

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Routing state shared by the dispatch loop, handlers and finalizers.
///
/// Everything here lives on the dispatch thread.
#[derive(Debug)]
pub(crate) struct Router {
  pub registry: Arc<TypeRegistry>,
  pub config: BusConfig,
  pub mailboxes: Vec<Mailbox>,
  pub subscriptions: Vec<Subscription>,
  pub names: Vec<Arc<str>>,
  /// Mailboxes with a drain step scheduled, served round-robin.
  pub ready: VecDeque<ModuleId>,
  /// Validated messages not yet fanned out. A sync message at the front blocks the rest.
  pub outbound: VecDeque<Message>,
  /// Messages delivered but not yet finalized.
  pub in_flight: BTreeSet<MessageId>,
  /// Messages whose last hold was released, waiting for finalization.
  pub finished: VecDeque<Message>,
  pub workers: WorkerPool,
  pub monitor: Monitor,
  next_id: MessageId,
  parked: Option<MessageId>,
}

impl Router {
  pub fn new(registry: Arc<TypeRegistry>, config: BusConfig, commands_tx: CommandSender) -> Self {
    let workers = WorkerPool::new(commands_tx, config.capture_backtraces);
    let monitor = Monitor::new(config.monitor_capacity);
    Self {
      registry,
      config,
      mailboxes: Vec::new(),
      subscriptions: Vec::new(),
      names: Vec::new(),
      ready: VecDeque::new(),
      outbound: VecDeque::new(),
      in_flight: BTreeSet::new(),
      finished: VecDeque::new(),
      workers,
      monitor,
      next_id: 1,
      parked: None,
    }
  }

  pub fn add_mailbox(&mut self, name: Arc<str>, subscription: Subscription) -> ModuleId {
    let id = ModuleId(self.mailboxes.len());
    self
      .mailboxes
      .push(Mailbox::new(name.clone(), self.config.mailbox_warn_depth));
    self.subscriptions.push(subscription);
    self.names.push(name);
    id
  }

  pub fn source_for(&self, origin: Option<ModuleId>) -> Result<Source, BusError> {
    match origin {
      None => Ok(Source::Core),
      Some(id) => {
        let name = self.names.get(id.0).ok_or(BusError::UnknownModule(id.0))?;
        Ok(Source::Module {
          id,
          name: name.clone(),
        })
      }
    }
  }

  pub fn name_of(&self, origin: Option<ModuleId>) -> Arc<str> {
    origin
      .and_then(|id| self.names.get(id.0).cloned())
      .unwrap_or_else(|| Arc::from("core"))
  }

  /// Validates and queues a message. Nothing is delivered if validation fails.
  pub fn send(&mut self, origin: Option<ModuleId>, builder: MessageBuilder) -> Result<MessageId, BusError> {
    let source = self.source_for(origin)?;
    let m_type = match self.registry.validate(&builder.m_type, &builder.data) {
      Ok(m_type) => m_type,
      Err(e) => {
        tracing::warn!(m_type = %builder.m_type, source = source.name(), error = %e, "Rejected message");
        self.monitor.publish(BusEvent::Rejected {
          m_type: builder.m_type.clone(),
          error: e.to_string(),
        });
        return Err(e.into());
      }
    };

    let id = self.next_id;
    self.next_id += 1;
    let msg = Message::new(id, m_type, source, builder);
    tracing::debug!(
      msg_id = id,
      m_type = msg.type_name(),
      level = %msg.level(),
      source = msg.source().name(),
      sync = msg.is_sync(),
      "Message sent"
    );
    self.monitor.publish(BusEvent::Sent {
      id,
      m_type: msg.type_name().to_string(),
      source: msg.source().name().to_string(),
    });
    self.outbound.push_back(msg);
    self.pump()?;
    Ok(id)
  }

  /// Delivers queued messages until the queue is empty or a sync message must wait.
  pub fn pump(&mut self) -> Result<(), BusError> {
    while let Some(front) = self.outbound.front() {
      if front.is_sync() && !self.in_flight.is_empty() {
        if self.parked != Some(front.id()) {
          tracing::trace!(msg_id = front.id(), in_flight = self.in_flight.len(), "Sync message parked");
          self.parked = Some(front.id());
          self.monitor.publish(BusEvent::Parked {
            id: front.id(),
            in_flight: self.in_flight.len(),
          });
        }
        return Ok(());
      }
      if let Some(msg) = self.outbound.pop_front() {
        self.parked = None;
        self.deliver(msg)?;
      }
    }
    Ok(())
  }

  /// Fans a message out to every subscribed mailbox, then drops the sender's hold.
  fn deliver(&mut self, msg: Message) -> Result<(), BusError> {
    self.in_flight.insert(msg.id());
    let mut delivered = 0;
    for index in 0..self.mailboxes.len() {
      if !self.subscriptions[index].admits(msg.type_name()) {
        continue;
      }
      msg.inc_ref_count()?;
      if self.mailboxes[index].push(msg.clone()) {
        self.ready.push_back(ModuleId(index));
      }
      delivered += 1;
    }
    tracing::debug!(msg_id = msg.id(), m_type = msg.type_name(), mailboxes = delivered, "Message delivered");
    self.monitor.publish(BusEvent::Delivered {
      id: msg.id(),
      m_type: msg.type_name().to_string(),
      mailboxes: delivered,
    });
    self.release(&msg)
  }

  /// Releases one hold; queues the message for finalization when it was the last.
  pub fn release(&mut self, msg: &Message) -> Result<(), BusError> {
    if msg.dec_ref_count()? {
      tracing::trace!(msg_id = msg.id(), "Last hold released");
      self.finished.push_back(msg.clone());
    }
    Ok(())
  }

  /// Marks a message finalized; returns false if it was not in flight.
  pub fn retire(&mut self, id: MessageId) -> bool {
    self.in_flight.remove(&id)
  }

  /// True when nothing is scheduled, running, queued or awaiting finalization.
  pub fn is_quiescent(&self) -> bool {
    self.nothing_runnable() && self.outbound.is_empty() && self.in_flight.is_empty()
  }

  /// True when no drain step, finalization or worker completion can make progress.
  pub fn nothing_runnable(&self) -> bool {
    self.ready.is_empty() && self.finished.is_empty() && self.workers.pending() == 0
  }

  /// The error for a bus that stopped with messages still held.
  pub fn stalled(&self) -> BusError {
    BusError::Stalled {
      parked: self.outbound.front().map(Message::id),
      in_flight: self.in_flight.iter().copied().collect(),
    }
  }
}
