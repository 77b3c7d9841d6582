// src/runtime/mailbox.rs

//! Per-module FIFO queue drained one message per dispatch tick.

use crate::message::Message;

use std::collections::VecDeque;
use std::sync::Arc;

/// Default depth at which a mailbox logs a backlog warning.
pub const DEFAULT_MAILBOX_WARN_DEPTH: usize = 1000;

/// A module's private queue plus its "drain scheduled" flag.
///
/// The queue is unbounded: the only producer is the dispatch loop itself, which
/// must never block on its own consumer. Depth is watched instead.
#[derive(Debug)]
pub struct Mailbox {
  module: Arc<str>,
  queue: VecDeque<Message>,
  drain_scheduled: bool,
  warn_depth: usize,
  warned: bool,
}

impl Mailbox {
  pub fn new(module: Arc<str>, warn_depth: usize) -> Self {
    Self {
      module,
      queue: VecDeque::new(),
      drain_scheduled: false,
      warn_depth: warn_depth.max(1),
      warned: false,
    }
  }

  /// Appends a message.
  ///
  /// Returns true if the caller must schedule a drain step; at most one step is
  /// ever scheduled at a time.
  pub fn push(&mut self, msg: Message) -> bool {
    self.queue.push_back(msg);
    let depth = self.queue.len();
    if depth >= self.warn_depth && !self.warned {
      tracing::warn!(module = %self.module, depth, warn_depth = self.warn_depth, "Mailbox backlog over warning depth");
      self.warned = true;
    }
    if self.drain_scheduled {
      false
    } else {
      self.drain_scheduled = true;
      true
    }
  }

  pub fn pop(&mut self) -> Option<Message> {
    let msg = self.queue.pop_front();
    if self.warned && self.queue.len() < self.warn_depth / 2 {
      tracing::debug!(module = %self.module, depth = self.queue.len(), "Mailbox backlog cleared");
      self.warned = false;
    }
    msg
  }

  /// Ends a drain step. Returns true if another step must be scheduled.
  pub fn finish_step(&mut self) -> bool {
    if self.queue.is_empty() {
      self.drain_scheduled = false;
      false
    } else {
      true
    }
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn is_drain_scheduled(&self) -> bool {
    self.drain_scheduled
  }

  pub fn module(&self) -> &str {
    &self.module
  }
}
