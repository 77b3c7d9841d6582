// src/runtime/holds.rs

use std::cell::Cell;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldError {
  #[error("released more holds than were taken")]
  Underflow,
  #[error("cannot take a hold after the count reached zero")]
  Consumed,
}

/// Counts the holders of a message, similar to Go's `sync.WaitGroup`.
///
/// Every delivery, worker task and retained reference adds a hold; each
/// release removes one. The transition to zero is reported exactly once and
/// latches the counter: no hold can be taken afterwards.
///
/// The counter lives on the dispatch thread only, so plain `Cell`s suffice.
#[derive(Debug)]
pub struct HoldCount {
  count: Cell<usize>,
  consumed: Cell<bool>,
}

impl HoldCount {
  /// Creates a counter with `initial` holds (the creator's own reference, usually 1).
  pub fn new(initial: usize) -> Self {
    Self {
      count: Cell::new(initial),
      consumed: Cell::new(false),
    }
  }

  /// Adds `delta` holds.
  pub fn add(&self, delta: usize) -> Result<(), HoldError> {
    if self.consumed.get() {
      return Err(HoldError::Consumed);
    }
    if delta == 0 {
      return Ok(());
    }
    let old = self.count.get();
    self.count.set(old + delta);
    tracing::trace!(delta, new_count = old + delta, "Holds added");
    Ok(())
  }

  /// Releases one hold.
  ///
  /// Returns `Ok(true)` for the single release that brings the count to zero.
  pub fn release(&self) -> Result<bool, HoldError> {
    let old = self.count.get();
    if old == 0 {
      return Err(if self.consumed.get() {
        HoldError::Consumed
      } else {
        HoldError::Underflow
      });
    }
    self.count.set(old - 1);
    if old == 1 {
      self.consumed.set(true);
      tracing::trace!("Hold count reached zero");
      Ok(true)
    } else {
      Ok(false)
    }
  }

  pub fn count(&self) -> usize {
    self.count.get()
  }

  /// True once the count has reached zero.
  pub fn is_consumed(&self) -> bool {
    self.consumed.get()
  }
}
