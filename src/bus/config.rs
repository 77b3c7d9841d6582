// src/bus/config.rs

use crate::message::Level;
use crate::runtime::{DEFAULT_MAILBOX_WARN_DEPTH, DEFAULT_MONITOR_CAPACITY};

/// What the dispatch loop does when a handler returns `Err` or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
  /// Attach the failure to the message as a `MessageError` and keep draining.
  Capture,
  /// Return `BusError::HandlerFailed` from the loop. Panics are not caught.
  Propagate,
}

/// Fault policy per message level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicies {
  pub control: FaultPolicy,
  pub frame_data: FaultPolicy,
  pub other: FaultPolicy,
}

impl LevelPolicies {
  /// The same policy for every level.
  pub fn uniform(policy: FaultPolicy) -> Self {
    Self {
      control: policy,
      frame_data: policy,
      other: policy,
    }
  }

  pub fn for_level(&self, level: Level) -> FaultPolicy {
    match level {
      Level::Control => self.control,
      Level::FrameData => self.frame_data,
      Level::Other => self.other,
    }
  }
}

impl Default for LevelPolicies {
  /// Control handlers are guarded; the frame-data and other paths run unguarded.
  fn default() -> Self {
    Self {
      control: FaultPolicy::Capture,
      frame_data: FaultPolicy::Propagate,
      other: FaultPolicy::Propagate,
    }
  }
}

/// Bus-wide settings. Fixed once the bus is built.
#[derive(Debug, Clone)]
pub struct BusConfig {
  /// Mailbox depth that triggers a backlog warning.
  pub mailbox_warn_depth: usize,
  pub fault_policy: LevelPolicies,
  /// Abort `Bus::run` when a message finalizes with errors its sender did not handle.
  pub fail_fast: bool,
  /// Record a completion-site trace of the worker thread on worker failures.
  pub capture_backtraces: bool,
  pub monitor_capacity: usize,
}

impl Default for BusConfig {
  fn default() -> Self {
    Self {
      mailbox_warn_depth: DEFAULT_MAILBOX_WARN_DEPTH,
      fault_policy: LevelPolicies::default(),
      fail_fast: true,
      capture_backtraces: true,
      monitor_capacity: DEFAULT_MONITOR_CAPACITY,
    }
  }
}

impl BusConfig {
  pub fn with_mailbox_warn_depth(mut self, depth: usize) -> Self {
    self.mailbox_warn_depth = depth.max(1);
    self
  }

  pub fn with_fault_policy(mut self, policies: LevelPolicies) -> Self {
    self.fault_policy = policies;
    self
  }

  pub fn with_level_policy(mut self, level: Level, policy: FaultPolicy) -> Self {
    match level {
      Level::Control => self.fault_policy.control = policy,
      Level::FrameData => self.fault_policy.frame_data = policy,
      Level::Other => self.fault_policy.other = policy,
    }
    self
  }

  pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
    self.fail_fast = fail_fast;
    self
  }

  pub fn with_capture_backtraces(mut self, capture: bool) -> Self {
    self.capture_backtraces = capture;
    self
  }

  pub fn with_monitor_capacity(mut self, capacity: usize) -> Self {
    self.monitor_capacity = capacity.max(1);
    self
  }
}
