// src/module.rs

//! The override points a module implements to take part in the bus.

use crate::bus::Context;
use crate::error::BoxError;
use crate::message::{is_builtin, Level, Message, MessageError, Response};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Index of a module registered with a [`Bus`](crate::Bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
  pub fn index(&self) -> usize {
    self.0
  }
}

impl fmt::Display for ModuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "module#{}", self.0)
  }
}

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
  /// The bus itself, or a [`BusHandle`](crate::BusHandle) acting for it.
  Core,
  Module { id: ModuleId, name: Arc<str> },
}

impl Source {
  pub fn name(&self) -> &str {
    match self {
      Source::Core => "core",
      Source::Module { name, .. } => &**name,
    }
  }

  pub fn module_id(&self) -> Option<ModuleId> {
    match self {
      Source::Core => None,
      Source::Module { id, .. } => Some(*id),
    }
  }
}

/// Which message types a module's mailbox receives.
///
/// The built-in types (`configure`, `start`, `sync`) are always delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Subscription {
  #[default]
  All,
  Types(HashSet<String>),
}

impl Subscription {
  pub fn types<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Subscription::Types(names.into_iter().map(Into::into).collect())
  }

  pub fn admits(&self, m_type: &str) -> bool {
    match self {
      Subscription::All => true,
      Subscription::Types(types) => is_builtin(m_type) || types.contains(m_type),
    }
  }
}

pub type HandlerResult = Result<(), BoxError>;

/// A participant on the bus: a hardware driver, a display panel, a controller.
///
/// Every method runs on the dispatch thread. Handlers must not block; anything
/// slow goes through [`Context::run_worker_task`].
pub trait Module {
  fn name(&self) -> &str;

  fn process_control(&mut self, _msg: &Message, _ctx: &mut Context<'_>) -> HandlerResult {
    Ok(())
  }

  /// Hot per-frame path.
  fn process_frame_data(&mut self, _msg: &Message, _ctx: &mut Context<'_>) -> HandlerResult {
    Ok(())
  }

  fn process_other(&mut self, _msg: &Message, _ctx: &mut Context<'_>) -> HandlerResult {
    Ok(())
  }

  /// Called on the sender once a message it sent is finalized with responses.
  /// The default hands each response to [`handle_response`](Self::handle_response) in order.
  fn handle_responses(&mut self, msg: &Message, ctx: &mut Context<'_>) {
    for response in msg.responses() {
      self.handle_response(msg, &response, ctx);
    }
  }

  fn handle_response(&mut self, _msg: &Message, _response: &Response, _ctx: &mut Context<'_>) {}

  /// Called on the sender once a message it sent is finalized with errors.
  ///
  /// Returns true if every error was handled. Unhandled errors are fatal when
  /// the bus runs with `fail_fast`.
  fn handle_errors(&mut self, msg: &Message, ctx: &mut Context<'_>) -> bool {
    let mut handled = true;
    for error in msg.errors() {
      handled &= self.handle_error(msg, &error, ctx);
    }
    handled
  }

  fn handle_error(&mut self, _msg: &Message, _error: &MessageError, _ctx: &mut Context<'_>) -> bool {
    false
  }

  /// Runs once at shutdown, after the bus has gone idle.
  fn cleanup(&mut self) {}
}

/// Routes a message to the handler for its level.
pub(crate) fn process(module: &mut dyn Module, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
  match msg.level() {
    Level::Control => module.process_control(msg, ctx),
    Level::FrameData => module.process_frame_data(msg, ctx),
    Level::Other => module.process_other(msg, ctx),
  }
}
