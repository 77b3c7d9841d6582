// src/bus/context.rs

use crate::bus::router::Router;
use crate::error::BusError;
use crate::message::{DataMap, Message, MessageBuilder, MessageError, MessageId, TypeRegistry, SYNC};
use crate::module::ModuleId;
use crate::runtime::worker::{TaskId, WorkInput, WorkResult};

/// What a handler, sender callback or finalizer may do while it runs.
///
/// A context acts on behalf of one module (or the core, for finalizers of
/// core-sent messages); sends made through it carry that source.
pub struct Context<'a> {
  router: &'a mut Router,
  origin: Option<ModuleId>,
}

impl<'a> Context<'a> {
  pub(crate) fn new(router: &'a mut Router, origin: Option<ModuleId>) -> Self {
    Self { router, origin }
  }

  /// The module this context acts for, or `None` for the core.
  pub fn origin(&self) -> Option<ModuleId> {
    self.origin
  }

  pub fn module_name(&self) -> &str {
    match self.origin {
      Some(id) => self.router.names.get(id.0).map(|n| &**n).unwrap_or("core"),
      None => "core",
    }
  }

  pub fn registry(&self) -> &TypeRegistry {
    &self.router.registry
  }

  /// Validates and sends a message from this context's module.
  pub fn send(&mut self, builder: MessageBuilder) -> Result<MessageId, BusError> {
    self.router.send(self.origin, builder)
  }

  /// Sends a `sync` barrier; `then` runs once everything sent before it is finalized.
  pub fn barrier<F>(&mut self, then: F) -> Result<MessageId, BusError>
  where
    F: FnOnce(&Message, &mut Context<'_>) + Send + 'static,
  {
    self.send(Message::builder(SYNC).sync(true).finalizer(then))
  }

  /// Adds a response to `msg` from this context's module.
  pub fn respond(&mut self, msg: &Message, data: DataMap) -> Result<(), BusError> {
    let name = self.router.name_of(self.origin);
    msg.add_response(&name, data)
  }

  /// Records an error on `msg` from this context's module.
  ///
  /// Meant for unexpected failures. Expected conditions such as "device busy"
  /// belong in response data.
  pub fn report_error(&mut self, msg: &Message, text: impl Into<String>) -> Result<(), BusError> {
    let name = self.router.name_of(self.origin);
    msg.add_error(MessageError::new(&name, text))
  }

  /// Runs `work` on the blocking pool, keeping `msg` alive until it completes.
  ///
  /// `Ok(Some(data))` from the task becomes a response from this module;
  /// an error or panic becomes exactly one `MessageError`.
  pub fn run_worker_task<F>(&mut self, msg: &Message, work: F) -> Result<TaskId, BusError>
  where
    F: FnOnce(WorkInput) -> WorkResult + Send + 'static,
  {
    msg.inc_ref_count()?;
    let owner_name = self.router.name_of(self.origin);
    match self.router.workers.submit(self.origin, owner_name, msg, work) {
      Ok(task_id) => Ok(task_id),
      Err(e) => {
        self.router.release(msg)?;
        Err(e)
      }
    }
  }

  /// Takes an extra hold on `msg` so it outlives the current handler call.
  pub fn retain(&mut self, msg: &Message) -> Result<Retained, BusError> {
    msg.inc_ref_count()?;
    tracing::trace!(msg_id = msg.id(), holds = msg.ref_count(), "Hold retained");
    Ok(Retained {
      message: Some(msg.clone()),
    })
  }

  /// Gives back a hold taken with [`retain`](Self::retain).
  pub fn release(&mut self, mut retained: Retained) -> Result<(), BusError> {
    match retained.message.take() {
      Some(msg) => self.router.release(&msg),
      None => Ok(()),
    }
  }
}

/// An extra hold on a message. Must be handed back through [`Context::release`].
#[must_use = "a retained message never finalizes until it is released"]
#[derive(Debug)]
pub struct Retained {
  message: Option<Message>,
}

impl Retained {
  pub fn message(&self) -> Option<&Message> {
    self.message.as_ref()
  }
}

impl Drop for Retained {
  fn drop(&mut self) {
    if let Some(msg) = self.message.take() {
      tracing::error!(
        msg_id = msg.id(),
        m_type = msg.type_name(),
        "Retained hold dropped without release; message will never finalize"
      );
    }
  }
}
