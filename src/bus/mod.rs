// src/bus/mod.rs

//! The dispatch loop.
//!
//! A [`Bus`] owns every module and mailbox. [`Bus::run`] is a single future
//! that applies posted commands, drains one message from one mailbox per tick
//! (yielding in between) and finalizes messages whose last hold was released.

pub mod config;
pub mod context;
pub mod handle;
pub(crate) mod router;

pub use config::{BusConfig, FaultPolicy, LevelPolicies};
pub use context::{Context, Retained};
pub use handle::{BusHandle, Outcome};

use crate::error::BusError;
use crate::message::{FaultKind, Message, MessageBuilder, MessageError, MessageId, TypeRegistry, CONFIGURE, START, SYNC};
use crate::module::{self, Module, ModuleId, Subscription};
use crate::runtime::monitor::{BusEvent, MonitorReceiver};
use crate::runtime::worker::{panic_message, TaskId, WorkOutcome};
use crate::runtime::{command_queue, Command, CommandReceiver, CommandSender};
use router::Router;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

struct ModuleSlot {
  name: Arc<str>,
  module: Box<dyn Module>,
}

pub struct Bus {
  router: Router,
  modules: Vec<ModuleSlot>,
  commands_tx: CommandSender,
  commands_rx: CommandReceiver,
  stopping: bool,
  cleaned_up: bool,
  fatal: Option<BusError>,
}

impl Bus {
  pub fn new(registry: Arc<TypeRegistry>) -> Self {
    Self::with_config(registry, BusConfig::default())
  }

  pub fn with_config(registry: Arc<TypeRegistry>, config: BusConfig) -> Self {
    let (commands_tx, commands_rx) = command_queue();
    tracing::debug!(types = registry.len(), ?config, "Creating bus");
    Self {
      router: Router::new(registry, config, commands_tx.clone()),
      modules: Vec::new(),
      commands_tx,
      commands_rx,
      stopping: false,
      cleaned_up: false,
      fatal: None,
    }
  }

  /// Adds a module that receives every message type.
  pub fn add_module<M: Module + 'static>(&mut self, module: M) -> ModuleId {
    self.add_module_with(module, Subscription::All)
  }

  pub fn add_module_with<M: Module + 'static>(&mut self, module: M, subscription: Subscription) -> ModuleId {
    let name: Arc<str> = Arc::from(module.name());
    let id = self.router.add_mailbox(name.clone(), subscription);
    tracing::debug!(module = %name, %id, "Module added");
    self.modules.push(ModuleSlot {
      name,
      module: Box::new(module),
    });
    id
  }

  pub fn handle(&self) -> BusHandle {
    BusHandle::new(self.commands_tx.clone())
  }

  /// Subscribes to bus events. Events are dropped when the channel is full.
  pub fn monitor(&mut self) -> MonitorReceiver {
    self.router.monitor.subscribe()
  }

  pub fn registry(&self) -> &Arc<TypeRegistry> {
    &self.router.registry
  }

  pub fn config(&self) -> &BusConfig {
    &self.router.config
  }

  pub fn module_name(&self, id: ModuleId) -> Option<&str> {
    self.modules.get(id.0).map(|slot| &*slot.name)
  }

  /// Sends a message from the core. Delivery happens when the loop runs.
  pub fn send(&mut self, builder: MessageBuilder) -> Result<MessageId, BusError> {
    let id = self.router.send(None, builder)?;
    self.settle();
    Ok(id)
  }

  /// Sends a message on behalf of a module.
  pub fn send_from(&mut self, origin: ModuleId, builder: MessageBuilder) -> Result<MessageId, BusError> {
    let id = self.router.send(Some(origin), builder)?;
    self.settle();
    Ok(id)
  }

  /// Sends a `sync` barrier from the core; `then` runs once everything sent before it is finalized.
  pub fn barrier<F>(&mut self, then: F) -> Result<MessageId, BusError>
  where
    F: FnOnce(&Message, &mut Context<'_>) + Send + 'static,
  {
    self.send(Message::builder(SYNC).sync(true).finalizer(then))
  }

  /// Queues `configure`, then `start` as a sync message so it is only
  /// delivered once every module has finished configuring.
  pub fn boot(&mut self) -> Result<(), BusError> {
    tracing::info!(modules = self.modules.len(), "Booting bus");
    self.send(Message::builder(CONFIGURE))?;
    self.send(Message::builder(START).sync(true))?;
    Ok(())
  }

  /// Messages delivered but not yet finalized.
  pub fn in_flight(&self) -> usize {
    self.router.in_flight.len()
  }

  pub fn mailbox_depth(&self, id: ModuleId) -> Option<usize> {
    self.router.mailboxes.get(id.0).map(|m| m.len())
  }

  pub fn pending_workers(&self) -> usize {
    self.router.workers.pending()
  }

  /// Drives the bus until it is idle: no mailbox has work, no worker task is
  /// running and nothing waits to be finalized.
  ///
  /// Fails with [`BusError::Stalled`] if messages are still held once nothing
  /// is left to run, e.g. a [`Retained`] that is never released.
  pub async fn run_until_idle(&mut self) -> Result<(), BusError> {
    self.drive(true).await
  }

  /// Drives the bus until a [`BusHandle::shutdown`] arrives and the bus is idle,
  /// then runs every module's cleanup.
  ///
  /// Returns early with the error on a propagated handler failure or, with
  /// `fail_fast`, on a message finalized with unhandled errors.
  pub async fn run(&mut self) -> Result<(), BusError> {
    tracing::info!(modules = self.modules.len(), "Bus running");
    self.drive(false).await?;
    self.cleanup();
    Ok(())
  }

  /// Stops accepting handle sends, drains to idle and runs module cleanup.
  pub async fn shutdown(&mut self) -> Result<(), BusError> {
    self.stopping = true;
    self.drive(true).await?;
    self.cleanup();
    Ok(())
  }

  async fn drive(&mut self, until_idle: bool) -> Result<(), BusError> {
    loop {
      while let Ok(command) = self.commands_rx.try_recv() {
        self.apply_command(command);
      }
      self.check_fatal()?;

      if self.drain_step()? {
        self.check_fatal()?;
        tokio::task::yield_now().await;
        continue;
      }

      if until_idle || self.stopping {
        if self.router.is_quiescent() {
          tracing::debug!("Bus idle");
          return Ok(());
        }
        if self.router.nothing_runnable() {
          let err = self.router.stalled();
          tracing::error!(error = %err, "Bus stalled");
          return Err(err);
        }
      }

      // Nothing runnable: wait for a worker result, a handle send or a stop.
      match self.commands_rx.recv().await {
        Ok(command) => self.apply_command(command),
        Err(_) => return Err(BusError::Closed),
      }
    }
  }

  fn check_fatal(&mut self) -> Result<(), BusError> {
    match self.fatal.take() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn apply_command(&mut self, command: Command) {
    tracing::trace!(command = command.variant_name(), "Applying command");
    match command {
      Command::Send {
        origin,
        builder,
        reply_tx,
      } => {
        let result = if self.stopping {
          Err(BusError::Closed)
        } else {
          self.router.send(origin, builder)
        };
        if let Some(reply_tx) = reply_tx {
          let _ = reply_tx.send(result);
        } else if let Err(e) = result {
          tracing::warn!(error = %e, "Posted send failed with no one to report to");
        }
        self.settle();
      }
      Command::Stop => {
        tracing::info!("Bus stop requested");
        self.stopping = true;
      }
      Command::WorkerDone { task_id, outcome } => self.complete_worker(task_id, outcome),
    }
  }

  fn complete_worker(&mut self, task_id: TaskId, outcome: WorkOutcome) {
    let Some(task) = self.router.workers.complete(task_id) else {
      tracing::error!(task_id, "Completion for unknown worker task");
      return;
    };
    let msg = task.message;
    let module = task.owner_name;
    let recorded = match outcome {
      WorkOutcome::Completed(None) => Ok(()),
      WorkOutcome::Completed(Some(data)) => match msg.add_response(&module, data) {
        Ok(()) => Ok(()),
        Err(e) => msg.add_error(MessageError::with_exception(
          &module,
          format!("worker returned an invalid response: {}", e),
          FaultKind::Worker,
          None,
        )),
      },
      WorkOutcome::Failed { text, backtrace } | WorkOutcome::Panicked { text, backtrace } => {
        tracing::error!(task_id, msg_id = msg.id(), module = %module, error = %text, "Worker task failed");
        self.router.monitor.publish(BusEvent::WorkerFailed {
          module: module.to_string(),
          id: msg.id(),
          task_id,
          text: text.clone(),
        });
        msg.add_error(MessageError::with_exception(&module, text, FaultKind::Worker, backtrace))
      }
    };
    if let Err(e) = recorded {
      tracing::error!(task_id, msg_id = msg.id(), error = %e, "Could not record worker outcome");
    }
    tracing::trace!(task_id, msg_id = msg.id(), owner = ?task.owner, "Worker hold released");
    if let Err(e) = self.router.release(&msg) {
      self.fatal.get_or_insert(e);
    }
    self.settle();
  }

  /// Runs one drain step of the next ready mailbox. Returns false if none was ready.
  fn drain_step(&mut self) -> Result<bool, BusError> {
    let Some(id) = self.router.ready.pop_front() else {
      return Ok(false);
    };
    let Some(msg) = self.router.mailboxes[id.0].pop() else {
      self.router.mailboxes[id.0].finish_step();
      return Ok(true);
    };
    tracing::trace!(module = %self.modules[id.0].name, msg_id = msg.id(), m_type = msg.type_name(), level = %msg.level(), "Drain step");

    let dispatched = self.dispatch(id, &msg);
    self.router.release(&msg)?;
    if self.router.mailboxes[id.0].finish_step() {
      self.router.ready.push_back(id);
    }
    self.settle();
    dispatched.map(|()| true)
  }

  /// Runs the module's handler for `msg` under its level's fault policy.
  fn dispatch(&mut self, id: ModuleId, msg: &Message) -> Result<(), BusError> {
    let policy = self.router.config.fault_policy.for_level(msg.level());
    let slot = &mut self.modules[id.0];
    let mut ctx = Context::new(&mut self.router, Some(id));

    let failure = match policy {
      FaultPolicy::Propagate => match module::process(slot.module.as_mut(), msg, &mut ctx) {
        Ok(()) => return Ok(()),
        Err(e) => {
          tracing::error!(module = %slot.name, msg_id = msg.id(), m_type = msg.type_name(), error = %e, "Handler failed");
          return Err(BusError::HandlerFailed {
            module: slot.name.to_string(),
            m_type: msg.type_name().to_string(),
            text: e.to_string(),
          });
        }
      },
      FaultPolicy::Capture => {
        match panic::catch_unwind(AssertUnwindSafe(|| module::process(slot.module.as_mut(), msg, &mut ctx))) {
          Ok(Ok(())) => return Ok(()),
          Ok(Err(e)) => (e.to_string(), FaultKind::Handler),
          Err(payload) => (panic_message(payload.as_ref()), FaultKind::Panic),
        }
      }
    };

    let (text, kind) = failure;
    tracing::error!(module = %slot.name, msg_id = msg.id(), m_type = msg.type_name(), error = %text, ?kind, "Handler failure captured");
    self.router.monitor.publish(BusEvent::HandlerFailed {
      module: slot.name.to_string(),
      id: msg.id(),
      m_type: msg.type_name().to_string(),
      text: text.clone(),
    });
    msg.add_error(MessageError::with_exception(&slot.name, text, kind, None))
  }

  /// Finalizes every message whose last hold was released, in release order.
  fn settle(&mut self) {
    while let Some(msg) = self.router.finished.pop_front() {
      if let Err(e) = self.finalize(&msg) {
        self.fatal.get_or_insert(e);
      }
    }
  }

  /// Sender callbacks, then the finalizer, then unblock any parked sync message.
  fn finalize(&mut self, msg: &Message) -> Result<(), BusError> {
    let origin = msg.source().module_id();
    let has_errors = msg.has_errors();
    let mut handled = !has_errors || msg.errors_handled();

    if let Some(id) = origin {
      if let Some(slot) = self.modules.get_mut(id.0) {
        let mut ctx = Context::new(&mut self.router, Some(id));
        if msg.has_responses() {
          slot.module.handle_responses(msg, &mut ctx);
        }
        if has_errors {
          handled = slot.module.handle_errors(msg, &mut ctx);
        }
      }
    }

    if let Some(finalizer) = msg.take_finalizer() {
      let mut ctx = Context::new(&mut self.router, origin);
      finalizer(msg, &mut ctx);
    }

    if !self.router.retire(msg.id()) {
      tracing::error!(msg_id = msg.id(), "Finalized a message that was not in flight");
    }
    tracing::debug!(
      msg_id = msg.id(),
      m_type = msg.type_name(),
      responses = msg.responses().len(),
      errors = msg.errors().len(),
      age_us = msg.age().as_micros() as u64,
      "Message finalized"
    );
    self.router.monitor.publish(BusEvent::Finalized {
      id: msg.id(),
      m_type: msg.type_name().to_string(),
      responses: msg.responses().len(),
      errors: msg.errors().len(),
    });

    let unhandled = if handled {
      None
    } else {
      let errors = msg.errors();
      let first = errors.first().map(|e| e.to_string()).unwrap_or_default();
      tracing::error!(
        msg_id = msg.id(),
        m_type = msg.type_name(),
        source = msg.source().name(),
        count = errors.len(),
        first = %first,
        "Message finalized with unhandled errors"
      );
      Some(BusError::UnhandledErrors {
        id: msg.id(),
        m_type: msg.type_name().to_string(),
        source_name: msg.source().name().to_string(),
        count: errors.len(),
        first,
      })
    };

    self.router.pump()?;
    match unhandled {
      Some(e) if self.router.config.fail_fast => Err(e),
      _ => Ok(()),
    }
  }

  fn cleanup(&mut self) {
    if self.cleaned_up {
      return;
    }
    self.cleaned_up = true;
    for slot in self.modules.iter_mut() {
      tracing::debug!(module = %slot.name, "Module cleanup");
      slot.module.cleanup();
    }
    self.commands_rx.close();
    self.router.monitor.publish(BusEvent::ShutDown);
    tracing::info!("Bus shut down");
  }
}
