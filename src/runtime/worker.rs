// src/runtime/worker.rs

//! Offload of blocking handler work onto Tokio's blocking thread pool.
//!
//! A task never sees the `Message` itself. It gets an immutable [`WorkInput`]
//! and its outcome is posted back to the dispatch loop as a
//! [`Command::WorkerDone`], where the message is updated and the task's hold
//! released.

use crate::error::{BoxError, BusError};
use crate::message::{DataMap, Message, MessageId};
use crate::module::ModuleId;
use crate::runtime::command::{Command, CommandSender};

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub type TaskId = u64;

/// What a worker task returns: optional response data, or an error.
pub type WorkResult = Result<Option<DataMap>, BoxError>;

/// The read-only view of a message handed to a worker thread.
#[derive(Debug, Clone)]
pub struct WorkInput {
  pub task_id: TaskId,
  pub message_id: MessageId,
  pub m_type: String,
  pub data: Arc<DataMap>,
}

impl WorkInput {
  pub fn get(&self, key: &str) -> Option<&crate::message::Value> {
    self.data.get(key)
  }
}

/// How a worker task ended.
#[derive(Debug)]
pub enum WorkOutcome {
  Completed(Option<DataMap>),
  Failed { text: String, backtrace: Option<String> },
  Panicked { text: String, backtrace: Option<String> },
}

/// A submitted task still running on the pool. Holds one reference on its message.
#[derive(Debug)]
pub(crate) struct PendingTask {
  pub message: Message,
  pub owner: Option<ModuleId>,
  pub owner_name: Arc<str>,
}

#[derive(Debug)]
pub(crate) struct WorkerPool {
  commands_tx: CommandSender,
  next_task: TaskId,
  capture_backtraces: bool,
  pending: HashMap<TaskId, PendingTask>,
}

impl WorkerPool {
  pub fn new(commands_tx: CommandSender, capture_backtraces: bool) -> Self {
    Self {
      commands_tx,
      next_task: 1,
      capture_backtraces,
      pending: HashMap::new(),
    }
  }

  /// Runs `work` on the blocking pool.
  ///
  /// The caller must already have taken a hold on `message` for the task.
  pub fn submit<F>(
    &mut self,
    owner: Option<ModuleId>,
    owner_name: Arc<str>,
    message: &Message,
    work: F,
  ) -> Result<TaskId, BusError>
  where
    F: FnOnce(WorkInput) -> WorkResult + Send + 'static,
  {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
    let task_id = self.next_task;
    self.next_task += 1;

    let input = WorkInput {
      task_id,
      message_id: message.id(),
      m_type: message.type_name().to_string(),
      data: message.shared_data(),
    };
    let commands_tx = self.commands_tx.clone();
    let capture_backtraces = self.capture_backtraces;
    let module = owner_name.clone();

    tracing::debug!(task_id, msg_id = message.id(), module = %owner_name, "Submitting worker task");
    handle.spawn_blocking(move || {
      let result = panic::catch_unwind(AssertUnwindSafe(|| work(input)));
      // Taken after the task has unwound, so it ends at this closure.
      let backtrace = || capture_backtraces.then(|| Backtrace::force_capture().to_string());
      let outcome = match result {
        Ok(Ok(data)) => WorkOutcome::Completed(data),
        Ok(Err(e)) => WorkOutcome::Failed {
          text: e.to_string(),
          backtrace: backtrace(),
        },
        Err(payload) => WorkOutcome::Panicked {
          text: panic_message(payload.as_ref()),
          backtrace: backtrace(),
        },
      };
      tracing::trace!(task_id, module = %module, "Worker task finished, posting result");
      if commands_tx.send_blocking(Command::WorkerDone { task_id, outcome }).is_err() {
        tracing::warn!(task_id, module = %module, "Bus dropped before worker task completed");
      }
    });

    self.pending.insert(
      task_id,
      PendingTask {
        message: message.clone(),
        owner,
        owner_name,
      },
    );
    Ok(task_id)
  }

  /// Removes a finished task from the pending table.
  pub fn complete(&mut self, task_id: TaskId) -> Option<PendingTask> {
    self.pending.remove(&task_id)
  }

  pub fn pending(&self) -> usize {
    self.pending.len()
  }
}

/// Extracts the text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
