// src/runtime/command.rs

use crate::error::BusError;
use crate::message::{MessageBuilder, MessageId};
use crate::module::ModuleId;
use crate::runtime::worker::{TaskId, WorkOutcome};

use tokio::sync::oneshot;

/// Sending end of the dispatch loop's command queue. Cloneable and `Send`.
pub type CommandSender = async_channel::Sender<Command>;

/// Receiving end, owned by the dispatch loop.
pub type CommandReceiver = async_channel::Receiver<Command>;

/// Events posted to the dispatch loop from other threads or tasks.
///
/// This is the only way anything off the dispatch thread affects bus state.
#[derive(Debug)]
pub enum Command {
  // --- From BusHandle ---
  /// Validate and send a message. `origin` of `None` means the core.
  Send {
    origin: Option<ModuleId>,
    builder: MessageBuilder,
    reply_tx: Option<oneshot::Sender<Result<MessageId, BusError>>>,
  },
  /// Stop accepting sends, drain, run module cleanup and return from `Bus::run`.
  Stop,

  // --- From the worker pool ---
  /// A worker task finished. Applied on the dispatch thread.
  WorkerDone { task_id: TaskId, outcome: WorkOutcome },
}

impl Command {
  /// Returns a short string representation of the command variant name.
  pub fn variant_name(&self) -> &'static str {
    match self {
      Command::Send { .. } => "Send",
      Command::Stop => "Stop",
      Command::WorkerDone { .. } => "WorkerDone",
    }
  }
}

/// Creates the dispatch loop's command queue.
pub fn command_queue() -> (CommandSender, CommandReceiver) {
  async_channel::unbounded()
}
