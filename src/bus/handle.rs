// src/bus/handle.rs

use crate::error::BusError;
use crate::message::{MessageBuilder, MessageError, MessageId, Response};
use crate::module::ModuleId;
use crate::runtime::{Command, CommandSender};

use tokio::sync::oneshot;

/// Result of a [`BusHandle::request`]: what the message collected before it finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
  pub id: MessageId,
  pub m_type: String,
  pub responses: Vec<Response>,
  pub errors: Vec<MessageError>,
}

impl Outcome {
  pub fn is_ok(&self) -> bool {
    self.errors.is_empty()
  }
}

/// A `Send + Sync` handle for talking to a bus from other tasks and threads.
///
/// Everything goes through the dispatch loop's command queue; the loop must be
/// running (`Bus::run` or `Bus::run_until_idle`) for calls to complete.
#[derive(Debug, Clone)]
pub struct BusHandle {
  commands_tx: CommandSender,
}

impl BusHandle {
  pub(crate) fn new(commands_tx: CommandSender) -> Self {
    Self { commands_tx }
  }

  /// Sends a message from the core. Resolves once it is validated and queued.
  pub async fn send(&self, builder: MessageBuilder) -> Result<MessageId, BusError> {
    self.post(None, builder).await
  }

  /// Sends a message on behalf of a module.
  pub async fn send_from(&self, origin: ModuleId, builder: MessageBuilder) -> Result<MessageId, BusError> {
    self.post(Some(origin), builder).await
  }

  /// Sends a message from the core and waits until it is finalized.
  ///
  /// Errors on the message are returned in the [`Outcome`] and count as handled.
  /// A finalizer already set on `builder` runs first.
  pub async fn request(&self, mut builder: MessageBuilder) -> Result<Outcome, BusError> {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let chained = builder.take_finalizer();
    let builder = builder.errors_handled(true).finalizer(move |msg, ctx| {
      if let Some(then) = chained {
        then(msg, ctx);
      }
      let outcome = Outcome {
        id: msg.id(),
        m_type: msg.type_name().to_string(),
        responses: msg.responses().iter().map(|r| (**r).clone()).collect(),
        errors: msg.errors().iter().map(|e| (**e).clone()).collect(),
      };
      if outcome_tx.send(outcome).is_err() {
        tracing::debug!(msg_id = msg.id(), "Request outcome receiver dropped");
      }
    });
    self.post(None, builder).await?;
    outcome_rx.await.map_err(|_| BusError::Closed)
  }

  /// Asks `Bus::run` to stop once the bus is idle.
  pub async fn shutdown(&self) -> Result<(), BusError> {
    tracing::debug!("Requesting bus shutdown");
    self.commands_tx.send(Command::Stop).await.map_err(|_| BusError::Closed)
  }

  async fn post(&self, origin: Option<ModuleId>, builder: MessageBuilder) -> Result<MessageId, BusError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .commands_tx
      .send(Command::Send {
        origin,
        builder,
        reply_tx: Some(reply_tx),
      })
      .await
      .map_err(|_| BusError::Closed)?;
    reply_rx.await.map_err(|_| BusError::Closed)?
  }
}
