//! halbus - a typed, schema-validated message bus for instrument-control modules.
//!
//! Modules exchange [`Message`]s through per-module FIFO mailboxes drained by a
//! single-threaded cooperative dispatch loop ([`Bus::run`]). Every message type
//! is registered up front with a [`Schema`] for its data and responses, and a
//! send that does not match is rejected before any delivery. Each message counts
//! its holders; when the last one lets go its finalizer runs exactly once.
//! Blocking work goes to a thread pool through [`Context::run_worker_task`] and
//! its result is applied back on the dispatch thread.
//!
//! ```no_run
//! use halbus::{Bus, KindSet, Message, RegistryBuilder, Schema};
//!
//! # async fn demo() -> Result<(), halbus::BusError> {
//! let mut types = RegistryBuilder::new();
//! types.register_type("ping", Schema::new().required("value", KindSet::INT), Schema::new(), false)?;
//! let mut bus = Bus::new(types.build());
//! bus.send(Message::builder("ping").data("value", 5))?;
//! bus.run_until_idle().await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod message;
pub mod module;
pub mod runtime;

pub use bus::{Bus, BusConfig, BusHandle, Context, FaultPolicy, LevelPolicies, Outcome, Retained};
pub use error::{BoxError, BusError, Section, ValidationError};
pub use message::{
  DataMap, Exception, FaultKind, FieldKind, FieldSpec, KindSet, Level, Message, MessageBuilder, MessageError, MessageId,
  MessageType, RegistryBuilder, Response, Schema, TypeRegistry, Value, CONFIGURE, START, SYNC,
};
pub use module::{HandlerResult, Module, ModuleId, Source, Subscription};
pub use runtime::{BusEvent, MonitorReceiver, TaskId, WorkInput, WorkResult};

