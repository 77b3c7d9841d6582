// src/message/msg.rs

use crate::bus::Context;
use crate::error::BusError;
use crate::message::registry::MessageType;
use crate::message::value::{DataMap, Value};
use crate::module::Source;
use crate::runtime::{HoldCount, HoldError};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Auto-incrementing message identity, unique per bus.
pub type MessageId = u64;

/// Callback run exactly once, after the last hold on a message is released.
///
/// It runs on the dispatch thread and may send further messages through the
/// context, which is how multi-step workflows are chained.
pub type Finalizer = Box<dyn FnOnce(&Message, &mut Context<'_>) + Send + 'static>;

/// Selects which handler a mailbox runs. It never affects delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Level {
  #[default]
  Control,
  FrameData,
  Other,
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Level::Control => f.write_str("control"),
      Level::FrameData => f.write_str("frame-data"),
      Level::Other => f.write_str("other"),
    }
  }
}

/// A response added to a message by one of its recipients.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  source: String,
  data: DataMap,
}

impl Response {
  pub fn new(source: &str, data: DataMap) -> Self {
    Self {
      source: source.to_string(),
      data,
    }
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn data(&self) -> &DataMap {
    &self.data
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.data.get(key)
  }
}

/// Where a captured failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
  /// A handler returned `Err`.
  Handler,
  /// A handler panicked.
  Panic,
  /// A worker task returned `Err` or panicked.
  Worker,
}

/// Details of a captured failure attached to a [`MessageError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
  pub kind: FaultKind,
  /// For worker failures, a trace taken on the worker thread once the task
  /// has returned or unwound. It shows the pool frames, not the failing frame.
  pub backtrace: Option<String>,
}

/// An error recorded on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageError {
  source: String,
  text: String,
  exception: Option<Exception>,
}

impl MessageError {
  /// A plain error report, with no captured failure behind it.
  pub fn new(source: &str, text: impl Into<String>) -> Self {
    Self {
      source: source.to_string(),
      text: text.into(),
      exception: None,
    }
  }

  pub fn with_exception(source: &str, text: impl Into<String>, kind: FaultKind, backtrace: Option<String>) -> Self {
    Self {
      source: source.to_string(),
      text: text.into(),
      exception: Some(Exception { kind, backtrace }),
    }
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn has_exception(&self) -> bool {
    self.exception.is_some()
  }

  pub fn exception(&self) -> Option<&Exception> {
    self.exception.as_ref()
  }
}

impl fmt::Display for MessageError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.source, self.text)
  }
}

/// Describes a message to send. Validation happens when it is handed to the bus.
///
/// Builders are `Send`, so they can be prepared on any thread and posted
/// through a [`BusHandle`](crate::BusHandle).
pub struct MessageBuilder {
  pub(crate) m_type: String,
  pub(crate) level: Level,
  pub(crate) sync: bool,
  pub(crate) data: DataMap,
  pub(crate) finalizer: Option<Finalizer>,
  pub(crate) errors_handled: bool,
}

impl MessageBuilder {
  pub fn new(m_type: &str) -> Self {
    Self {
      m_type: m_type.to_string(),
      level: Level::Control,
      sync: false,
      data: DataMap::new(),
      finalizer: None,
      errors_handled: false,
    }
  }

  pub fn level(mut self, level: Level) -> Self {
    self.level = level;
    self
  }

  /// A sync message is held back until every previously sent message is finalized.
  pub fn sync(mut self, sync: bool) -> Self {
    self.sync = sync;
    self
  }

  pub fn data(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.data.insert(key.to_string(), value.into());
    self
  }

  pub fn with_data(mut self, data: DataMap) -> Self {
    self.data = data;
    self
  }

  /// Sets the finalizer, replacing any previous one.
  pub fn finalizer<F>(mut self, f: F) -> Self
  where
    F: FnOnce(&Message, &mut Context<'_>) + Send + 'static,
  {
    self.finalizer = Some(Box::new(f));
    self
  }

  /// Marks errors on this message as inspected by the sender.
  ///
  /// Only meaningful for messages sent by the core; module senders decide
  /// through `Module::handle_errors`.
  pub fn errors_handled(mut self, handled: bool) -> Self {
    self.errors_handled = handled;
    self
  }

  pub fn type_name(&self) -> &str {
    &self.m_type
  }

  pub(crate) fn take_finalizer(&mut self) -> Option<Finalizer> {
    self.finalizer.take()
  }
}

impl fmt::Debug for MessageBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MessageBuilder")
      .field("m_type", &self.m_type)
      .field("level", &self.level)
      .field("sync", &self.sync)
      .field("fields", &self.data.len())
      .field("finalizer", &self.finalizer.is_some())
      .finish()
  }
}

struct MessageInner {
  id: MessageId,
  m_type: MessageType,
  level: Level,
  source: Source,
  sync: bool,
  errors_handled: bool,
  data: Arc<DataMap>,
  responses: RefCell<Vec<Rc<Response>>>,
  errors: RefCell<Vec<Rc<MessageError>>>,
  holds: HoldCount,
  finalizer: RefCell<Option<Finalizer>>,
  created_at: Instant,
}

/// A validated message in flight.
///
/// Cloning shares the same message. `Message` is deliberately `!Send`: its
/// responses, errors and hold count are only ever touched on the dispatch
/// thread. Worker tasks see an immutable [`WorkInput`](crate::WorkInput) instead.
#[derive(Clone)]
pub struct Message {
  inner: Rc<MessageInner>,
}

impl Message {
  /// Starts a builder for a message of type `m_type`.
  pub fn builder(m_type: &str) -> MessageBuilder {
    MessageBuilder::new(m_type)
  }

  /// Creates the message with one hold, owned by the sender.
  pub(crate) fn new(id: MessageId, m_type: MessageType, source: Source, builder: MessageBuilder) -> Self {
    Self {
      inner: Rc::new(MessageInner {
        id,
        m_type,
        level: builder.level,
        source,
        sync: builder.sync,
        errors_handled: builder.errors_handled,
        data: Arc::new(builder.data),
        responses: RefCell::new(Vec::new()),
        errors: RefCell::new(Vec::new()),
        holds: HoldCount::new(1),
        finalizer: RefCell::new(builder.finalizer),
        created_at: Instant::now(),
      }),
    }
  }

  pub fn id(&self) -> MessageId {
    self.inner.id
  }

  pub fn m_type(&self) -> &MessageType {
    &self.inner.m_type
  }

  pub fn type_name(&self) -> &str {
    self.inner.m_type.name()
  }

  pub fn is_type(&self, name: &str) -> bool {
    self.inner.m_type.name() == name
  }

  pub fn level(&self) -> Level {
    self.inner.level
  }

  pub fn source(&self) -> &Source {
    &self.inner.source
  }

  pub fn is_sync(&self) -> bool {
    self.inner.sync
  }

  pub(crate) fn errors_handled(&self) -> bool {
    self.inner.errors_handled
  }

  /// The validated data. It never changes after the send.
  pub fn data(&self) -> &DataMap {
    &self.inner.data
  }

  pub(crate) fn shared_data(&self) -> Arc<DataMap> {
    Arc::clone(&self.inner.data)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.inner.data.get(key)
  }

  /// Appends a response after validating it against the type's response schema.
  pub fn add_response(&self, source: &str, data: DataMap) -> Result<(), BusError> {
    self.ensure_in_flight()?;
    self.inner.m_type.schema().validate_response(&data)?;
    tracing::trace!(msg_id = self.id(), m_type = self.type_name(), source, "Response added");
    self.inner.responses.borrow_mut().push(Rc::new(Response::new(source, data)));
    Ok(())
  }

  pub fn add_error(&self, error: MessageError) -> Result<(), BusError> {
    self.ensure_in_flight()?;
    tracing::trace!(
      msg_id = self.id(),
      m_type = self.type_name(),
      source = error.source(),
      has_exception = error.has_exception(),
      "Error added"
    );
    self.inner.errors.borrow_mut().push(Rc::new(error));
    Ok(())
  }

  /// Snapshot of the responses, in the order they were added.
  pub fn responses(&self) -> Vec<Rc<Response>> {
    self.inner.responses.borrow().clone()
  }

  pub fn has_responses(&self) -> bool {
    !self.inner.responses.borrow().is_empty()
  }

  /// Snapshot of the errors, in the order they were added.
  pub fn errors(&self) -> Vec<Rc<MessageError>> {
    self.inner.errors.borrow().clone()
  }

  pub fn has_errors(&self) -> bool {
    !self.inner.errors.borrow().is_empty()
  }

  /// Current number of holders.
  pub fn ref_count(&self) -> usize {
    self.inner.holds.count()
  }

  /// True once the hold count has reached zero.
  pub fn is_finalized(&self) -> bool {
    self.inner.holds.is_consumed()
  }

  pub fn created_at(&self) -> Instant {
    self.inner.created_at
  }

  pub fn age(&self) -> Duration {
    self.inner.created_at.elapsed()
  }

  pub(crate) fn inc_ref_count(&self) -> Result<(), BusError> {
    self.inner.holds.add(1).map_err(|source| self.hold_error(source))
  }

  /// Releases one hold. Returns true for the release that reached zero.
  pub(crate) fn dec_ref_count(&self) -> Result<bool, BusError> {
    self.inner.holds.release().map_err(|source| self.hold_error(source))
  }

  pub(crate) fn take_finalizer(&self) -> Option<Finalizer> {
    self.inner.finalizer.borrow_mut().take()
  }

  fn ensure_in_flight(&self) -> Result<(), BusError> {
    if self.is_finalized() {
      return Err(BusError::Finalized(self.id()));
    }
    Ok(())
  }

  fn hold_error(&self, source: HoldError) -> BusError {
    tracing::error!(msg_id = self.id(), m_type = self.type_name(), error = %source, "Hold accounting violated");
    BusError::Hold { id: self.id(), source }
  }
}

impl PartialEq for Message {
  fn eq(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
      .field("id", &self.inner.id)
      .field("m_type", &self.inner.m_type.name())
      .field("level", &self.inner.level)
      .field("source", &self.inner.source.name())
      .field("sync", &self.inner.sync)
      .field("holds", &self.inner.holds.count())
      .field("responses", &self.inner.responses.borrow().len())
      .field("errors", &self.inner.errors.borrow().len())
      .finish()
  }
}
