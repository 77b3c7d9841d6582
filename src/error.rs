// src/error.rs

use crate::message::KindSet;
use crate::message::FieldKind;
use crate::runtime::HoldError;
use thiserror::Error;

/// Error type returned by handler and worker code.
///
/// Handlers report unexpected failures through this type; the bus turns them
/// into `MessageError` entries on the message instead of unwinding the stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which part of a message type's schema a check ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
  Data,
  Response,
}

impl std::fmt::Display for Section {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Section::Data => f.write_str("data"),
      Section::Response => f.write_str("response"),
    }
  }
}

/// A schema mismatch. Returned to the sender before any delivery happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("Unknown message type '{0}'")]
  UnknownType(String),

  #[error("Message '{m_type}' is missing required {section} field '{field}'")]
  MissingField {
    m_type: String,
    section: Section,
    field: String,
  },

  #[error("Message '{m_type}' {section} field '{field}' expected {expected}, found {found}")]
  WrongKind {
    m_type: String,
    section: Section,
    field: String,
    expected: KindSet,
    found: FieldKind,
  },

  #[error("Message '{m_type}' has undeclared {section} field '{field}'")]
  UnexpectedField {
    m_type: String,
    section: Section,
    field: String,
  },
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BusError {
  // --- Registration Errors ---
  #[error("Message type '{0}' is already registered")]
  DuplicateType(String),
  #[error("Invalid message type name: {0:?}")]
  InvalidTypeName(String),

  // --- Send Errors ---
  #[error("Message validation failed: {0}")]
  Validation(#[from] ValidationError),

  // --- Message State Errors ---
  #[error("Message {0} has already been finalized")]
  Finalized(u64),
  #[error("Hold accounting violated on message {id}: {source}")]
  Hold {
    id: u64,
    #[source]
    source: HoldError,
  },

  // --- Fail-fast Errors ---
  #[error("Module '{module}' failed handling '{m_type}': {text}")]
  HandlerFailed {
    module: String,
    m_type: String,
    text: String,
  },
  #[error("Message {id} ('{m_type}') from '{source_name}' finalized with {count} unhandled error(s), first: {first}")]
  UnhandledErrors {
    id: u64,
    m_type: String,
    source_name: String,
    count: usize,
    first: String,
  },

  // --- Lifecycle Errors ---
  #[error("Unknown module id {0}")]
  UnknownModule(usize),
  #[error("Worker tasks need a running Tokio runtime")]
  NoRuntime,
  #[error("The bus is shut down")]
  Closed,
  #[error("Bus stalled with messages {in_flight:?} held and nothing left to run (parked sync message: {parked:?})")]
  Stalled {
    parked: Option<u64>,
    in_flight: Vec<u64>,
  },
}
