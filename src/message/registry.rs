// src/message/registry.rs

use crate::error::{BusError, ValidationError};
use crate::message::schema::{MessageTypeSchema, Schema};
use crate::message::value::DataMap;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Sent by the core once all modules are added, before `START`.
pub const CONFIGURE: &str = "configure";
/// Sent by the core after `CONFIGURE` has been fully processed.
pub const START: &str = "start";
/// Payload-free barrier. Delivered to every mailbox regardless of subscriptions.
pub const SYNC: &str = "sync";

const BUILTIN_TYPES: [&str; 3] = [CONFIGURE, START, SYNC];

/// Returns true for the types every registry starts with.
pub fn is_builtin(name: &str) -> bool {
  BUILTIN_TYPES.contains(&name)
}

/// An interned, registered message type. Cloning is cheap.
#[derive(Clone)]
pub struct MessageType(Arc<MessageTypeSchema>);

impl MessageType {
  pub fn name(&self) -> &str {
    &self.0.name
  }

  pub fn schema(&self) -> &MessageTypeSchema {
    &self.0
  }
}

impl PartialEq for MessageType {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
  }
}

impl Eq for MessageType {}

impl fmt::Debug for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("MessageType").field(&self.0.name).finish()
  }
}

/// Collects message type registrations during start-up.
///
/// Once every module has declared its types, [`build`](Self::build) freezes the
/// table into an immutable [`TypeRegistry`] shared by the bus.
#[derive(Debug)]
pub struct RegistryBuilder {
  types: HashMap<String, MessageType>,
}

impl RegistryBuilder {
  /// Creates a builder pre-populated with the built-in types.
  pub fn new() -> Self {
    let types = BUILTIN_TYPES
      .iter()
      .map(|name| {
        let schema = MessageTypeSchema::new(name, Schema::new(), Schema::new());
        (name.to_string(), MessageType(Arc::new(schema)))
      })
      .collect();
    Self { types }
  }

  /// Registers a message type.
  ///
  /// Fails with [`BusError::DuplicateType`] if `name` is taken and `allow_existing`
  /// is false. With `allow_existing`, an identical re-registration is a no-op and a
  /// different shape replaces the previous one.
  pub fn register_type(
    &mut self,
    name: &str,
    data: Schema,
    response: Schema,
    allow_existing: bool,
  ) -> Result<(), BusError> {
    if !is_valid_type_name(name) {
      return Err(BusError::InvalidTypeName(name.to_string()));
    }
    let schema = MessageTypeSchema::new(name, data, response);
    if let Some(existing) = self.types.get(name) {
      if !allow_existing {
        tracing::error!(m_type = name, "Duplicate message type registration");
        return Err(BusError::DuplicateType(name.to_string()));
      }
      if *existing.schema() == schema {
        tracing::debug!(m_type = name, "Message type re-registered with identical shape");
        return Ok(());
      }
      tracing::warn!(m_type = name, "Replacing message type schema");
    } else {
      tracing::debug!(
        m_type = name,
        data_fields = schema.data.len(),
        response_fields = schema.response.len(),
        "Registered message type"
      );
    }
    self.types.insert(name.to_string(), MessageType(Arc::new(schema)));
    Ok(())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.types.contains_key(name)
  }

  /// Freezes the registrations.
  pub fn build(self) -> Arc<TypeRegistry> {
    tracing::debug!(types = self.types.len(), "Message type registry frozen");
    Arc::new(TypeRegistry { types: self.types })
  }
}

impl Default for RegistryBuilder {
  fn default() -> Self {
    Self::new()
  }
}

/// Immutable lookup table of every message type known to a bus.
#[derive(Debug)]
pub struct TypeRegistry {
  types: HashMap<String, MessageType>,
}

impl TypeRegistry {
  pub fn lookup(&self, name: &str) -> Option<&MessageType> {
    self.types.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.types.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.types.len()
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  /// Registered type names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  /// Validates `data` for type `name` and returns the interned type on success.
  pub fn validate(&self, name: &str, data: &DataMap) -> Result<MessageType, ValidationError> {
    let m_type = self
      .lookup(name)
      .ok_or_else(|| ValidationError::UnknownType(name.to_string()))?;
    m_type.schema().validate_data(data)?;
    Ok(m_type.clone())
  }
}

/// Type names must be non-empty and free of surrounding whitespace.
pub fn is_valid_type_name(name: &str) -> bool {
  !name.is_empty() && name.trim() == name
}
