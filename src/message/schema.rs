// src/message/schema.rs

use crate::error::{Section, ValidationError};
use crate::message::value::{DataMap, KindSet};
use linked_hash_map::LinkedHashMap;

/// Declaration of a single field: whether it must be present and which kinds it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
  pub required: bool,
  pub kinds: KindSet,
}

/// The declared shape of a data or response map.
///
/// An empty schema accepts only an empty map; every field a sender writes
/// must be declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
  fields: LinkedHashMap<String, FieldSpec>,
}

impl Schema {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a field that must be present.
  pub fn required(self, name: &str, kinds: KindSet) -> Self {
    self.field(name, FieldSpec { required: true, kinds })
  }

  /// Adds a field that may be omitted.
  pub fn optional(self, name: &str, kinds: KindSet) -> Self {
    self.field(name, FieldSpec { required: false, kinds })
  }

  pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
    self.fields.insert(name.to_string(), spec);
    self
  }

  pub fn get(&self, name: &str) -> Option<&FieldSpec> {
    self.fields.get(name)
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v))
  }

  /// Checks `data` against this schema.
  ///
  /// Declared fields are checked in declaration order (missing, then kind),
  /// followed by a scan for undeclared fields.
  pub(crate) fn check(&self, m_type: &str, section: Section, data: &DataMap) -> Result<(), ValidationError> {
    for (name, spec) in self.fields.iter() {
      match data.get(name) {
        None if spec.required => {
          return Err(ValidationError::MissingField {
            m_type: m_type.to_string(),
            section,
            field: name.clone(),
          });
        }
        None => {}
        Some(value) => {
          let found = value.kind();
          if !spec.kinds.admits(found) {
            return Err(ValidationError::WrongKind {
              m_type: m_type.to_string(),
              section,
              field: name.clone(),
              expected: spec.kinds,
              found,
            });
          }
        }
      }
    }
    if let Some(extra) = data.keys().find(|k| !self.fields.contains_key(*k)) {
      return Err(ValidationError::UnexpectedField {
        m_type: m_type.to_string(),
        section,
        field: extra.clone(),
      });
    }
    Ok(())
  }
}

/// A registered message type: its name plus the shapes of its data and responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeSchema {
  pub name: String,
  pub data: Schema,
  pub response: Schema,
}

impl MessageTypeSchema {
  pub fn new(name: &str, data: Schema, response: Schema) -> Self {
    Self {
      name: name.to_string(),
      data,
      response,
    }
  }

  pub fn validate_data(&self, data: &DataMap) -> Result<(), ValidationError> {
    self.data.check(&self.name, Section::Data, data)
  }

  pub fn validate_response(&self, data: &DataMap) -> Result<(), ValidationError> {
    self.response.check(&self.name, Section::Response, data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::value::{FieldKind, Value};

  fn power_schema() -> MessageTypeSchema {
    MessageTypeSchema::new(
      "remote set power",
      Schema::new()
        .required("channel", KindSet::STR | KindSet::INT)
        .required("power", KindSet::FLOAT)
        .optional("note", KindSet::STR),
      Schema::new().required("handled", KindSet::BOOL),
    )
  }

  fn data(pairs: &[(&str, Value)]) -> DataMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
  }

  #[test]
  fn accepts_any_member_of_a_kind_union() {
    let schema = power_schema();
    assert!(schema
      .validate_data(&data(&[("channel", Value::from(2)), ("power", Value::from(0.5))]))
      .is_ok());
    assert!(schema
      .validate_data(&data(&[("channel", Value::from("488")), ("power", Value::from(0.5))]))
      .is_ok());
  }

  #[test]
  fn reports_missing_required_field() {
    let err = power_schema()
      .validate_data(&data(&[("channel", Value::from(1))]))
      .unwrap_err();
    assert_eq!(
      err,
      ValidationError::MissingField {
        m_type: "remote set power".into(),
        section: Section::Data,
        field: "power".into(),
      }
    );
  }

  #[test]
  fn reports_wrong_kind_without_int_to_float_coercion() {
    let err = power_schema()
      .validate_data(&data(&[("channel", Value::from(1)), ("power", Value::from(1))]))
      .unwrap_err();
    match err {
      ValidationError::WrongKind { field, found, .. } => {
        assert_eq!(field, "power");
        assert_eq!(found, FieldKind::Int);
      }
      other => panic!("unexpected error {:?}", other),
    }
  }

  #[test]
  fn rejects_undeclared_fields_and_checks_responses() {
    let schema = power_schema();
    let err = schema
      .validate_data(&data(&[
        ("channel", Value::from(1)),
        ("power", Value::from(1.0)),
        ("colour", Value::from("blue")),
      ]))
      .unwrap_err();
    assert!(matches!(err, ValidationError::UnexpectedField { ref field, .. } if field == "colour"));

    assert!(schema.validate_response(&data(&[("handled", Value::from(true))])).is_ok());
    assert!(matches!(
      schema.validate_response(&DataMap::new()),
      Err(ValidationError::MissingField { section: Section::Response, .. })
    ));
  }
}
