// src/message/value.rs

use bitflags::bitflags;
use bytes::Bytes;
use linked_hash_map::LinkedHashMap;
use std::fmt;

/// Field name -> value map carried by messages and responses.
/// Insertion order is preserved so logs show fields the way the sender wrote them.
pub type DataMap = LinkedHashMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  /// Raw payloads such as camera frames. Cloning is cheap (reference counted).
  Bytes(Bytes),
  List(Vec<Value>),
  Map(DataMap),
}

/// The kind of a [`Value`], used by schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
  Bool,
  Int,
  Float,
  Str,
  Bytes,
  List,
  Map,
}

bitflags! {
  /// The set of kinds a schema field accepts, e.g. `KindSet::STR | KindSet::INT`.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct KindSet: u8 {
    const BOOL = 0b0000_0001;
    const INT = 0b0000_0010;
    const FLOAT = 0b0000_0100;
    const STR = 0b0000_1000;
    const BYTES = 0b0001_0000;
    const LIST = 0b0010_0000;
    const MAP = 0b0100_0000;
    const ANY = Self::BOOL.bits()
      | Self::INT.bits()
      | Self::FLOAT.bits()
      | Self::STR.bits()
      | Self::BYTES.bits()
      | Self::LIST.bits()
      | Self::MAP.bits();
  }
}

impl Value {
  pub fn kind(&self) -> FieldKind {
    match self {
      Value::Bool(_) => FieldKind::Bool,
      Value::Int(_) => FieldKind::Int,
      Value::Float(_) => FieldKind::Float,
      Value::Str(_) => FieldKind::Str,
      Value::Bytes(_) => FieldKind::Bytes,
      Value::List(_) => FieldKind::List,
      Value::Map(_) => FieldKind::Map,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  /// Integers widen to floats here; schemas still keep the two kinds apart.
  pub fn as_float(&self) -> Option<f64> {
    match self {
      Value::Float(f) => Some(*f),
      Value::Int(i) => Some(*i as f64),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s.as_str()),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&Bytes> {
    match self {
      Value::Bytes(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(l) => Some(l.as_slice()),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&DataMap> {
    match self {
      Value::Map(m) => Some(m),
      _ => None,
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v as i64)
  }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Value::Int(v as i64)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Float(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Str(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Str(v)
  }
}

impl From<Bytes> for Value {
  fn from(v: Bytes) -> Self {
    Value::Bytes(v)
  }
}

impl From<Vec<Value>> for Value {
  fn from(v: Vec<Value>) -> Self {
    Value::List(v)
  }
}

impl From<DataMap> for Value {
  fn from(v: DataMap) -> Self {
    Value::Map(v)
  }
}

impl FieldKind {
  pub fn name(&self) -> &'static str {
    match self {
      FieldKind::Bool => "bool",
      FieldKind::Int => "int",
      FieldKind::Float => "float",
      FieldKind::Str => "str",
      FieldKind::Bytes => "bytes",
      FieldKind::List => "list",
      FieldKind::Map => "map",
    }
  }
}

impl fmt::Display for FieldKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl From<FieldKind> for KindSet {
  fn from(kind: FieldKind) -> Self {
    match kind {
      FieldKind::Bool => KindSet::BOOL,
      FieldKind::Int => KindSet::INT,
      FieldKind::Float => KindSet::FLOAT,
      FieldKind::Str => KindSet::STR,
      FieldKind::Bytes => KindSet::BYTES,
      FieldKind::List => KindSet::LIST,
      FieldKind::Map => KindSet::MAP,
    }
  }
}

impl KindSet {
  /// Checks whether a value of `kind` satisfies this set.
  pub fn admits(&self, kind: FieldKind) -> bool {
    self.contains(KindSet::from(kind))
  }
}

impl fmt::Display for KindSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if *self == KindSet::ANY {
      return f.write_str("any");
    }
    const ORDER: [FieldKind; 7] = [
      FieldKind::Bool,
      FieldKind::Int,
      FieldKind::Float,
      FieldKind::Str,
      FieldKind::Bytes,
      FieldKind::List,
      FieldKind::Map,
    ];
    let names: Vec<&str> = ORDER.iter().filter(|k| self.admits(**k)).map(|k| k.name()).collect();
    if names.is_empty() {
      f.write_str("nothing")
    } else {
      f.write_str(&names.join("|"))
    }
  }
}
