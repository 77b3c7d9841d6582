// src/message/mod.rs

//! Message values, schemas, the type registry and the in-flight `Message` itself.

pub mod msg;
pub mod registry;
pub mod schema;
pub mod value;

pub use msg::{Exception, FaultKind, Finalizer, Level, Message, MessageBuilder, MessageError, MessageId, Response};
pub use registry::{is_builtin, MessageType, RegistryBuilder, TypeRegistry, CONFIGURE, START, SYNC};
pub use schema::{FieldSpec, MessageTypeSchema, Schema};
pub use value::{DataMap, FieldKind, KindSet, Value};
