// tests/common.rs
#![allow(dead_code)] // Not every test file uses every helper

use halbus::{
  BusEvent, Context, DataMap, HandlerResult, KindSet, Message, MessageError, Module, MonitorReceiver, RegistryBuilder,
  Response, Schema, TypeRegistry, Value,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "halbus=trace,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

/// The message types used across the integration tests.
pub fn registry() -> Arc<TypeRegistry> {
  setup_tracing();
  let mut types = RegistryBuilder::new();
  types
    .register_type("ping", Schema::new().required("value", KindSet::INT), Schema::new(), false)
    .expect("register ping");
  types
    .register_type(
      "tcp message",
      Schema::new().optional("text", KindSet::STR),
      Schema::new().required("handled", KindSet::BOOL),
      false,
    )
    .expect("register tcp message");
  types
    .register_type(
      "camera frame",
      Schema::new()
        .required("number", KindSet::INT)
        .optional("frame", KindSet::BYTES),
      Schema::new(),
      false,
    )
    .expect("register camera frame");
  types
    .register_type(
      "get position",
      Schema::new().required("axis", KindSet::STR | KindSet::INT),
      Schema::new().required("position", KindSet::FLOAT),
      false,
    )
    .expect("register get position");
  for name in ["left tick", "right tick", "work"] {
    types
      .register_type(name, Schema::new(), Schema::new(), false)
      .expect("register empty type");
  }
  types.build()
}

/// Shared, thread-safe event log. Finalizers must be `Send`, so this is an Arc<Mutex>.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
  Arc::new(Mutex::new(Vec::new()))
}

pub fn record(log: &Log, entry: impl Into<String>) {
  log.lock().unwrap().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
  log.lock().unwrap().clone()
}

/// Position of `entry` in the log; panics if it is missing.
pub fn position(log: &Log, entry: &str) -> usize {
  entries(log)
    .iter()
    .position(|e| e == entry)
    .unwrap_or_else(|| panic!("'{}' not in log {:?}", entry, entries(log)))
}

/// A finalizer that records `entry`.
pub fn mark(log: &Log, entry: &str) -> impl FnOnce(&Message, &mut Context<'_>) + Send + 'static {
  let log = log.clone();
  let entry = entry.to_string();
  move |_msg: &Message, _ctx: &mut Context<'_>| record(&log, entry)
}

type Handler = Box<dyn FnMut(&Message, &mut Context<'_>) -> HandlerResult>;

/// A module that logs `name:level:type:id` for every message it drains, then
/// runs an optional handler.
pub struct Probe {
  name: String,
  log: Log,
  handler: Option<Handler>,
  handles_errors: bool,
}

impl Probe {
  pub fn new(name: &str, log: &Log) -> Self {
    Self {
      name: name.to_string(),
      log: log.clone(),
      handler: None,
      handles_errors: false,
    }
  }

  pub fn on<F>(mut self, handler: F) -> Self
  where
    F: FnMut(&Message, &mut Context<'_>) -> HandlerResult + 'static,
  {
    self.handler = Some(Box::new(handler));
    self
  }

  pub fn handling_errors(mut self) -> Self {
    self.handles_errors = true;
    self
  }

  fn seen(&mut self, level: &str, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    record(&self.log, format!("{}:{}:{}:{}", self.name, level, msg.type_name(), msg.id()));
    match self.handler.as_mut() {
      Some(handler) => handler(msg, ctx),
      None => Ok(()),
    }
  }
}

impl Module for Probe {
  fn name(&self) -> &str {
    &self.name
  }

  fn process_control(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    self.seen("control", msg, ctx)
  }

  fn process_frame_data(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    self.seen("frame", msg, ctx)
  }

  fn process_other(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    self.seen("other", msg, ctx)
  }

  fn handle_response(&mut self, msg: &Message, response: &Response, _ctx: &mut Context<'_>) {
    record(&self.log, format!("{}:response:{}:{}", self.name, msg.id(), response.source()));
  }

  fn handle_error(&mut self, msg: &Message, error: &MessageError, _ctx: &mut Context<'_>) -> bool {
    record(&self.log, format!("{}:error:{}:{}", self.name, msg.id(), error.text()));
    self.handles_errors
  }

  fn cleanup(&mut self) {
    record(&self.log, format!("{}:cleanup", self.name));
  }
}

/// Everything currently queued on a monitor channel.
pub fn drain_events(rx: &MonitorReceiver) -> Vec<BusEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

/// Builds a data map from literal pairs.
pub fn fields(pairs: &[(&str, Value)]) -> DataMap {
  pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}
