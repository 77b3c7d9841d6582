use crate::cli::SimulateArgs;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use halbus::{
  Bus, BusConfig, BusEvent, Context, DataMap, HandlerResult, KindSet, Level, Message, MessageError, Module,
  RegistryBuilder, Response, Schema, Subscription, TypeRegistry, Value,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

// --- Message Types ---
pub const CAMERA_FRAME: &str = "camera frame";
pub const STAGE_MOVE: &str = "stage move";
pub const STATUS: &str = "status";

/// The message types the simulated session uses.
pub fn registry() -> Result<Arc<TypeRegistry>> {
  let mut types = RegistryBuilder::new();
  types.register_type(
    CAMERA_FRAME,
    Schema::new()
      .required("number", KindSet::INT)
      .optional("exposure_ms", KindSet::FLOAT),
    Schema::new(),
    false,
  )?;
  types.register_type(
    STAGE_MOVE,
    Schema::new()
      .required("x", KindSet::FLOAT)
      .required("y", KindSet::FLOAT),
    Schema::new()
      .required("x", KindSet::FLOAT)
      .required("y", KindSet::FLOAT),
    false,
  )?;
  types.register_type(STATUS, Schema::new(), Schema::new().required("summary", KindSet::STR), false)?;
  Ok(types.build())
}

fn summary(text: String) -> DataMap {
  let mut data = DataMap::new();
  data.insert("summary".to_string(), Value::from(text));
  data
}

fn coordinate(msg_data: &DataMap, key: &str) -> f64 {
  msg_data.get(key).and_then(Value::as_float).unwrap_or_default()
}

// --- Camera ---

/// Frames are published from outside the dispatch loop; the module only reports.
struct Camera {
  published: Arc<AtomicU64>,
}

impl Module for Camera {
  fn name(&self) -> &str {
    "camera"
  }

  fn process_control(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    if msg.is_type(STATUS) {
      let published = self.published.load(Ordering::Relaxed);
      ctx.respond(msg, summary(format!("published {} frames", published)))?;
    }
    Ok(())
  }
}

// --- Stage ---

/// Moves block a worker thread for `move_ms`, and jam with `jam_probability`.
struct Stage {
  move_ms: u64,
  jam_probability: f64,
  rng: StdRng,
  requested: u32,
}

impl Module for Stage {
  fn name(&self) -> &str {
    "stage"
  }

  fn process_control(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    if msg.is_type(STATUS) {
      ctx.respond(msg, summary(format!("{} moves requested", self.requested)))?;
    } else if msg.is_type(STAGE_MOVE) {
      self.requested += 1;
      let jam = self.rng.random_bool(self.jam_probability);
      let move_ms = self.move_ms;
      ctx.run_worker_task(msg, move |input| {
        std::thread::sleep(Duration::from_millis(move_ms));
        if jam {
          return Err("stage jammed".into());
        }
        let mut reached = DataMap::new();
        reached.insert("x".to_string(), Value::from(coordinate(&input.data, "x")));
        reached.insert("y".to_string(), Value::from(coordinate(&input.data, "y")));
        Ok(Some(reached))
      })?;
    }
    Ok(())
  }
}

// --- Display ---

#[derive(Default)]
struct Display {
  frames: u64,
  last: Option<i64>,
  gaps: u64,
}

impl Module for Display {
  fn name(&self) -> &str {
    "display"
  }

  fn process_frame_data(&mut self, msg: &Message, _ctx: &mut Context<'_>) -> HandlerResult {
    let number = msg.get("number").and_then(Value::as_int).unwrap_or_default();
    if let Some(last) = self.last {
      if number != last + 1 {
        tracing::warn!(expected = last + 1, got = number, "Frame sequence gap");
        self.gaps += 1;
      }
    }
    self.last = Some(number);
    self.frames += 1;
    Ok(())
  }

  fn process_control(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    if msg.is_type(STATUS) {
      let last = self.last.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
      ctx.respond(
        msg,
        summary(format!("{} frames shown, last #{}, {} gaps", self.frames, last, self.gaps)),
      )?;
    }
    Ok(())
  }
}

// --- Controller ---

/// Drives a sequence of stage moves. Each move is sent only after the previous
/// one has been finalized.
struct Controller {
  remaining: u32,
  rng: StdRng,
  completed: u32,
  jammed: u32,
}

impl Controller {
  fn send_next(&mut self, ctx: &mut Context<'_>) {
    if self.remaining == 0 {
      tracing::info!(completed = self.completed, jammed = self.jammed, "Move sequence finished");
      return;
    }
    self.remaining -= 1;
    let x: f64 = self.rng.random_range(0.0..100.0);
    let y: f64 = self.rng.random_range(0.0..100.0);
    if let Err(e) = ctx.send(Message::builder(STAGE_MOVE).data("x", x).data("y", y)) {
      tracing::error!(error = %e, "Could not send stage move");
    }
  }
}

impl Module for Controller {
  fn name(&self) -> &str {
    "controller"
  }

  fn process_control(&mut self, msg: &Message, ctx: &mut Context<'_>) -> HandlerResult {
    if msg.is_type(halbus::START) {
      self.send_next(ctx);
    } else if msg.is_type(STATUS) {
      ctx.respond(
        msg,
        summary(format!("{} moves completed, {} jammed", self.completed, self.jammed)),
      )?;
    }
    Ok(())
  }

  fn handle_responses(&mut self, msg: &Message, ctx: &mut Context<'_>) {
    for response in msg.responses() {
      self.handle_response(msg, &response, ctx);
    }
    if !msg.has_errors() {
      self.send_next(ctx);
    }
  }

  fn handle_response(&mut self, _msg: &Message, response: &Response, _ctx: &mut Context<'_>) {
    let x = coordinate(response.data(), "x");
    let y = coordinate(response.data(), "y");
    tracing::info!(x = %format!("{:.2}", x), y = %format!("{:.2}", y), "Stage reached position");
    self.completed += 1;
  }

  fn handle_errors(&mut self, msg: &Message, ctx: &mut Context<'_>) -> bool {
    let mut handled = true;
    for error in msg.errors() {
      handled &= self.handle_error(msg, &error, ctx);
    }
    self.send_next(ctx);
    handled
  }

  fn handle_error(&mut self, _msg: &Message, error: &MessageError, _ctx: &mut Context<'_>) -> bool {
    tracing::warn!(source = error.source(), error = error.text(), "Stage move failed, skipping");
    self.jammed += 1;
    true
  }

  fn cleanup(&mut self) {
    tracing::debug!(remaining = self.remaining, "Controller cleanup");
  }
}

fn event_name(event: &BusEvent) -> &'static str {
  match event {
    BusEvent::Sent { .. } => "sent",
    BusEvent::Rejected { .. } => "rejected",
    BusEvent::Parked { .. } => "parked",
    BusEvent::Delivered { .. } => "delivered",
    BusEvent::Finalized { .. } => "finalized",
    BusEvent::HandlerFailed { .. } => "handler failed",
    BusEvent::WorkerFailed { .. } => "worker failed",
    BusEvent::ShutDown => "shut down",
    _ => "other",
  }
}

pub async fn run(args: SimulateArgs) -> Result<()> {
  anyhow::ensure!(
    (0.0..=1.0).contains(&args.jam_probability),
    "--jam-probability must be between 0 and 1, got {}",
    args.jam_probability
  );

  let config = BusConfig::default().with_monitor_capacity(args.frames as usize * 4 + 1024);
  let mut bus = Bus::with_config(registry()?, config);

  let published = Arc::new(AtomicU64::new(0));
  let camera = bus.add_module_with(
    Camera {
      published: published.clone(),
    },
    Subscription::types([STATUS]),
  );
  bus.add_module_with(
    Stage {
      move_ms: args.move_ms,
      jam_probability: args.jam_probability,
      rng: StdRng::seed_from_u64(args.seed),
      requested: 0,
    },
    Subscription::types([STAGE_MOVE, STATUS]),
  );
  bus.add_module_with(Display::default(), Subscription::types([CAMERA_FRAME, STATUS]));
  bus.add_module_with(
    Controller {
      remaining: args.moves,
      rng: StdRng::seed_from_u64(args.seed.wrapping_add(1)),
      completed: 0,
      jammed: 0,
    },
    Subscription::types([STATUS]),
  );
  let monitor = bus.monitor();
  let handle = bus.handle();
  bus.boot().context("Failed to boot bus")?;

  let session = async {
    let result = async {
      for number in 0..args.frames {
        handle
          .send_from(
            camera,
            Message::builder(CAMERA_FRAME)
              .level(Level::FrameData)
              .data("number", number)
              .data("exposure_ms", 10.0),
          )
          .await?;
        published.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(args.frame_interval_ms)).await;
      }
      let outcome = handle.request(Message::builder(STATUS)).await?;
      Ok::<_, anyhow::Error>(outcome)
    }
    .await;
    if let Err(e) = handle.shutdown().await {
      tracing::warn!(error = %e, "Shutdown request failed");
    }
    result
  };

  let run = bus.run();
  tokio::pin!(run);
  tokio::pin!(session);
  let outcome = tokio::select! {
    result = &mut run => {
      result.context("Bus stopped")?;
      anyhow::bail!("Bus stopped before the session finished");
    }
    outcome = &mut session => outcome?,
  };
  run.await.context("Bus failed while shutting down")?;

  println!("Status (message {}):", outcome.id);
  for response in &outcome.responses {
    let text = response.get("summary").and_then(Value::as_str).unwrap_or("-");
    println!("  {:<12} {}", response.source(), text);
  }

  let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
  while let Ok(event) = monitor.try_recv() {
    if args.events {
      println!("  event: {:?}", event);
    }
    *counts.entry(event_name(&event)).or_default() += 1;
  }
  println!("Bus events:");
  for (name, count) in counts {
    println!("  {:<16} {}", name, count);
  }
  Ok(())
}
