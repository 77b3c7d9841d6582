// tests/faults.rs

use halbus::{
  Bus, BusConfig, BusError, BusEvent, FaultKind, FaultPolicy, Level, Message, Subscription, ValidationError, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
mod common;

use common::Probe;

type Seen = Arc<Mutex<Vec<(String, String, Option<FaultKind>)>>>;

/// A finalizer that copies the message's errors out as (source, text, kind).
fn collect_errors(seen: &Seen) -> impl FnOnce(&halbus::Message, &mut halbus::Context<'_>) + Send + 'static {
  let seen = seen.clone();
  move |msg: &halbus::Message, _ctx: &mut halbus::Context<'_>| {
    for error in msg.errors() {
      seen.lock().unwrap().push((
        error.source().to_string(),
        error.text().to_string(),
        error.exception().map(|e| e.kind),
      ));
    }
  }
}

#[tokio::test]
async fn test_control_handler_error_is_captured_and_draining_continues() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("stage", &log).on(|msg, _ctx| {
    if msg.get("value").and_then(Value::as_int) == Some(1) {
      return Err("stage jammed".into());
    }
    Ok(())
  }));
  let monitor = bus.monitor();

  let seen: Seen = Arc::new(Mutex::new(Vec::new()));
  bus.send(
    Message::builder("ping")
      .data("value", 1)
      .errors_handled(true)
      .finalizer(collect_errors(&seen)),
  )?;
  bus.send(Message::builder("ping").data("value", 2))?;
  bus.run_until_idle().await?;

  assert_eq!(
    *seen.lock().unwrap(),
    vec![("stage".to_string(), "stage jammed".to_string(), Some(FaultKind::Handler))]
  );
  assert_eq!(
    common::entries(&log),
    vec!["stage:control:ping:1", "stage:control:ping:2"]
  );
  assert!(common::drain_events(&monitor)
    .iter()
    .any(|e| matches!(e, BusEvent::HandlerFailed { module, text, .. } if module == "stage" && text == "stage jammed")));
  Ok(())
}

#[tokio::test]
async fn test_control_handler_panic_is_captured() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("stage", &log).on(|msg, _ctx| {
    if msg.get("value").and_then(Value::as_int) == Some(1) {
      panic!("axis out of range");
    }
    Ok(())
  }));

  let seen: Seen = Arc::new(Mutex::new(Vec::new()));
  bus.send(
    Message::builder("ping")
      .data("value", 1)
      .errors_handled(true)
      .finalizer(collect_errors(&seen)),
  )?;
  bus.send(Message::builder("ping").data("value", 2))?;
  bus.run_until_idle().await?;

  assert_eq!(
    *seen.lock().unwrap(),
    vec![("stage".to_string(), "axis out of range".to_string(), Some(FaultKind::Panic))]
  );
  assert_eq!(common::entries(&log).len(), 2);
  Ok(())
}

#[tokio::test]
async fn test_frame_data_handler_error_propagates_by_default() {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("display", &log).on(|_msg, _ctx| Err("bad frame".into())));

  bus
    .send(
      Message::builder("camera frame")
        .level(Level::FrameData)
        .data("number", 7),
    )
    .unwrap();
  let err = bus.run_until_idle().await.unwrap_err();
  match err {
    BusError::HandlerFailed { module, m_type, text } => {
      assert_eq!(module, "display");
      assert_eq!(m_type, "camera frame");
      assert_eq!(text, "bad frame");
    }
    other => panic!("unexpected error {:?}", other),
  }
}

#[tokio::test]
async fn test_other_level_handler_error_propagates_by_default() {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("display", &log).on(|_msg, _ctx| Err("no overlay".into())));

  bus
    .send(Message::builder("left tick").level(Level::Other))
    .unwrap();
  let err = bus.run_until_idle().await.unwrap_err();
  assert!(matches!(
    err,
    BusError::HandlerFailed { ref module, ref m_type, ref text }
      if module == "display" && m_type == "left tick" && text == "no overlay"
  ));
  assert_eq!(common::entries(&log), vec!["display:other:left tick:1"]);
}

#[tokio::test]
async fn test_frame_data_policy_can_be_set_to_capture() -> Result<(), BusError> {
  let config = BusConfig::default().with_level_policy(Level::FrameData, FaultPolicy::Capture);
  let mut bus = Bus::with_config(common::registry(), config);
  let log = common::new_log();
  bus.add_module(Probe::new("display", &log).on(|_msg, _ctx| Err("bad frame".into())));

  let seen: Seen = Arc::new(Mutex::new(Vec::new()));
  bus.send(
    Message::builder("camera frame")
      .level(Level::FrameData)
      .data("number", 7)
      .errors_handled(true)
      .finalizer(collect_errors(&seen)),
  )?;
  bus.run_until_idle().await?;

  assert_eq!(seen.lock().unwrap().len(), 1);
  Ok(())
}

#[tokio::test]
async fn test_unhandled_errors_are_fatal_with_fail_fast() {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("stage", &log).on(|msg, ctx| {
    ctx.report_error(msg, "limit switch hit")?;
    Ok(())
  }));

  let id = bus.send(Message::builder("ping").data("value", 1)).unwrap();
  let err = bus.run_until_idle().await.unwrap_err();
  match err {
    BusError::UnhandledErrors {
      id: failed,
      source_name,
      count,
      first,
      ..
    } => {
      assert_eq!(failed, id);
      assert_eq!(source_name, "core");
      assert_eq!(count, 1);
      assert_eq!(first, "stage: limit switch hit");
    }
    other => panic!("unexpected error {:?}", other),
  }
}

#[tokio::test]
async fn test_unhandled_errors_tolerated_without_fail_fast() -> Result<(), BusError> {
  let mut bus = Bus::with_config(common::registry(), BusConfig::default().with_fail_fast(false));
  let log = common::new_log();
  bus.add_module(Probe::new("stage", &log).on(|msg, ctx| {
    ctx.report_error(msg, "limit switch hit")?;
    Ok(())
  }));

  bus.send(Message::builder("ping").data("value", 1))?;
  bus.run_until_idle().await?;
  assert_eq!(bus.in_flight(), 0);
  Ok(())
}

#[tokio::test]
async fn test_sending_module_decides_whether_errors_are_handled() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  let controller = bus.add_module_with(
    Probe::new("controller", &log).handling_errors(),
    Subscription::types(Vec::<String>::new()),
  );
  bus.add_module_with(
    Probe::new("stage", &log).on(|msg, ctx| {
      ctx.report_error(msg, "not homed")?;
      ctx.report_error(msg, "no power")?;
      Ok(())
    }),
    Subscription::types(["ping"]),
  );

  let id = bus.send_from(controller, Message::builder("ping").data("value", 1))?;
  bus.run_until_idle().await?;

  let handled: Vec<String> = common::entries(&log)
    .into_iter()
    .filter(|e| e.starts_with("controller:error"))
    .collect();
  assert_eq!(
    handled,
    vec![
      format!("controller:error:{}:not homed", id),
      format!("controller:error:{}:no power", id)
    ]
  );
  Ok(())
}

#[tokio::test]
async fn test_invalid_response_is_rejected_and_not_stored() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  let rejections = Arc::new(Mutex::new(Vec::new()));
  let r = rejections.clone();
  bus.add_module(Probe::new("stage", &log).on(move |msg, ctx| {
    if let Err(e) = ctx.respond(msg, common::fields(&[("handled", Value::from("yes"))])) {
      r.lock().unwrap().push(e);
    }
    Ok(())
  }));

  let responses = Arc::new(Mutex::new(None));
  let out = responses.clone();
  bus.send(Message::builder("tcp message").finalizer(move |msg, _ctx| {
    *out.lock().unwrap() = Some(msg.has_responses());
  }))?;
  bus.run_until_idle().await?;

  let rejections = rejections.lock().unwrap();
  assert_eq!(rejections.len(), 1);
  assert!(matches!(
    rejections[0],
    BusError::Validation(ValidationError::WrongKind { ref field, .. }) if field == "handled"
  ));
  assert_eq!(*responses.lock().unwrap(), Some(false));
  Ok(())
}

#[tokio::test]
async fn test_worker_panic_becomes_one_error() -> Result<(), BusError> {
  let config = BusConfig::default().with_capture_backtraces(false);
  let mut bus = Bus::with_config(common::registry(), config);
  let log = common::new_log();
  bus.add_module(Probe::new("camera", &log).on(|msg, ctx| {
    ctx.run_worker_task(msg, |_input| panic!("driver crashed"))?;
    Ok(())
  }));

  let seen: Seen = Arc::new(Mutex::new(Vec::new()));
  bus.send(
    Message::builder("work")
      .errors_handled(true)
      .finalizer(collect_errors(&seen)),
  )?;
  tokio::time::timeout(common::LONG_TIMEOUT, bus.run_until_idle())
    .await
    .expect("bus did not go idle")?;

  assert_eq!(
    *seen.lock().unwrap(),
    vec![("camera".to_string(), "driver crashed".to_string(), Some(FaultKind::Worker))]
  );
  Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_workers_on_one_message_finalize_once() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module_with(
    Probe::new("stage", &log).on(|msg, ctx| {
      for axis in 0..4 {
        ctx.run_worker_task(msg, move |_input| {
          std::thread::sleep(Duration::from_millis(5 * (4 - axis)));
          if axis == 2 {
            return Err("axis 2 not homed".into());
          }
          Ok(Some(common::fields(&[("position", Value::from(axis as f64))])))
        })?;
      }
      Ok(())
    }),
    Subscription::types(["get position"]),
  );

  let fired = Arc::new(AtomicUsize::new(0));
  let seen: Seen = Arc::new(Mutex::new(Vec::new()));
  let responses = Arc::new(AtomicUsize::new(0));
  let (f, r, collect) = (fired.clone(), responses.clone(), collect_errors(&seen));
  bus.send(
    Message::builder("get position")
      .data("axis", "x")
      .errors_handled(true)
      .finalizer(move |msg, ctx| {
        f.fetch_add(1, Ordering::SeqCst);
        r.store(msg.responses().len(), Ordering::SeqCst);
        collect(msg, ctx);
      }),
  )?;
  tokio::time::timeout(common::LONG_TIMEOUT, bus.run_until_idle())
    .await
    .expect("bus did not go idle")?;

  assert_eq!(fired.load(Ordering::SeqCst), 1);
  assert_eq!(responses.load(Ordering::SeqCst), 3);
  assert_eq!(
    *seen.lock().unwrap(),
    vec![("stage".to_string(), "axis 2 not homed".to_string(), Some(FaultKind::Worker))]
  );
  assert_eq!(bus.pending_workers(), 0);
  assert_eq!(bus.in_flight(), 0);
  Ok(())
}
