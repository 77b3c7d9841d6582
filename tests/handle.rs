// tests/handle.rs

use halbus::{Bus, BusError, BusEvent, Message, Subscription, Value};
use std::time::Duration;
mod common;

use common::Probe;

#[tokio::test]
async fn test_request_returns_worker_response() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module_with(
    Probe::new("stage", &log).on(|msg, ctx| {
      ctx.run_worker_task(msg, |input| {
        std::thread::sleep(Duration::from_millis(10));
        let axis = input.get("axis").and_then(Value::as_str).unwrap_or("?").to_string();
        let position = if axis == "x" { 1.5 } else { 0.0 };
        Ok(Some(common::fields(&[("position", Value::from(position))])))
      })?;
      Ok(())
    }),
    Subscription::types(["get position"]),
  );
  let handle = bus.handle();

  let (run_result, outcome) = tokio::join!(bus.run(), async {
    let outcome = handle.request(Message::builder("get position").data("axis", "x")).await;
    handle.shutdown().await.expect("shutdown");
    outcome
  });
  run_result?;
  let outcome = outcome?;

  assert!(outcome.is_ok());
  assert_eq!(outcome.m_type, "get position");
  assert_eq!(outcome.responses.len(), 1);
  assert_eq!(outcome.responses[0].source(), "stage");
  assert_eq!(outcome.responses[0].get("position"), Some(&Value::from(1.5)));
  Ok(())
}

#[tokio::test]
async fn test_request_surfaces_errors_without_failing_the_bus() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("stage", &log).on(|msg, ctx| {
    ctx.run_worker_task(msg, |_input| Err("boom".into()))?;
    Ok(())
  }));
  let handle = bus.handle();

  let (run_result, outcome) = tokio::join!(bus.run(), async {
    let outcome = handle.request(Message::builder("work")).await;
    handle.shutdown().await.expect("shutdown");
    outcome
  });
  run_result?;
  let outcome = outcome?;

  assert!(!outcome.is_ok());
  assert_eq!(outcome.errors.len(), 1);
  assert_eq!(outcome.errors[0].text(), "boom");
  assert!(outcome.errors[0].has_exception());
  Ok(())
}

#[tokio::test]
async fn test_request_of_unknown_type_is_rejected() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let handle = bus.handle();

  let (run_result, outcome) = tokio::join!(bus.run(), async {
    let outcome = handle.request(Message::builder("no such type")).await;
    handle.shutdown().await.expect("shutdown");
    outcome
  });
  run_result?;
  assert!(matches!(outcome, Err(BusError::Validation(_))));
  Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sends_from_other_tasks_are_delivered_in_order() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("display", &log));
  let handle = bus.handle();

  let producer = tokio::spawn(async move {
    for number in 0..5 {
      handle
        .send(Message::builder("camera frame").data("number", number))
        .await?;
    }
    handle.shutdown().await
  });

  tokio::time::timeout(common::LONG_TIMEOUT, bus.run())
    .await
    .expect("bus did not stop")?;
  producer.await.expect("producer task panicked")?;

  let ids: Vec<String> = common::entries(&log)
    .into_iter()
    .filter(|e| e.starts_with("display:control:camera frame:"))
    .collect();
  assert_eq!(
    ids,
    (1..=5)
      .map(|id| format!("display:control:camera frame:{}", id))
      .collect::<Vec<_>>()
  );
  Ok(())
}

#[tokio::test]
async fn test_shutdown_runs_cleanup_once_and_closes_the_handle() -> Result<(), BusError> {
  let mut bus = Bus::new(common::registry());
  let log = common::new_log();
  bus.add_module(Probe::new("camera", &log));
  bus.add_module(Probe::new("stage", &log));
  let monitor = bus.monitor();
  let handle = bus.handle();

  bus.send(Message::builder("ping").data("value", 1))?;
  handle.shutdown().await?;
  bus.run().await?;
  bus.shutdown().await?;

  let cleanups: Vec<String> = common::entries(&log)
    .into_iter()
    .filter(|e| e.ends_with(":cleanup"))
    .collect();
  assert_eq!(cleanups, vec!["camera:cleanup", "stage:cleanup"]);
  // The queued ping was still drained before stopping.
  assert_eq!(common::position(&log, "camera:control:ping:1"), 0);

  let events = common::drain_events(&monitor);
  assert_eq!(events.iter().filter(|e| **e == BusEvent::ShutDown).count(), 1);

  let err = handle.send(Message::builder("ping").data("value", 2)).await.unwrap_err();
  assert!(matches!(err, BusError::Closed));
  Ok(())
}
