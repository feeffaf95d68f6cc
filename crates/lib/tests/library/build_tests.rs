use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cairn_lib::build::{BuildError, BuildOutcome, ErrorKind, build_target};
use cairn_lib::command::{CommandError, from_fn, shell};
use cairn_lib::config::{Limit, RunConfig};
use cairn_lib::hooks::EventKind;
use cairn_lib::LayoutEntry;
use cairn_lib::store::{self, META, OBJECTS, Progress};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};

use super::common::{always_fails, keep_going, recording_engine};

#[tokio::test]
async fn exhausted_retries_leave_a_failure_record() {
  let (engine, reporter) = recording_engine(
    vec![LayoutEntry::target("flaky", always_fails("still broken")).with_retries(2)],
    keep_going(),
  );
  let mut rng = StdRng::seed_from_u64(0);

  let outcome = build_target(&engine, "flaky", &mut rng).await.unwrap();
  assert_eq!(outcome, BuildOutcome::Failed);

  let start_and_retry = reporter
    .events_for("flaky")
    .into_iter()
    .filter(|k| matches!(k, EventKind::Target | EventKind::Retry))
    .count();
  assert_eq!(start_and_retry, 3);

  let store = engine.store();
  assert_eq!(store::progress(store, "flaky").unwrap(), Some(Progress::Failed));
  assert!(!store.exists("flaky", OBJECTS).unwrap());
  assert!(store.exists("flaky", META).unwrap());
  let meta = store::meta(store, "flaky").unwrap().unwrap();
  let error = meta.error.unwrap();
  assert_eq!(error.kind, ErrorKind::Command);
  assert_eq!(error.message, "still broken");
}

#[tokio::test]
async fn attempts_stop_at_first_success() {
  for succeed_on in 1..=4u32 {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let command = from_fn(move |_| {
      let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
      if n < succeed_on {
        Err(CommandError::msg("not yet"))
      } else {
        Ok(json!(n))
      }
    });
    let (engine, _) = recording_engine(vec![LayoutEntry::target("t", command).with_retries(3)], keep_going());
    let mut rng = StdRng::seed_from_u64(0);

    let outcome = build_target(&engine, "t", &mut rng).await.unwrap();
    assert_eq!(outcome, BuildOutcome::Built);
    assert_eq!(attempts.load(Ordering::SeqCst), succeed_on);
  }
}

#[tokio::test]
async fn global_retries_apply_without_override() {
  let attempts = Arc::new(AtomicU32::new(0));
  let counter = attempts.clone();
  let command = from_fn(move |_| {
    counter.fetch_add(1, Ordering::SeqCst);
    Err(CommandError::msg("no"))
  });
  let config = RunConfig {
    retries: 4,
    keep_going: true,
    ..RunConfig::default()
  };
  let (engine, _) = recording_engine(vec![LayoutEntry::target("t", command)], config);
  let mut rng = StdRng::seed_from_u64(0);

  build_target(&engine, "t", &mut rng).await.unwrap();
  assert_eq!(attempts.load(Ordering::SeqCst), 5);
}

#[cfg(unix)]
#[tokio::test]
async fn slow_shell_command_times_out_on_every_attempt() {
  let config = RunConfig {
    elapsed: Limit::Within(Duration::from_millis(100)),
    retries: 1,
    keep_going: true,
    ..RunConfig::default()
  };
  let (engine, reporter) = recording_engine(vec![LayoutEntry::target("sleepy", shell("sleep 5"))], config);
  let mut rng = StdRng::seed_from_u64(0);

  let started = std::time::Instant::now();
  let outcome = build_target(&engine, "sleepy", &mut rng).await.unwrap();
  assert_eq!(outcome, BuildOutcome::Failed);
  assert!(started.elapsed() < Duration::from_secs(4));
  assert_eq!(reporter.count(EventKind::Retry), 1);

  let meta = store::meta(engine.store(), "sleepy").unwrap().unwrap();
  assert_eq!(meta.error.map(|e| e.kind), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn unlimited_override_beats_global_limit() {
  let config = RunConfig {
    elapsed: Limit::Within(Duration::from_millis(5)),
    ..RunConfig::default()
  };
  let command = from_fn(|_| {
    std::thread::sleep(Duration::from_millis(30));
    Ok(json!("slow but allowed"))
  });
  let (engine, _) = recording_engine(
    vec![LayoutEntry::target("t", command).with_elapsed(Limit::Unlimited)],
    config,
  );
  let mut rng = StdRng::seed_from_u64(0);
  assert_eq!(build_target(&engine, "t", &mut rng).await.unwrap(), BuildOutcome::Built);
}

#[tokio::test]
async fn seeded_targets_do_not_interfere() {
  let draw = || from_fn(|ctx| Ok(json!(ctx.rng().r#gen::<u64>())));
  let (engine, _) = recording_engine(
    vec![
      LayoutEntry::target("a", draw()).with_seed(1),
      LayoutEntry::target("b", draw()).with_seed(2),
    ],
    RunConfig::default(),
  );

  let mut ambient = StdRng::seed_from_u64(1234);
  let mut untouched = StdRng::seed_from_u64(1234);

  build_target(&engine, "a", &mut ambient).await.unwrap();
  assert_eq!(ambient.r#gen::<u64>(), untouched.r#gen::<u64>());
  build_target(&engine, "b", &mut ambient).await.unwrap();
  assert_eq!(ambient.r#gen::<u64>(), untouched.r#gen::<u64>());

  let a = engine.store().get("a", OBJECTS).unwrap();
  let b = engine.store().get("b", OBJECTS).unwrap();
  assert_eq!(a, Some(json!(StdRng::seed_from_u64(1).r#gen::<u64>())));
  assert_eq!(b, Some(json!(StdRng::seed_from_u64(2).r#gen::<u64>())));
}

#[tokio::test]
async fn derived_seeds_are_reproducible() {
  let draw = || from_fn(|ctx| Ok(json!(ctx.rng().r#gen::<u32>())));
  let config = RunConfig {
    seed: 99,
    ..RunConfig::default()
  };

  let mut values = Vec::new();
  for ambient_seed in [1u64, 2] {
    let (engine, _) = recording_engine(vec![LayoutEntry::target("t", draw())], config.clone());
    let mut ambient = StdRng::seed_from_u64(ambient_seed);
    build_target(&engine, "t", &mut ambient).await.unwrap();
    values.push(engine.store().get("t", OBJECTS).unwrap());
  }
  assert_eq!(values[0], values[1]);
}

#[tokio::test]
async fn fatal_error_names_the_target() {
  let (engine, _) = recording_engine(
    vec![LayoutEntry::target("model", always_fails("singular matrix"))],
    RunConfig {
      lock_envir: true,
      ..RunConfig::default()
    },
  );
  let mut rng = StdRng::seed_from_u64(0);

  let err = build_target(&engine, "model", &mut rng).await.unwrap_err();
  assert_eq!(err.to_string(), "target model failed: singular matrix");
  assert!(matches!(err, BuildError::TargetFailed { .. }));
  assert!(!engine.env().is_locked());
}

#[tokio::test]
async fn warnings_and_messages_are_kept_on_success() {
  let command = from_fn(|ctx| {
    ctx.message("loading");
    ctx.warn("deprecated argument");
    ctx.message("done");
    Ok(Value::Bool(true))
  });
  let (engine, _) = recording_engine(vec![LayoutEntry::target("t", command)], RunConfig::default());
  let mut rng = StdRng::seed_from_u64(0);

  build_target(&engine, "t", &mut rng).await.unwrap();
  let meta = store::meta(engine.store(), "t").unwrap().unwrap();
  assert_eq!(meta.warnings, vec!["deprecated argument"]);
  assert_eq!(meta.messages, vec!["loading", "done"]);
  assert!(meta.error.is_none());
  assert!(meta.time_command.is_some());
}
