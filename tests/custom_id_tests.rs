//! Targets that are records rather than strings: a static enumerator
//! producing `{id1, id2}` objects and a definition whose target parameter
//! is a custom type parsed from JSON.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use taskboard::error::{Error, TrackerError};
use taskboard::prelude::*;
use taskboard::{DefinitionId, TaskOutcome};

struct Process;

fn custom_id(id1: i64, id2: &str) -> ArgValue {
    ArgValue::Json(json!({ "id1": id1, "id2": id2 }))
}

fn setup() -> (TaskBoard, DefinitionId) {
    let registry = Arc::new(DefinitionRegistry::new());
    let targets = Arc::new(TargetEnumerator::new());
    targets
        .register(
            Callable::static_method::<Process>(module_path!(), "targets")
                .returns(ReturnType::List)
                .sync(|_| {
                    Ok(ArgValue::List(vec![
                        custom_id(10, "J"),
                        custom_id(2, "B"),
                        custom_id(1, "A"),
                    ]))
                }),
        )
        .unwrap();

    let ping = registry
        .register(
            Callable::static_method::<Process>(module_path!(), "ping")
                .param(
                    "id",
                    ParamType::custom("CustomID", |raw| {
                        serde_json::from_str(raw).map(ArgValue::Json).map_err(|e| e.to_string())
                    }),
                )
                .param_with_default("msg", ParamType::Str, "PING")
                .param_with_default("sleep", ParamType::Int, 3600)
                .coroutine(|args| async move {
                    let secs = args.get_i64("sleep").unwrap_or_default().unsigned_abs();
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Ok(())
                }),
            "id",
        )
        .unwrap();

    let board = TaskBoard::new(BoardConfig::default(), registry, targets, TaskHost::new(), None).unwrap();
    (board, ping)
}

#[tokio::test]
async fn record_targets_sort_field_by_field() {
    let (board, _) = setup();
    let list = board.target_list().unwrap();
    assert_eq!(
        list.as_slice(),
        &[custom_id(1, "A"), custom_id(2, "B"), custom_id(10, "J")]
    );
}

#[tokio::test]
async fn record_targets_run_through_the_full_lifecycle() {
    let (board, ping) = setup();

    let low = board.start_at(0, ping.as_str(), [("msg", "first")]).unwrap();
    let high = board.start_at(2, ping.as_str(), [("msg", "last")]).unwrap();

    let overview = board.overview().unwrap();
    let rows: Vec<(ArgValue, Option<usize>, String)> = overview
        .rows
        .iter()
        .map(|r| (r.target.clone(), r.target_pos, r.params.get_str("msg").unwrap_or_default().to_string()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (custom_id(1, "A"), Some(0), "first".to_string()),
            (custom_id(10, "J"), Some(2), "last".to_string()),
        ]
    );
    assert_eq!(overview.rows[0].qualified_name, "Process::ping");

    let high_id = high.id().to_string();
    assert!(matches!(
        board.cancel_at(1, &high_id, ping.as_str()),
        Err(Error::Tracker(TrackerError::TargetMismatch { .. }))
    ));

    board.cancel_at(2, &high_id, ping.as_str()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), high.wait())
        .await
        .unwrap();
    assert_eq!(outcome, TaskOutcome::Cancelled);

    let remaining: Vec<ArgValue> = board.overview().unwrap().rows.into_iter().map(|r| r.target).collect();
    assert_eq!(remaining, vec![custom_id(1, "A")]);

    board.cancel_at(0, &low.id().to_string(), ping.as_str()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), low.wait())
        .await
        .unwrap();
}
