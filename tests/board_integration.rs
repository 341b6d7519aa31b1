//! Integration tests for the operator console: starting tasks from string
//! input, the overview read model and cancellation by target position.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use taskboard::error::{BindError, BoardError, Error, RegistryError, TrackerError};
use taskboard::prelude::*;
use taskboard::{DefinitionId, TaskOutcome};

struct Process;

async fn idle(secs: i64) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_secs(secs.unsigned_abs())).await;
    Ok(())
}

struct Setup {
    board: TaskBoard,
    ping: DefinitionId,
    report: DefinitionId,
}

fn setup() -> Setup {
    let registry = Arc::new(DefinitionRegistry::new());
    let targets = Arc::new(TargetEnumerator::new());
    targets
        .register(
            Callable::static_method::<Process>(module_path!(), "targets")
                .returns(ReturnType::List)
                .sync(|_| Ok(vec!["GHI", "ABC", "DEF"].into())),
        )
        .unwrap();

    let ping = registry
        .register(
            Callable::method::<Process>(module_path!(), "ping")
                .param("id", ParamType::Str)
                .param_with_default("msg", ParamType::Str, "PING")
                .param_with_default("sleep", ParamType::Int, 3600)
                .coroutine(|args| async move { idle(args.get_i64("sleep").unwrap_or_default()).await }),
            "id",
        )
        .unwrap();
    let report = registry
        .register(
            Callable::function(module_path!(), "report")
                .param("device", ParamType::Str)
                .param("day", ParamType::Date)
                .coroutine(|_| idle(3600)),
            "device",
        )
        .unwrap();

    let board = TaskBoard::new(
        BoardConfig::default(),
        registry,
        targets,
        TaskHost::new(),
        Some(Receiver::new(Arc::new(Process))),
    )
    .unwrap();
    Setup { board, ping, report }
}

#[tokio::test]
async fn overview_sorts_rows_by_target() {
    let s = setup();
    let board = &s.board;

    board.start_at(2, s.ping.as_str(), [("msg", "late")]).unwrap();
    board
        .start_at(0, s.report.as_str(), [("day", "2024-05-01")])
        .unwrap();
    board.start_at(0, s.ping.as_str(), [("sleep", "")]).unwrap();

    let overview = board.overview().unwrap();
    assert_eq!(overview.name, "Tasks");
    assert_eq!(
        overview.targets,
        vec![ArgValue::from("ABC"), ArgValue::from("DEF"), ArgValue::from("GHI")]
    );

    let rows: Vec<(ArgValue, Option<usize>, &str)> = overview
        .rows
        .iter()
        .map(|r| (r.target.clone(), r.target_pos, r.qualified_name.as_str()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (ArgValue::from("ABC"), Some(0), "Process::ping"),
            (ArgValue::from("ABC"), Some(0), "report"),
            (ArgValue::from("GHI"), Some(2), "Process::ping"),
        ]
    );

    let ping_row = &overview.rows[0];
    assert!(!ping_row.params.contains("self"));
    assert_eq!(ping_row.params.get_i64("sleep"), Some(3600));
    assert_eq!(ping_row.type_info.as_deref(), Some("method of class Process"));

    let report_row = &overview.rows[1];
    assert_eq!(
        report_row.params.get_date("day"),
        NaiveDate::from_ymd_opt(2024, 5, 1)
    );
    assert_eq!(report_row.type_info, None);

    let names: Vec<&str> = overview
        .definitions
        .iter()
        .map(|d| d.qualified_name.as_str())
        .collect();
    assert_eq!(names, vec!["Process::ping", "report"]);
}

#[tokio::test]
async fn cancel_through_the_board() {
    let s = setup();
    let board = &s.board;
    let handle = board.start_at(1, s.ping.as_str(), HashMap::<String, String>::new()).unwrap();
    let task_id = handle.id().to_string();

    // The cache path only knows tasks the overview has seen.
    assert!(matches!(
        board.cancel_form(1, &task_id),
        Err(Error::Tracker(TrackerError::TaskNotFound { from_cache: true, .. }))
    ));
    board.overview().unwrap();

    let form = board.cancel_form(1, &task_id).unwrap();
    assert_eq!(form.target, ArgValue::from("DEF"));
    assert_eq!(form.definition_id, s.ping);
    assert_eq!(form.params.names().collect::<Vec<_>>(), vec!["id", "msg", "sleep"]);

    assert!(matches!(
        board.cancel_at(0, &task_id, s.ping.as_str()),
        Err(Error::Tracker(TrackerError::TargetMismatch { .. }))
    ));
    assert!(matches!(
        board.cancel_at(7, &task_id, s.ping.as_str()),
        Err(Error::Board(BoardError::InvalidTargetPosition { pos: 7, len: 3 }))
    ));

    board.cancel_at(1, &task_id, s.ping.as_str()).unwrap();
    assert_eq!(handle.wait().await, TaskOutcome::Cancelled);
    assert!(board.overview().unwrap().rows.is_empty());
    assert!(board.cancel_form(1, &task_id).is_err());
}

#[tokio::test]
async fn start_validates_operator_input() {
    let s = setup();
    let board = &s.board;

    assert!(matches!(
        board.start_at(0, s.report.as_str(), [("day", "yesterday")]),
        Err(Error::Board(BoardError::Conversion(e))) if e.param == "day"
    ));
    assert!(matches!(
        board.start_at(0, s.report.as_str(), [("color", "red")]),
        Err(Error::Board(BoardError::UnknownParameter { param, .. })) if param == "color"
    ));
    assert!(matches!(
        board.start_at(0, s.report.as_str(), [("device", "XYZ")]),
        Err(Error::Board(BoardError::UnknownParameter { .. }))
    ));
    assert!(matches!(
        board.start_at(0, s.report.as_str(), [("day", "")]),
        Err(Error::Registry(RegistryError::Bind(BindError::MissingArgument { name, .. }))) if name == "day"
    ));
    assert!(matches!(
        board.start_task("0000000000000000", ArgValue::from("ABC"), [("day", "")]),
        Err(Error::Board(BoardError::UnknownDefinition { .. }))
    ));
    assert!(board.host().is_empty());
}

#[tokio::test]
async fn start_form_describes_remaining_parameters() {
    let s = setup();
    let form = s.board.start_form(2, s.report.as_str()).unwrap();
    assert_eq!(form.target, ArgValue::from("GHI"));
    assert_eq!(form.target_param, "device");
    assert_eq!(form.fields.len(), 1);
    assert_eq!(form.fields[0].name, "day");
    assert_eq!(form.fields[0].input_kind.as_str(), "date");
    assert!(form.fields[0].required);

    let json = serde_json::to_value(&form).unwrap();
    assert_eq!(json["fields"][0]["input_kind"], "date");
    assert_eq!(json["target"], "GHI");
}

#[tokio::test]
async fn failing_tasks_are_dropped_from_the_overview() {
    let registry = Arc::new(DefinitionRegistry::new());
    let targets = Arc::new(TargetEnumerator::new());
    targets
        .register(
            Callable::function(module_path!(), "targets")
                .returns(ReturnType::List)
                .sync(|_| Ok(vec![1, 2, 3].into())),
        )
        .unwrap();
    let flaky = registry
        .register(
            Callable::function(module_path!(), "flaky")
                .param("slot", ParamType::Int)
                .coroutine(|_| async { Err(anyhow::anyhow!("device unreachable")) }),
            "slot",
        )
        .unwrap();
    let board = TaskBoard::new(BoardConfig::default(), registry, targets, TaskHost::new(), None).unwrap();

    let handle = board.start_at(2, flaky.as_str(), [("slot", "")]);
    assert!(matches!(handle, Err(Error::Board(BoardError::UnknownParameter { .. }))));

    let handle = board
        .start_task(flaky.as_str(), ArgValue::from(3), Vec::<(&str, &str)>::new())
        .unwrap();
    assert_eq!(
        handle.wait().await,
        TaskOutcome::Failed("device unreachable".to_string())
    );
    assert!(board.overview().unwrap().rows.is_empty());
}
