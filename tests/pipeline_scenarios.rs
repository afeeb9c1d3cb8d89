use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use pitwall::core::extraction::PromptSpec;
use pitwall::core::inference::{DispatchError, InferenceDispatcher, ScriptedBackend};
use pitwall::core::pipeline::{
    list_error_logs, ErrorKind, ErrorRecord, ExtractionPipeline, MonitorTiming, PipelineMonitor,
};
use pitwall::core::queue::{list_images, QueueDirs, WorkQueue};
use pitwall::core::store::{ExtractionStore, MemoryStore, SqliteStore};

const IMAGE: &str = "manual_20240101_120000.jpg";

fn prompts() -> Vec<PromptSpec> {
    vec![
        PromptSpec::new("current_lap", "LAP: what lap is shown?"),
        PromptSpec::new("timing_table", "TABLE: read the timing tower"),
    ]
}

fn prepare(root: &Path) -> (WorkQueue, QueueDirs) {
    let dirs = QueueDirs::under(root);
    let queue = WorkQueue::new(dirs.clone());
    queue.ensure_dirs().unwrap();
    fs::write(dirs.input.join(IMAGE), b"\xff\xd8\xff\xe0jpeg").unwrap();
    (queue, dirs)
}

fn build(queue: WorkQueue, backend: ScriptedBackend, store: Arc<dyn ExtractionStore>) -> ExtractionPipeline {
    ExtractionPipeline::new(
        queue,
        InferenceDispatcher::with_backend(Box::new(backend)),
        prompts(),
    )
    .with_store(store)
}

fn only_error_record(failed: &Path) -> ErrorRecord {
    let logs = list_error_logs(failed).unwrap();
    assert_eq!(logs.len(), 1, "expected exactly one error log");
    serde_json::from_str(&fs::read_to_string(&logs[0]).unwrap()).unwrap()
}

#[test]
fn both_prompts_succeed_one_save_file_processed() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    let store = Arc::new(MemoryStore::new());
    let backend = ScriptedBackend::by_prompt(vec![
        ("LAP", "```json\n{\"lap_number\": 23}\n```"),
        (
            "TABLE",
            "{\"table_type\": \"interval\", \"timing_table\": [{\"position\": 1, \"driver\": \"NOR\", \"interval\": \"Leader\"},]}",
        ),
    ]);
    let pipeline = build(queue, backend, store.clone());

    let report = pipeline.run_sweep().unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    let records = store.records();
    assert_eq!(records.len(), 1);
    let extractions = records[0].extractions.as_object().unwrap();
    assert!(extractions.contains_key("current_lap"));
    assert!(extractions.contains_key("timing_table"));
    assert_eq!(records[0].image_filename, IMAGE);

    assert!(dirs.processed.join(IMAGE).exists());
    assert!(list_images(&dirs.input).unwrap().is_empty());
    assert!(list_error_logs(&dirs.failed).unwrap().is_empty());
}

#[test]
fn second_prompt_timeout_saves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    let store = Arc::new(MemoryStore::new());
    let backend = ScriptedBackend::with_responder(|_, call| match call {
        0 => Ok("{\"lap_number\": 23}".to_string()),
        _ => Err(DispatchError::Timeout(Duration::from_secs(90))),
    });
    let pipeline = build(queue, backend, store.clone());

    let report = pipeline.run_sweep().unwrap();
    assert_eq!(report.failed, 1);
    assert!(store.is_empty());
    assert!(dirs.failed.join(IMAGE).exists());
    assert!(!dirs.processed.join(IMAGE).exists());

    let record = only_error_record(&dirs.failed);
    assert_eq!(record.error_type, ErrorKind::DispatchTimeout);
    assert_eq!(record.image_filename, IMAGE);
    assert!(record.response_data.is_none());
}

#[test]
fn second_prompt_validation_failure_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    let store = Arc::new(MemoryStore::new());
    let backend = ScriptedBackend::by_prompt(vec![
        ("LAP", "{\"lap_number\": 23}"),
        ("TABLE", "{\"rows\": []}"),
    ]);
    let pipeline = build(queue, backend, store.clone());

    pipeline.run_sweep().unwrap();
    assert!(store.is_empty());
    assert!(dirs.failed.join(IMAGE).exists());

    let record = only_error_record(&dirs.failed);
    assert_eq!(record.error_type, ErrorKind::ValidationFailure);
    assert!(record.error_message.contains("timing_table"));
    assert_eq!(record.response_data.as_deref(), Some("{\"rows\": []}"));
}

#[test]
fn unparseable_reply_is_malformed_response() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    let backend = ScriptedBackend::always("The lap counter shows 23.");
    let pipeline = build(queue, backend, Arc::new(MemoryStore::new()));

    pipeline.run_sweep().unwrap();
    let record = only_error_record(&dirs.failed);
    assert_eq!(record.error_type, ErrorKind::MalformedResponse);
    assert_eq!(record.response_data.as_deref(), Some("The lap counter shows 23."));
}

#[test]
fn persistence_outage_routes_to_failed_with_database_error() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    let backend = ScriptedBackend::always("{\"lap_number\": 1, \"timing_table\": []}");
    let pipeline = build(queue, backend, Arc::new(MemoryStore::failing()));

    pipeline.run_sweep().unwrap();
    assert!(dirs.failed.join(IMAGE).exists());

    let logs = list_error_logs(&dirs.failed).unwrap();
    let raw: Value = serde_json::from_str(&fs::read_to_string(&logs[0]).unwrap()).unwrap();
    assert_eq!(raw["error_type"], "DATABASE_ERROR");

    // 不会被重新处理
    assert_eq!(pipeline.run_sweep().unwrap().total(), 0);
}

#[test]
fn sqlite_store_receives_session_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    let store = Arc::new(SqliteStore::open(&dir.path().join("f1_data.db")).unwrap());
    let backend = ScriptedBackend::by_prompt(vec![
        ("LAP", "{\"lap_number\": 5}"),
        (
            "TABLE",
            "{\"table_type\": \"gap\", \"timing_table\": [{\"position\": \"P1\", \"driver\": \"HAM\", \"gap\": \"Leader\"}, {\"position\": \"P2\", \"driver\": \"RUS\", \"gap\": \"+1.2\"}]}",
        ),
    ]);
    let pipeline = build(queue, backend, store.clone());
    pipeline
        .session()
        .set(serde_json::json!({"race": "Silverstone", "session": "Race"}));

    pipeline.run_sweep().unwrap();
    assert!(dirs.processed.join(IMAGE).exists());

    let pending = store.list_unprocessed().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].lap_number, Some(5));
    assert_eq!(pending[0].table_type.as_deref(), Some("gap"));
    assert_eq!(pending[0].session.as_ref().unwrap()["race"], "Silverstone");

    let rows = store.parse_and_normalize(&pending[0]).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].driver, "RUS");
    assert_eq!(rows[1].position, Some(2));
    assert!(store.list_unprocessed().unwrap().is_empty());
}

#[test]
fn monitor_drains_every_file_to_exactly_one_terminal_dir() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, dirs) = prepare(dir.path());
    for i in 0..4 {
        fs::write(dirs.input.join(format!("periodic_{}.png", i)), b"png").unwrap();
    }
    fs::write(dirs.input.join("notes.txt"), b"not an image").unwrap();

    // 每第三次调用超时
    let backend = ScriptedBackend::with_responder(|_, call| {
        if call % 3 == 2 {
            Err(DispatchError::Timeout(Duration::from_secs(1)))
        } else {
            Ok("{\"lap_number\": 1, \"timing_table\": []}".to_string())
        }
    });
    let pipeline = Arc::new(
        build(queue, backend, Arc::new(MemoryStore::new())).with_timing(MonitorTiming {
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(50),
        }),
    );
    let monitor = PipelineMonitor::new(Arc::clone(&pipeline));
    monitor.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !list_images(&dirs.input).unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(monitor.stop());

    let processed = list_images(&dirs.processed).unwrap();
    let failed = list_images(&dirs.failed).unwrap();
    assert_eq!(processed.len() + failed.len(), 5);
    for item in &processed {
        assert!(!dirs.failed.join(&item.file_name).exists());
    }
    assert_eq!(list_error_logs(&dirs.failed).unwrap().len(), failed.len());
    assert!(dirs.input.join("notes.txt").exists());
}
