//! End-to-end dispatch tests against a fully wired engine
//!
//! Exercises task lifecycle, lock arbitration, timeouts and isolation through
//! the public `Engine` API only.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use toolgate::cli::Config;
use toolgate::proxy::DispatchRequest;
use toolgate::Engine;

async fn open_engine() -> (TempDir, Engine) {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.workspace.root = temp.path().to_string_lossy().into_owned();
    config.proxy.enabled = false;
    let engine = Engine::open(&config).await.unwrap();
    (temp, engine)
}

#[tokio::test]
async fn test_lock_arbitration_scenario() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("demo", "Demo", None).unwrap();
    let dispatcher = engine.dispatcher();

    let locked = dispatcher
        .execute(
            "demo",
            "file_lock",
            json!({"file_path": "a.txt", "level": 2, "locker_name": "alice"}),
        )
        .await;
    assert!(locked.success, "{:?}", locked.error);

    // bob at level 1 is refused and nothing is written
    let denied = dispatcher
        .execute(
            "demo",
            "file_write",
            json!({"file_path": "a.txt", "content": "from bob", "locker_name": "bob", "level": 1}),
        )
        .await;
    assert!(!denied.success);
    assert_eq!(denied.data.as_ref().unwrap()["lock_info"]["level"], 2);
    assert!(!engine.tasks().workspace_path("demo").join("a.txt").exists());

    // alice writes through her own lock
    let written = dispatcher
        .execute(
            "demo",
            "file_write",
            json!({"file_path": "a.txt", "content": "from alice", "locker_name": "alice", "level": 1}),
        )
        .await;
    assert!(written.success);

    // bob at level 3 overrides
    let overridden = dispatcher
        .execute(
            "demo",
            "file_write",
            json!({"file_path": "a.txt", "content": "from bob", "locker_name": "bob", "level": 3}),
        )
        .await;
    assert!(overridden.success);

    let read = dispatcher
        .execute("demo", "file_read", json!({"file_path": "a.txt"}))
        .await;
    assert_eq!(read.data.unwrap()["content"], "from bob");
}

#[tokio::test]
async fn test_unknown_tool_is_stamped_failure() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("demo", "Demo", None).unwrap();

    let envelope = engine
        .dispatcher()
        .execute("demo", "definitely_not_a_tool", json!({}))
        .await;
    assert!(!envelope.success);
    assert_eq!(envelope.task_id.as_deref(), Some("demo"));
    assert_eq!(envelope.tool_name.as_deref(), Some("definitely_not_a_tool"));
}

#[tokio::test]
async fn test_calls_against_missing_task_fail() {
    let (_temp, engine) = open_engine().await;
    let envelope = engine
        .dispatcher()
        .execute("ghost", "file_write", json!({"file_path": "a.txt", "content": "x"}))
        .await;
    assert!(!envelope.success);
    assert!(!engine.tasks().workspace_path("ghost").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_kills_shell_and_its_writes() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("demo", "Demo", None).unwrap();

    let start = Instant::now();
    let envelope = engine
        .dispatcher()
        .execute(
            "demo",
            "execute_shell",
            json!({"command": "sleep 3; touch late", "timeout": 1}),
        )
        .await;
    assert!(!envelope.success);
    assert!(start.elapsed() < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!engine
        .tasks()
        .workspace_path("demo")
        .join("code_run/late")
        .exists());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_covers_detached_output_holder() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("demo", "Demo", None).unwrap();

    let start = Instant::now();
    let envelope = engine
        .dispatcher()
        .execute(
            "demo",
            "execute_shell",
            json!({"command": "setsid sh -c 'sleep 4; echo late' & echo hi", "timeout": 1}),
        )
        .await;
    assert!(!envelope.success);
    assert!(envelope.error.unwrap().contains("timeout"));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_large_delete_keeps_scheduler_responsive() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("demo", "Demo", None).unwrap();
    let bulk = engine.tasks().workspace_path("demo").join("bulk");
    for d in 0..100 {
        let dir = bulk.join(format!("d{}", d));
        std::fs::create_dir_all(&dir).unwrap();
        for f in 0..100 {
            std::fs::write(dir.join(format!("f{}.txt", f)), "x").unwrap();
        }
    }

    // a 1ms ticker on the same runtime records its longest stall
    let max_gap = Arc::new(Mutex::new(Duration::ZERO));
    let ticker = {
        let max_gap = max_gap.clone();
        tokio::spawn(async move {
            let mut last = Instant::now();
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let gap = last.elapsed();
                last = Instant::now();
                let mut max = max_gap.lock().unwrap();
                *max = (*max).max(gap);
            }
        })
    };
    tokio::task::yield_now().await;

    let start = Instant::now();
    let deleted = engine
        .dispatcher()
        .execute("demo", "file_delete", json!({"file_path": "bulk"}))
        .await;
    let took = start.elapsed();
    ticker.abort();

    assert!(deleted.success, "{:?}", deleted.error);
    assert!(!bulk.exists());
    let stall = *max_gap.lock().unwrap();
    assert!(
        stall < Duration::from_millis(20).max(took / 2),
        "ticker stalled {:?} during a {:?} delete",
        stall,
        took
    );
}

#[tokio::test]
async fn test_create_delete_leaves_no_residue() {
    let (_temp, engine) = open_engine().await;
    let tasks = engine.tasks();
    tasks.create("demo", "Demo", None).unwrap();

    engine
        .dispatcher()
        .execute(
            "demo",
            "file_lock",
            json!({"file_path": "upload/x.txt", "locker_name": "alice"}),
        )
        .await;
    assert_eq!(engine.locks().len(), 1);

    let deleted = tasks.delete("demo").unwrap();
    assert_eq!(deleted.released_locks, 1);
    assert!(!tasks.workspace_path("demo").exists());
    assert!(engine.locks().is_empty());
    assert!(tasks.list().unwrap().is_empty());

    // the id is free again
    tasks.create("demo", "Demo again", None).unwrap();
}

#[tokio::test]
async fn test_tasks_are_isolated() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("one", "One", None).unwrap();
    engine.tasks().create("two", "Two", None).unwrap();
    let dispatcher = engine.dispatcher();

    dispatcher
        .execute("one", "file_write", json!({"file_path": "secret.txt", "content": "1"}))
        .await;

    let escape = dispatcher
        .execute("two", "file_read", json!({"file_path": "../one/secret.txt"}))
        .await;
    assert!(!escape.success);

    let own = dispatcher
        .execute("two", "file_read", json!({"file_path": "secret.txt"}))
        .await;
    assert!(!own.success);
}

#[tokio::test]
async fn test_replayed_request_runs_once() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("demo", "Demo", None).unwrap();
    let dispatcher = engine.dispatcher();

    let request = DispatchRequest::new(
        "demo",
        "file_write",
        json!({"file_path": "log.txt", "content": "line\n", "mode": "append"}),
    )
    .with_request_id("append-1");

    let first = dispatcher.execute_request(request.clone()).await;
    let second = dispatcher.execute_request(request).await;
    assert!(first.success);
    assert_eq!(first, second);

    let contents =
        std::fs::read_to_string(engine.tasks().workspace_path("demo").join("log.txt")).unwrap();
    assert_eq!(contents, "line\n");
}

#[tokio::test]
async fn test_workspace_copy_through_dispatcher() {
    let (_temp, engine) = open_engine().await;
    engine.tasks().create("base", "Base", Some("numpy".into())).unwrap();
    let dispatcher = engine.dispatcher();

    dispatcher
        .execute("base", "file_write", json!({"file_path": "upload/data.csv", "content": "a,b"}))
        .await;
    let copied = dispatcher
        .execute("base", "workspace_copy", json!({"copyid_list": ["fork-a", "fork-b"]}))
        .await;
    assert!(copied.success, "{:?}", copied.error);

    let read = dispatcher
        .execute("fork-b", "file_read", json!({"file_path": "upload/data.csv"}))
        .await;
    assert_eq!(read.data.unwrap()["content"], "a,b");

    let info = engine.tasks().get("fork-a").unwrap().unwrap();
    assert_eq!(info.requirements.as_deref(), Some("numpy"));
}
