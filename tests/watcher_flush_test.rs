//! Flush cycles of the local watcher against an in-memory mirror.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use syncwatch::analysis::{RawEvent, RawEventKind, Stats};
use syncwatch::config::WatcherConfig;
use syncwatch::mirror::MirrorStore;
use syncwatch::watcher::{LocalWatcher, NotificationBroadcaster, WatchError, WatcherEvent};
use syncwatch::{InMemoryMirror, Metadata};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

fn test_config() -> WatcherConfig {
    WatcherConfig {
        flush_timeout_ms: 50,
        checksum_concurrency: 4,
        stop_grace_ms: 10,
        root_check_interval_ms: 50,
        pending_file: None,
    }
}

fn watcher_for(
    root: &Path,
    mirror: &Arc<InMemoryMirror>,
    config: WatcherConfig,
) -> (LocalWatcher, broadcast::Receiver<WatcherEvent>) {
    let broadcaster = Arc::new(NotificationBroadcaster::new(64));
    let signals = broadcaster.subscribe();
    let watcher = LocalWatcher::builder()
        .sync_path(root)
        .store(mirror.clone())
        .synchronizer(mirror.clone())
        .broadcaster(broadcaster)
        .config(config)
        .build()
        .unwrap();
    (watcher, signals)
}

fn drain(signals: &mut broadcast::Receiver<WatcherEvent>) -> Vec<WatcherEvent> {
    let mut received = Vec::new();
    while let Ok(event) = signals.try_recv() {
        received.push(event);
    }
    received
}

fn write(root: &Path, path: &str, content: &str) {
    let abspath = root.join(path);
    std::fs::create_dir_all(abspath.parent().unwrap()).unwrap();
    std::fs::write(abspath, content).unwrap();
}

fn event(kind: RawEventKind, path: &str, ino: u64) -> RawEvent {
    RawEvent::new(kind, path).with_stats(Stats::new(ino, 1))
}

fn folder(path: &str, ino: u64) -> Metadata {
    Metadata::folder(path, Some(&Stats::new(ino, 0)))
}

fn file(path: &str, ino: u64) -> Metadata {
    Metadata::file(path, Some(&Stats::new(ino, 1)), Some("old".to_string()))
}

#[tokio::test]
async fn test_offline_dir_rename_round_trip() {
    let root = TempDir::new().unwrap();
    write(root.path(), "dst/file", "content");
    let mirror = Arc::new(InMemoryMirror::with_records([
        folder("src", 1),
        file("src/file", 2),
    ]));
    let (mut watcher, mut signals) = watcher_for(root.path(), &mirror, test_config());

    watcher
        .flush(vec![
            event(RawEventKind::AddDir, "", 99),
            event(RawEventKind::AddDir, "dst", 1),
            event(RawEventKind::Add, "dst/file", 2),
        ])
        .await
        .unwrap();

    assert_eq!(mirror.tree().await, vec!["dst/", "dst/file"]);
    assert_eq!(
        drain(&mut signals),
        vec![
            WatcherEvent::BufferingEnd,
            WatcherEvent::CycleStart,
            WatcherEvent::SyncTarget(Some(1)),
            WatcherEvent::CycleEnd,
            WatcherEvent::InitialScanDone,
        ]
    );
}

#[tokio::test]
async fn test_submission_failures_are_aggregated() {
    let root = TempDir::new().unwrap();
    write(root.path(), "ghost", "never recorded");
    std::fs::create_dir(root.path().join("ok")).unwrap();
    let mirror = Arc::new(InMemoryMirror::new());
    let (mut watcher, mut signals) = watcher_for(root.path(), &mirror, test_config());

    let result = watcher
        .flush(vec![
            event(RawEventKind::Change, "ghost", 1),
            event(RawEventKind::AddDir, "ok", 2),
        ])
        .await;

    match result {
        Err(WatchError::Submission { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, Path::new("ghost"));
            assert!(failures[0].change.starts_with("FileUpdate"));
        }
        other => panic!("expected submission failure, got {other:?}"),
    }
    // The failure did not stop the rest of the batch.
    assert_eq!(mirror.tree().await, vec!["ok/"]);

    let received = drain(&mut signals);
    assert!(received.contains(&WatcherEvent::CycleEnd));
    assert!(!received.contains(&WatcherEvent::InitialScanDone));
}

#[tokio::test]
async fn test_missing_root_is_reported() {
    let parent = TempDir::new().unwrap();
    let mirror = Arc::new(InMemoryMirror::new());
    let (mut watcher, mut signals) =
        watcher_for(&parent.path().join("removed"), &mirror, test_config());

    let result = watcher
        .flush(vec![event(RawEventKind::AddDir, "a", 1)])
        .await;

    assert!(matches!(result, Err(WatchError::RootUnlinked { .. })));
    assert_eq!(
        drain(&mut signals),
        vec![WatcherEvent::BufferingEnd, WatcherEvent::RootUnlinked]
    );
}

#[tokio::test]
async fn test_offline_deletions_only_on_first_cycle() {
    let root = TempDir::new().unwrap();
    write(root.path(), "kept.txt", "still here");
    let mut trashed = file("old.txt", 7);
    trashed.trashed = true;
    let mirror = Arc::new(InMemoryMirror::with_records([
        file("gone.txt", 3),
        file("kept.txt", 5),
        trashed,
    ]));
    let (mut watcher, _signals) = watcher_for(root.path(), &mirror, test_config());

    watcher
        .flush(vec![event(RawEventKind::Add, "kept.txt", 5)])
        .await
        .unwrap();
    assert_eq!(mirror.tree().await, vec!["kept.txt", "old.txt"]);

    // Later cycles trust the event stream alone.
    mirror.insert(file("unseen.txt", 8)).await;
    watcher.flush(vec![]).await.unwrap();
    assert_eq!(mirror.tree().await, vec!["kept.txt", "old.txt", "unseen.txt"]);
}

#[tokio::test]
async fn test_replay_without_offline_detection_keeps_records() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("a")).unwrap();
    let mirror = Arc::new(InMemoryMirror::with_records([file("gone.txt", 3)]));
    let broadcaster = Arc::new(NotificationBroadcaster::new(64));
    let mut signals = broadcaster.subscribe();
    let mut watcher = LocalWatcher::builder()
        .sync_path(root.path())
        .store(mirror.clone())
        .synchronizer(mirror.clone())
        .broadcaster(broadcaster)
        .config(test_config())
        .offline_detection(false)
        .build()
        .unwrap();

    watcher
        .flush(vec![event(RawEventKind::AddDir, "a", 1)])
        .await
        .unwrap();

    assert_eq!(mirror.tree().await, vec!["a/", "gone.txt"]);
    assert!(!drain(&mut signals).contains(&WatcherEvent::InitialScanDone));
}

#[tokio::test]
async fn test_rebased_move_refetches_its_source() {
    let root = TempDir::new().unwrap();
    write(root.path(), "dst/b", "content");
    let mirror = Arc::new(InMemoryMirror::with_records([
        folder("src", 10),
        file("src/a", 11),
    ]));
    let (mut watcher, _signals) = watcher_for(root.path(), &mirror, test_config());

    // src/ and src/a are missing from the first scan, so both unlinks are
    // synthesized ahead of these events.
    watcher
        .flush(vec![
            event(RawEventKind::AddDir, "dst", 10),
            event(RawEventKind::Add, "dst/b", 11),
        ])
        .await
        .unwrap();

    assert_eq!(mirror.tree().await, vec!["dst/", "dst/b"]);
    let moved = mirror.get(Path::new("dst/b")).await.unwrap().unwrap();
    assert_eq!(moved.ino, Some(11));
}

#[tokio::test]
async fn test_pending_survives_restart() {
    let root = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let config = WatcherConfig {
        pending_file: Some(state.path().join("pending.json")),
        ..test_config()
    };
    let mirror = Arc::new(InMemoryMirror::new());

    let (mut watcher, _signals) = watcher_for(root.path(), &mirror, config.clone());
    watcher
        .flush(vec![event(RawEventKind::Add, "uploading.bin", 4)])
        .await
        .unwrap();
    assert_eq!(watcher.pending().len(), 1);
    assert!(mirror.tree().await.is_empty());

    let (restarted, _signals) = watcher_for(root.path(), &mirror, config);
    assert_eq!(restarted.pending().len(), 1);
}

#[tokio::test]
async fn test_run_flushes_after_quiet_period() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("d")).unwrap();
    let mirror = Arc::new(InMemoryMirror::new());
    let (watcher, mut signals) = watcher_for(root.path(), &mirror, test_config());
    let handle = watcher.handle();

    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(async move {
        let mut watcher = watcher;
        watcher.run(rx).await
    });

    tx.send(event(RawEventKind::AddDir, "d", 1)).await.unwrap();
    handle.scan_complete();

    let done = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if signals.recv().await.unwrap() == WatcherEvent::InitialScanDone {
                break;
            }
        }
    })
    .await;
    assert!(done.is_ok(), "no cycle completed");
    assert_eq!(mirror.tree().await, vec!["d/"]);

    handle.stop(false);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_stops_when_root_disappears() {
    let parent = TempDir::new().unwrap();
    let root = parent.path().join("sync");
    std::fs::create_dir(&root).unwrap();
    let mirror = Arc::new(InMemoryMirror::new());
    let (mut watcher, _signals) = watcher_for(&root, &mirror, test_config());

    let (_tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(async move { watcher.run(rx).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::remove_dir(&root).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("watcher kept running")
        .unwrap();
    assert!(matches!(result, Err(WatchError::RootUnlinked { .. })));
}
