use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

use fathom_config::{StorageRootConfig, WatchConfig};
use fathom_core::client::{LocalClient, StorageClient};
use fathom_core::watch::ChangeWatchService;
use fathom_model::{ChangeEvent, ChangeKind, RootId};

struct WatchedRoot {
    dir: TempDir,
    root_id: RootId,
    service: ChangeWatchService,
}

/// Tempdir root with a native watch already registered on it.
fn watched_root(debounce_ms: u64) -> WatchedRoot {
    let dir = tempfile::tempdir().unwrap();
    let root_id = RootId::new();
    let client: Arc<dyn StorageClient> =
        Arc::new(LocalClient::new(root_id, dir.path()));
    let mut config = StorageRootConfig::named("library", "local");
    config.path = dir.path().to_string_lossy().into_owned();

    let service = ChangeWatchService::new(WatchConfig {
        debounce_window_ms: debounce_ms,
        ..WatchConfig::default()
    });
    service.register(client, &config).unwrap();
    WatchedRoot {
        dir,
        root_id,
        service,
    }
}

async fn next_event(
    events: &mut broadcast::Receiver<ChangeEvent>,
) -> ChangeEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no change event within five seconds")
        .expect("event channel closed")
}

#[tokio::test]
async fn a_new_file_settles_into_one_created_event() {
    let watched = watched_root(100);
    let mut events = watched.service.subscribe();

    fs::write(watched.dir.path().join("fresh.mkv"), b"data").unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.root_id, watched.root_id);
    assert_eq!(event.path, "fresh.mkv");
    assert_eq!(event.kind, ChangeKind::Created);
}

#[tokio::test]
async fn deleting_a_file_surfaces_as_removed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("old.mkv"), b"data").unwrap();

    let root_id = RootId::new();
    let client: Arc<dyn StorageClient> =
        Arc::new(LocalClient::new(root_id, dir.path()));
    let mut config = StorageRootConfig::named("library", "local");
    config.path = dir.path().to_string_lossy().into_owned();

    let service = ChangeWatchService::new(WatchConfig {
        debounce_window_ms: 100,
        ..WatchConfig::default()
    });
    service.register(client, &config).unwrap();
    let mut events = service.subscribe();

    fs::remove_file(dir.path().join("old.mkv")).unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.path, "old.mkv");
    assert_eq!(event.kind, ChangeKind::Removed);
}

#[tokio::test]
async fn a_write_burst_collapses_into_one_event() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("growing.mkv"), b"v0").unwrap();

    let root_id = RootId::new();
    let client: Arc<dyn StorageClient> =
        Arc::new(LocalClient::new(root_id, dir.path()));
    let mut config = StorageRootConfig::named("library", "local");
    config.path = dir.path().to_string_lossy().into_owned();

    let service = ChangeWatchService::new(WatchConfig {
        debounce_window_ms: 200,
        ..WatchConfig::default()
    });
    service.register(client, &config).unwrap();
    let mut events = service.subscribe();

    for chunk in 0..5u8 {
        fs::write(dir.path().join("growing.mkv"), [chunk; 16]).unwrap();
    }

    let event = next_event(&mut events).await;
    assert_eq!(event.path, "growing.mkv");
    assert_eq!(event.kind, ChangeKind::Modified);

    // The burst already settled; nothing else should follow.
    let followup =
        timeout(Duration::from_millis(400), events.recv()).await;
    assert!(followup.is_err(), "burst produced a second event");
}

#[tokio::test]
async fn files_in_subdirectories_keep_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("movies/Dune (2021)")).unwrap();

    let root_id = RootId::new();
    let client: Arc<dyn StorageClient> =
        Arc::new(LocalClient::new(root_id, dir.path()));
    let mut config = StorageRootConfig::named("library", "local");
    config.path = dir.path().to_string_lossy().into_owned();

    let service = ChangeWatchService::new(WatchConfig {
        debounce_window_ms: 100,
        ..WatchConfig::default()
    });
    service.register(client, &config).unwrap();
    let mut events = service.subscribe();

    fs::write(
        dir.path().join("movies/Dune (2021)/Dune.2021.mkv"),
        b"data",
    )
    .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.path, "movies/Dune (2021)/Dune.2021.mkv");
    assert_eq!(event.kind, ChangeKind::Created);
}

#[tokio::test]
async fn unregister_silences_the_root() {
    let watched = watched_root(50);
    let mut events = watched.service.subscribe();

    watched.service.unregister(watched.root_id);
    assert!(!watched.service.is_watching(watched.root_id));

    fs::write(watched.dir.path().join("unseen.mkv"), b"data").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}
