//! One root, full stack: registration, health, scanning, change events,
//! and teardown through the manager facade.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use fathom_config::{FathomConfig, StorageRootConfig};
use fathom_core::StorageManager;
use fathom_core::context::OpContext;
use fathom_model::{ChangeKind, ConnectionState};

fn library_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let movie = dir.path().join("movies/Inception (2010)");
    let show = dir.path().join("shows/Severance/Season 01");
    fs::create_dir_all(&movie).unwrap();
    fs::create_dir_all(&show).unwrap();
    fs::write(movie.join("Inception.2010.1080p.mkv"), b"reel").unwrap();
    fs::write(show.join("Severance.S01E01.mkv"), b"episode").unwrap();
    dir
}

fn root_for(path: &Path) -> StorageRootConfig {
    let mut config = StorageRootConfig::named("library", "local");
    config.path = path.to_string_lossy().into_owned();
    config
}

#[tokio::test]
async fn a_library_flows_from_registration_to_shutdown() {
    let dir = library_tree();
    let mut config = FathomConfig::default();
    config.watch.debounce_window_ms = 150;

    let manager = StorageManager::new(config);
    let root_id = manager.register_root(root_for(dir.path())).unwrap();
    manager.start();
    let mut changes = manager.subscribe_changes();

    // The root answers probes as soon as it is registered.
    let health = manager.check_health(root_id).await.unwrap();
    assert_eq!(health.state, ConnectionState::Connected);
    assert!(health.latency_ms.is_some());

    // First full walk of the library.
    let handle = manager.start_scan(root_id, None).await.unwrap();
    let (records, report) = handle.collect().await;
    let report = report.unwrap();
    assert!(report.completed);
    assert_eq!(report.files_emitted, 2);
    assert!(
        records
            .iter()
            .any(|r| r.path == "movies/Inception (2010)/Inception.2010.1080p.mkv")
    );
    assert!(
        records
            .iter()
            .any(|r| r.path == "shows/Severance/Season 01/Severance.S01E01.mkv")
    );

    // The scan primed listing snapshots for the offline fallback.
    assert!(manager.cache_stats().fresh > 0);

    // A write through the storage API lands on disk and comes back as a
    // settled change event.
    let client = manager.client(root_id).unwrap();
    let ctx = OpContext::unbounded();
    client
        .write(
            &ctx,
            "movies/Inception (2010)/Inception.2010.srt",
            b"WEBVTT",
        )
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("no change event within five seconds")
        .expect("change channel closed");
    assert_eq!(event.root_id, root_id);
    assert_eq!(event.path, "movies/Inception (2010)/Inception.2010.srt");
    assert_eq!(event.kind, ChangeKind::Created);

    // A rescan picks the new file up.
    let handle = manager.start_scan(root_id, None).await.unwrap();
    let (_, report) = handle.collect().await;
    assert_eq!(report.unwrap().files_emitted, 3);

    // After shutdown the filesystem can churn without anyone hearing it.
    manager.shutdown().await;
    fs::write(dir.path().join("late.mkv"), b"data").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(changes.try_recv().is_err());
    assert!(manager.root_ids().is_empty());
}

#[tokio::test]
async fn candidate_roots_can_be_probed_without_registering() {
    let dir = library_tree();
    let manager = StorageManager::new(FathomConfig::default());

    let report = manager
        .test_connection(&root_for(dir.path()))
        .await
        .unwrap();
    assert!(report.healthy());
    assert_eq!(manager.root_ids().len(), 0);

    // Reachability failures come back as a report, not an error.
    let mut gone = StorageRootConfig::named("gone", "local");
    gone.path = dir
        .path()
        .join("no-such-directory")
        .to_string_lossy()
        .into_owned();
    let report = manager.test_connection(&gone).await.unwrap();
    assert_eq!(report.state, ConnectionState::Offline);
    assert!(report.error.is_some());

    // Validation failures do error: a remote protocol needs a host.
    let smb = StorageRootConfig::named("nas", "smb");
    assert!(manager.test_connection(&smb).await.is_err());
}

#[tokio::test]
async fn health_reports_are_broadcast_to_subscribers() {
    let dir = library_tree();
    let manager = StorageManager::new(FathomConfig::default());
    let root_id = manager.register_root(root_for(dir.path())).unwrap();
    let mut health = manager.subscribe_health();

    manager.check_health(root_id).await.unwrap();

    let report = timeout(Duration::from_secs(2), health.recv())
        .await
        .expect("no health report within two seconds")
        .expect("health channel closed");
    assert_eq!(report.root_id, root_id);
    assert!(report.healthy());
}
