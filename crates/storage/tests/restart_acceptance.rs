use std::{sync::Arc, time::Duration};

use shared::domain::{ItemUpdate, ReorderStrategy};
use storage::{FileSnapshotStore, OrderedStore, PersistenceController, PersistenceOptions};

fn fast_options() -> PersistenceOptions {
    PersistenceOptions {
        flush_delay: Duration::from_millis(20),
        write_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn mutations_survive_restart_through_the_snapshot_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = Arc::new(FileSnapshotStore::new(dir.path().join("data").join("items.json")));

    let store = PersistenceController::load_at_startup(sink.as_ref(), 100).await;
    assert!(sink.path().exists(), "generated data is saved immediately");

    let controller = PersistenceController::spawn(store.clone(), sink.clone(), fast_options());
    let items = store.snapshot().await;
    store
        .set_selected(&items[10].id, true)
        .await
        .expect("select");
    store
        .reorder(&items[0].id, &items[99].id, ReorderStrategy::MoveBefore)
        .await
        .expect("move");
    let left = store.get(&items[50].id).await.expect("left");
    let right = store.get(&items[51].id).await.expect("right");
    let applied = store
        .apply_batch(&[
            ItemUpdate {
                id: left.id.clone(),
                position: right.position,
                selected: true,
            },
            ItemUpdate {
                id: right.id.clone(),
                position: left.position,
                selected: false,
            },
        ])
        .await;
    assert_eq!(applied.applied, 2);
    assert_eq!(applied.violation, None);
    controller.shutdown().await.expect("shutdown flush");

    let restarted = PersistenceController::load_at_startup(sink.as_ref(), 100).await;
    assert_eq!(restarted.snapshot().await, store.snapshot().await);
    assert_eq!(restarted.selected_count().await, 2);
    restarted.verify_positions().await.expect("positions 1..=100");
}

#[tokio::test]
async fn debounced_flush_lands_on_disk_after_quiet_period() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = Arc::new(FileSnapshotStore::new(dir.path().join("items.json")));
    let store = OrderedStore::generate(12);
    let controller = PersistenceController::spawn(store.clone(), sink.clone(), fast_options());

    let first = store.snapshot().await[0].id.clone();
    store.set_selected(&first, true).await.expect("select");

    let mut flushed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if controller.status().await.flush_count == 1 {
            flushed = true;
            break;
        }
    }
    assert!(flushed, "flush did not happen within two seconds");

    let reloaded = PersistenceController::load_at_startup(sink.as_ref(), 0).await;
    assert_eq!(reloaded.snapshot().await, store.snapshot().await);
}
