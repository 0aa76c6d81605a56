use super::*;

fn sample_items() -> Vec<Item> {
    (1..=3)
        .map(|index| Item {
            id: ItemId::from(format!("id-{index}").as_str()),
            name: format!("Item-{index}"),
            position: index,
            selected: index == 2,
        })
        .collect()
}

#[tokio::test]
async fn file_store_round_trips_every_field() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path().join("nested").join("items.json"));

    store.save(sample_items()).await.expect("save");
    assert!(store.path().exists());
    assert!(!dir.path().join("nested").join("items.json.tmp").exists());

    let loaded = store.load().await.expect("load");
    assert_eq!(loaded, sample_items());
}

#[tokio::test]
async fn file_store_overwrites_previous_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path().join("items.json"));

    store.save(sample_items()).await.expect("first save");
    let mut second = sample_items();
    second.truncate(1);
    second[0].selected = true;
    store.save(second.clone()).await.expect("second save");

    assert_eq!(store.load().await.expect("load"), second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_save_never_clobbers_a_later_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path().join("items.json"));
    let large: Vec<Item> = (1..=200_000).map(Item::synthetic).collect();

    // Usually gives up while the large write is still running.
    let _ = tokio::time::timeout(Duration::from_millis(1), store.save(large)).await;

    store.save(sample_items()).await.expect("later save succeeds");
    assert_eq!(store.load().await.expect("load"), sample_items());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.load().await.expect("reload"), sample_items());
    assert!(!dir.path().join("items.json.tmp").exists());
}

#[tokio::test]
async fn file_store_load_fails_for_missing_or_corrupt_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path().join("items.json"));
    assert!(store.load().await.is_err());

    std::fs::write(store.path(), b"{ not json").expect("write");
    assert!(store.load().await.is_err());
}

#[test]
fn entries_are_keyed_by_item_id() {
    let encoded = encode_entries(&sample_items()).expect("encode");
    let value: serde_json::Value = serde_json::from_slice(&encoded).expect("json");
    assert_eq!(value[0][0], "id-1");
    assert_eq!(value[0][1]["name"], "Item-1");
    assert_eq!(value[1][1]["selected"], true);
}

#[test]
fn decode_ignores_stale_entry_keys() {
    let raw = br#"[["stale-key",{"id":"real","name":"Item-1","position":1,"selected":false}]]"#;
    let items = decode_entries(raw).expect("decode");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, ItemId::from("real"));
}

#[tokio::test]
async fn memory_store_tracks_saves_and_simulated_failures() {
    let store = MemorySnapshotStore::new();
    assert!(store.load().await.is_err());

    store.save(sample_items()).await.expect("save");
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.load().await.expect("load"), sample_items());

    store.set_simulate_write_error(true);
    assert!(store.save(Vec::new()).await.is_err());
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.saved(), Some(sample_items()));
}
