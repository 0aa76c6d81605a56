use super::*;

use std::collections::HashMap;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn defaults_match_the_reference_deployment() {
    let settings = Settings::default();
    assert_eq!(settings.server_bind, "127.0.0.1:3001");
    assert_eq!(settings.item_count, 1_000_000);
    assert_eq!(settings.flush_delay_ms, 500);
    assert_eq!(settings.reorder_strategy, ReorderStrategy::Swap);
    assert_eq!(
        settings.persistence_options().flush_delay,
        Duration::from_millis(500)
    );
}

#[test]
fn file_settings_override_defaults() {
    let mut settings = Settings::default();
    apply_file_settings(
        &mut settings,
        r#"
        bind_addr = "0.0.0.0:9000"
        data_file = "/tmp/items.json"
        item_count = 5000
        flush_delay_ms = 50
        reorder_strategy = "move_before"
        "#,
    )
    .expect("valid toml");

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.data_file, "/tmp/items.json");
    assert_eq!(settings.item_count, 5000);
    assert_eq!(settings.flush_delay_ms, 50);
    assert_eq!(settings.flush_timeout_ms, 10_000);
    assert_eq!(settings.reorder_strategy, ReorderStrategy::MoveBefore);
}

#[test]
fn invalid_file_settings_are_reported() {
    let mut settings = Settings::default();
    assert!(apply_file_settings(&mut settings, "item_count = \"many\"").is_err());
    assert!(apply_file_settings(&mut settings, "reorder_strategy = \"shuffle\"").is_err());
    assert_eq!(settings.reorder_strategy, ReorderStrategy::Swap);
}

#[test]
fn app_prefixed_env_wins_over_plain_env() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        env(&[
            ("SERVER_BIND", "127.0.0.1:1"),
            ("APP__BIND_ADDR", "127.0.0.1:2"),
            ("DATA_FILE", "plain.json"),
            ("APP__ITEM_COUNT", "42"),
            ("APP__REORDER_STRATEGY", "move"),
        ]),
    );

    assert_eq!(settings.server_bind, "127.0.0.1:2");
    assert_eq!(settings.data_file, "plain.json");
    assert_eq!(settings.item_count, 42);
    assert_eq!(settings.reorder_strategy, ReorderStrategy::MoveBefore);
}

#[test]
fn unparsable_env_values_keep_previous_setting() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        env(&[
            ("APP__ITEM_COUNT", "lots"),
            ("APP__FLUSH_DELAY_MS", "-1"),
            ("APP__MAX_PAGE_SIZE", "250"),
        ]),
    );

    assert_eq!(settings.item_count, 1_000_000);
    assert_eq!(settings.flush_delay_ms, 500);
    assert_eq!(settings.max_page_size, 250);
}

#[test]
fn empty_data_file_falls_back_to_default() {
    assert_eq!(normalize_data_file("   "), PathBuf::from(DEFAULT_DATA_FILE));
    assert_eq!(
        normalize_data_file(" ./state/items.json "),
        PathBuf::from("./state/items.json")
    );
}

#[test]
fn creates_parent_dir_for_data_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let data_file = temp_root.path().join("nested").join("items.json");

    let prepared =
        prepare_data_file(data_file.to_string_lossy().as_ref()).expect("prepare data file");
    assert_eq!(prepared, data_file);
    assert!(temp_root.path().join("nested").is_dir());
}
