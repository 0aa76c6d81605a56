use crate::{
    domain::{Item, ItemId, ReorderStrategy},
    error::{ApiError, ErrorCode, StoreError},
    protocol::{BatchRequest, ReorderRequest},
};

#[test]
fn reorder_request_accepts_both_wire_shapes() {
    let legacy: ReorderRequest =
        serde_json::from_str(r#"{"id1":"a","id2":"b"}"#).expect("legacy shape");
    let dragged: ReorderRequest =
        serde_json::from_str(r#"{"draggedId":"a","targetId":"b"}"#).expect("drag shape");

    assert_eq!(legacy.id1, ItemId::from("a"));
    assert_eq!(legacy.id2, ItemId::from("b"));
    assert_eq!(dragged.id1, legacy.id1);
    assert_eq!(dragged.id2, legacy.id2);
}

#[test]
fn item_serializes_with_plain_string_id() {
    let item = Item {
        id: ItemId::from("abc"),
        name: "Item-1".into(),
        position: 1,
        selected: false,
    };
    let value = serde_json::to_value(&item).expect("json");
    assert_eq!(
        value,
        serde_json::json!({ "id": "abc", "name": "Item-1", "position": 1, "selected": false })
    );
}

#[test]
fn item_without_selected_flag_defaults_to_unselected() {
    let item: Item =
        serde_json::from_str(r#"{"id":"x","name":"Item-9","position":9}"#).expect("json");
    assert!(!item.selected);
}

#[test]
fn batch_request_rejects_non_array_items() {
    let result = serde_json::from_str::<BatchRequest>(r#"{"items":{"id":"a"}}"#);
    assert!(result.is_err());
}

#[test]
fn synthetic_items_are_named_by_index() {
    let item = Item::synthetic(42);
    assert_eq!(item.name, "Item-42");
    assert_eq!(item.position, 42);
    assert!(!item.selected);
    assert_ne!(Item::synthetic(42).id, item.id);
}

#[test]
fn reorder_strategy_parses_config_spellings() {
    assert_eq!("swap".parse::<ReorderStrategy>(), Ok(ReorderStrategy::Swap));
    assert_eq!(
        "Move-Before".parse::<ReorderStrategy>(),
        Ok(ReorderStrategy::MoveBefore)
    );
    assert!("shuffle".parse::<ReorderStrategy>().is_err());
}

#[test]
fn store_errors_map_to_wire_codes() {
    let not_found: ApiError = StoreError::NotFound(ItemId::from("gone")).into();
    assert_eq!(not_found.code, ErrorCode::NotFound);
    assert!(not_found.message.contains("gone"));

    let invalid: ApiError = StoreError::InvalidReference("same item".into()).into();
    assert_eq!(invalid.code, ErrorCode::InvalidReference);

    let malformed: ApiError = StoreError::MalformedInput("items".into()).into();
    assert_eq!(malformed.code, ErrorCode::Validation);
}
