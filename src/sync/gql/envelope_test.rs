use serde_json::json;

use crate::sync::sync_operation_test::op_with_ordinal;
use crate::sync_operations_to_envelopes;
use crate::envelope_to_sync_operations;
use crate::sort_envelopes_by_first_operation_timestamp;
use crate::ChannelMeta;
use crate::SyncEnvelope;
use crate::SyncOperation;

fn envelope_with(ops: Vec<crate::OperationWithContext>) -> SyncEnvelope {
    SyncEnvelope {
        envelope_type: "operations".to_string(),
        channel_meta: ChannelMeta {
            id: "chan-1".to_string(),
        },
        operations: Some(ops),
        cursor: None,
        key: None,
        depends_on: None,
    }
}

#[test]
fn test_wire_shape_is_camel_case() {
    let envelope = envelope_with(vec![op_with_ordinal("d1", 0, 1)]);
    let wire = serde_json::to_value(&envelope).unwrap();

    assert_eq!(wire["type"], "operations");
    assert_eq!(wire["channelMeta"]["id"], "chan-1");
    let op = &wire["operations"][0];
    assert_eq!(op["context"]["documentId"], "d1");
    assert_eq!(op["context"]["documentType"], "test/doc");
    assert!(op["operation"]["timestampUtcMs"].is_string());
    // empty optionals stay off the wire
    assert!(wire.get("cursor").is_none());
}

#[test]
fn test_normalize_lowercases_type_and_filters_empty_depends_on() {
    let envelope = SyncEnvelope {
        envelope_type: "OPERATIONS".to_string(),
        channel_meta: ChannelMeta {
            id: "chan-1".to_string(),
        },
        operations: None,
        cursor: None,
        key: Some("0".to_string()),
        depends_on: Some(vec!["".to_string(), "1".to_string(), "".to_string()]),
    };

    let normalized = envelope.normalize();
    assert_eq!(normalized.envelope_type, "operations");
    assert!(normalized.is_operations());
    assert_eq!(normalized.depends_on, Some(vec!["1".to_string()]));
}

#[test]
fn test_deserializes_wire_payload() {
    let wire = json!({
        "type": "operations",
        "channelMeta": { "id": "chan-9" },
        "operations": [{
            "operation": {
                "id": "op-1",
                "index": 0,
                "skip": 0,
                "hash": "abc",
                "timestampUtcMs": "1700000000000",
                "action": {
                    "id": "a-1",
                    "type": "SET_TITLE",
                    "input": {"title": "x"},
                    "scope": "global",
                    "timestampUtcMs": "1700000000000"
                }
            },
            "context": {
                "documentId": "d1",
                "documentType": "test/doc",
                "scope": "global",
                "branch": "main",
                "ordinal": 12
            }
        }],
        "key": "0",
        "dependsOn": []
    });

    let envelope: SyncEnvelope = serde_json::from_value(wire).unwrap();
    assert!(envelope.is_operations());
    let ops = envelope.operations.as_ref().unwrap();
    assert_eq!(ops[0].operation.action.action_type, "SET_TITLE");
    assert_eq!(ops[0].context.ordinal, 12);
}

#[test]
fn test_envelope_to_sync_operations_groups_by_document_and_branch() {
    let mut op_other_branch = op_with_ordinal("d1", 0, 3);
    op_other_branch.context.branch = "draft".to_string();

    let envelope = envelope_with(vec![
        op_with_ordinal("d1", 0, 1),
        op_with_ordinal("d2", 0, 2),
        op_with_ordinal("d1", 1, 4),
        op_other_branch,
    ]);

    let sync_ops = envelope_to_sync_operations(&envelope, "remote-a");
    assert_eq!(sync_ops.len(), 3);
    for op in &sync_ops {
        assert_eq!(op.remote_name(), "remote-a");
    }

    let d1_main = sync_ops
        .iter()
        .find(|op| op.document_id() == "d1" && op.branch() == "main")
        .unwrap();
    assert_eq!(d1_main.operations().len(), 2);
}

#[test]
fn test_sync_operations_to_envelopes_maps_depends_on_keys() {
    let first = SyncOperation::new(
        "job-1",
        "remote-a",
        "d1",
        vec!["global".to_string()],
        "main",
        vec![op_with_ordinal("d1", 0, 1)],
        Vec::new(),
    );
    let second = SyncOperation::new(
        "job-2",
        "remote-a",
        "d2",
        vec!["global".to_string()],
        "main",
        vec![op_with_ordinal("d2", 0, 2)],
        vec!["job-1".to_string()],
    );

    let envelopes = sync_operations_to_envelopes("chan-1", &[first, second]);
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[0].key.as_deref(), Some("0"));
    assert_eq!(envelopes[0].depends_on.as_deref(), Some(&[][..]));
    assert_eq!(envelopes[1].key.as_deref(), Some("1"));
    // the dependent envelope points at its dependency's batch key
    assert_eq!(
        envelopes[1].depends_on.as_deref(),
        Some(&["0".to_string()][..])
    );
}

#[test]
fn test_sort_by_first_operation_timestamp() {
    let mut late = op_with_ordinal("d1", 0, 1);
    late.operation.timestamp_utc_ms = "2000".to_string();
    let mut early = op_with_ordinal("d2", 0, 2);
    early.operation.timestamp_utc_ms = "1000".to_string();

    let sorted = sort_envelopes_by_first_operation_timestamp(vec![
        envelope_with(vec![late]),
        envelope_with(vec![early]),
    ]);

    assert_eq!(sorted[0].first_operation_timestamp(), 1000);
    assert_eq!(sorted[1].first_operation_timestamp(), 2000);
}
