use crate::*;
use models::{PoolState, Position, Size};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn envelope_wire_shape_matches_the_contract() {
    let envelope = Envelope::correlated(
        Payload::QtPositionChanged {
            quick_tab_id: "qt-x".into(),
            new_position: Position { x: 100, y: 200 },
        },
        "c2".to_string(),
        1_000,
    );

    assert_eq!(
        serde_json::to_value(&envelope).unwrap(),
        json!({
            "type": "QT_POSITION_CHANGED",
            "quickTabId": "qt-x",
            "newPosition": {"x": 100, "y": 200},
            "correlationId": "c2",
            "timestamp": 1_000,
        })
    );
}

#[test]
fn every_type_tag_round_trips_through_its_wire_name() {
    let state = PoolState::empty();
    let payloads = vec![
        Payload::QtPositionChanged {
            quick_tab_id: "qt-x".into(),
            new_position: Position { x: 0, y: 0 },
        },
        Payload::QtSizeChanged {
            quick_tab_id: "qt-x".into(),
            new_size: Size { w: 400, h: 300 },
        },
        Payload::QtCreated {
            quick_tab: QuickTabDraft {
                id: None,
                origin_tab_id: Some(7),
                url: "https://a/".to_string(),
                position: Position { x: 10, y: 20 },
                size: Size { w: 400, h: 300 },
                minimized: false,
                title: None,
                origin_container_id: None,
            },
        },
        Payload::QtMinimized { quick_tab_id: "qt-x".into() },
        Payload::QtRestored { quick_tab_id: "qt-x".into() },
        Payload::QtClosed { quick_tab_id: "qt-x".into() },
        Payload::ManagerCloseAll,
        Payload::ManagerCloseMinimized,
        Payload::ManagerStateChanged {
            manager_state: Default::default(),
        },
        Payload::RequestFullState,
        Payload::ContentScriptReady,
        Payload::ContentScriptUnload,
        Payload::QtStateSync {
            state: state.clone(),
            source: "coordinator".to_string(),
            removed_quick_tab_ids: vec![],
        },
        Payload::SidebarUpdate { state },
    ];

    assert_eq!(payloads.len(), MESSAGE_TYPES.len());
    for payload in payloads {
        let encoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(encoded["type"], payload.type_name(), "{payload:?}");
        assert!(MESSAGE_TYPES.contains(&payload.type_name()));

        let decoded: Payload = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, payload);
    }
}

#[test]
fn patterns_partition_the_contract() {
    use Pattern::*;
    let expect = [
        ("QT_POSITION_CHANGED", Local),
        ("QT_SIZE_CHANGED", Local),
        ("MANAGER_STATE_CHANGED", Local),
        ("QT_CREATED", Global),
        ("QT_MINIMIZED", Global),
        ("QT_RESTORED", Global),
        ("QT_CLOSED", Global),
        ("MANAGER_CLOSE_ALL", Manager),
        ("MANAGER_CLOSE_MINIMIZED", Manager),
        ("REQUEST_FULL_STATE", Sync),
        ("CONTENT_SCRIPT_READY", Lifecycle),
        ("CONTENT_SCRIPT_UNLOAD", Lifecycle),
        ("QT_STATE_SYNC", Push),
        ("SIDEBAR_UPDATE", Push),
    ];

    for (name, pattern) in expect {
        let probe = json!({
            "type": name,
            "correlationId": "c1",
            "timestamp": 1,
            // Superset of required fields; unknown fields are ignored.
            "quickTabId": "qt-x",
            "newPosition": {"x": 0, "y": 0},
            "newSize": {"w": 400, "h": 300},
            "managerState": {"position": {"x": 0, "y": 0}, "size": {"w": 320, "h": 480}, "collapsed": false},
            "quickTab": {"url": "https://a/", "position": {"x": 0, "y": 0}, "size": {"w": 400, "h": 300}},
            "state": serde_json::to_value(PoolState::empty()).unwrap(),
            "source": "test",
        });
        let envelope = parse_envelope(&probe).unwrap();
        assert_eq!(envelope.payload.pattern(), pattern, "{name}");
    }
}

#[test]
fn validation_reports_every_defect_without_dispatch() {
    let err = parse_envelope(&json!({
        "type": "QT_TELEPORTED",
        "correlationId": "",
        "timestamp": "yesterday",
    }))
    .unwrap_err();

    assert_eq!(
        err.details,
        vec![
            "unknown message type 'QT_TELEPORTED'",
            "correlationId must not be empty",
            "timestamp must be numeric",
        ]
    );

    let response = Response::invalid(err.details);
    let encoded = serde_json::to_value(&response).unwrap();
    assert_eq!(encoded["success"], json!(false));
    assert_eq!(encoded["error"], json!("Invalid message"));
    assert_eq!(encoded["details"].as_array().unwrap().len(), 3);
}

#[test]
fn correlation_ids_are_unique_and_non_empty() {
    let a = new_correlation_id();
    let b = new_correlation_id();
    assert!(!a.is_empty());
    assert_ne!(a, b);
}

#[test]
fn responses_elide_unset_fields() {
    let encoded = serde_json::to_value(Response::ok().with_pattern(Pattern::Global)).unwrap();
    assert_eq!(encoded, json!({"success": true, "pattern": "GLOBAL"}));
}
