//! End-to-end handling of published envelopes against the in-memory store.

use backup_service::{
    BackupHandler, CollisionPolicy, Disposition, MemoryObjectStore, ObjectPlacementWriter,
    ObjectStore,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

#[derive(Serialize)]
struct Packed {
    metadata: Value,
    #[serde(with = "serde_bytes")]
    file: Vec<u8>,
}

fn pack(metadata: Value, file: &[u8]) -> Vec<u8> {
    rmp_serde::to_vec_named(&Packed {
        metadata,
        file: file.to_vec(),
    })
    .unwrap()
}

fn setup(policy: CollisionPolicy) -> (Arc<MemoryObjectStore>, BackupHandler) {
    let store = Arc::new(MemoryObjectStore::new());
    let handler = BackupHandler::new(ObjectPlacementWriter::new(store.clone(), policy));
    (store, handler)
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
}

#[tokio::test]
async fn test_sensor_envelope_lands_in_minute_bucket() {
    let (store, handler) = setup(CollisionPolicy::Overwrite);

    let payload = pack(json!({"sensor_id": "s1"}), b"\x00\x01");
    assert_ok!(
        handler
            .handle("/biofield-signal/dev1/temp", &payload, at(10, 15, 30))
            .await
    );

    assert_eq!(
        store.keys(),
        vec![
            "dev1/temp/2024/01/01/10-15/data.h5".to_string(),
            "dev1/temp/2024/01/01/10-15/metadata.json".to_string(),
        ]
    );

    let metadata: Value = serde_json::from_slice(
        &store
            .get_object("dev1/temp/2024/01/01/10-15/metadata.json")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(metadata, json!({"sensor_id": "s1"}));

    let data = store
        .get_object("dev1/temp/2024/01/01/10-15/data.h5")
        .await
        .unwrap();
    assert_eq!(data, vec![0x00, 0x01]);
}

#[tokio::test]
async fn test_round_trip_on_short_root() {
    let (store, handler) = setup(CollisionPolicy::Overwrite);

    let placement = handler
        .handle("/root/d/s", &pack(json!({"sensor_id": "x"}), b"abc"), at(8, 0, 0))
        .await
        .unwrap();

    let metadata: Value =
        serde_json::from_slice(&store.get_object(&placement.metadata_key).await.unwrap())
            .unwrap();
    assert_eq!(metadata, json!({"sensor_id": "x"}));
    assert_eq!(store.get_object(&placement.payload_key).await.unwrap(), b"abc");
}

#[tokio::test]
async fn test_malformed_messages_never_touch_the_store() {
    let (store, handler) = setup(CollisionPolicy::Overwrite);
    let payload = pack(json!({}), b"abc");

    for topic in ["/biofield-signal", "/biofield-signal/dev1", "/a/b/c/d", "/root//s"] {
        let err = assert_err!(handler.handle(topic, &payload, at(9, 0, 0)).await);
        assert_eq!(err.disposition(), Disposition::Drop);
    }

    let err = assert_err!(
        handler
            .handle("/biofield-signal/dev1/temp", b"\xc1", at(9, 0, 0))
            .await
    );
    assert_eq!(err.disposition(), Disposition::Drop);

    let positional = rmp_serde::to_vec(&Packed {
        metadata: json!({"sensor_id": "s1"}),
        file: b"abc".to_vec(),
    })
    .unwrap();
    let err = assert_err!(
        handler
            .handle("/biofield-signal/dev1/temp", &positional, at(9, 0, 0))
            .await
    );
    assert_eq!(err.disposition(), Disposition::Drop);

    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_same_minute_messages_overwrite_by_default() {
    let (store, handler) = setup(CollisionPolicy::Overwrite);

    handler
        .handle("/biofield-signal/d/s", &pack(json!({"seq": 1}), b"one"), at(11, 42, 1))
        .await
        .unwrap();
    handler
        .handle("/biofield-signal/d/s", &pack(json!({"seq": 2}), b"two"), at(11, 42, 59))
        .await
        .unwrap();

    assert_eq!(store.keys().len(), 2);
    assert_eq!(store.put_count(), 4);
    assert_eq!(
        store.get_object("d/s/2024/01/01/11-42/data.h5").await.unwrap(),
        b"two"
    );
}

#[tokio::test]
async fn test_same_minute_messages_are_kept_with_preserve_policy() {
    let (store, handler) = setup(CollisionPolicy::Preserve);

    handler
        .handle("/biofield-signal/d/s", &pack(json!({"seq": 1}), b"one"), at(11, 42, 1))
        .await
        .unwrap();
    handler
        .handle("/biofield-signal/d/s", &pack(json!({"seq": 2}), b"two"), at(11, 42, 59))
        .await
        .unwrap();

    assert_eq!(
        store.get_object("d/s/2024/01/01/11-42/data.h5").await.unwrap(),
        b"one"
    );
    assert_eq!(
        store.get_object("d/s/2024/01/01/11-42-1/data.h5").await.unwrap(),
        b"two"
    );
}

#[tokio::test]
async fn test_next_minute_gets_new_bucket() {
    let (store, handler) = setup(CollisionPolicy::Overwrite);

    let before_midnight = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 30).unwrap();
    let after_midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 5).unwrap();

    handler
        .handle("/biofield-signal/d/s", &pack(json!({}), b"a"), before_midnight)
        .await
        .unwrap();
    handler
        .handle("/biofield-signal/d/s", &pack(json!({}), b"b"), after_midnight)
        .await
        .unwrap();

    assert!(store.object("d/s/2024/02/29/23-59/data.h5").is_some());
    assert!(store.object("d/s/2024/03/01/00-00/data.h5").is_some());
}
