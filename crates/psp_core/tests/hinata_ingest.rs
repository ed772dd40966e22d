use psp_core::{
    AccessLevel, AppManifest, AppRegistryError, EngineConfig, EngineError, HiNataRecord,
    HiNataValidationError, IngestError, PersonalizationEngine, RecordListQuery,
};
use uuid::Uuid;

fn engine() -> PersonalizationEngine {
    PersonalizationEngine::open_in_memory(EngineConfig::default()).unwrap()
}

fn engine_with_apps(apps: Vec<AppManifest>) -> PersonalizationEngine {
    let config = EngineConfig {
        apps,
        ..EngineConfig::default()
    };
    PersonalizationEngine::open_in_memory(config).unwrap()
}

fn manifest(id: &str, scopes: &[&str]) -> AppManifest {
    AppManifest {
        id: id.to_string(),
        version: "1.0.0".to_string(),
        scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
    }
}

fn ingest_error(err: EngineError) -> IngestError {
    match err {
        EngineError::Ingest(inner) => inner,
        other => panic!("expected ingest error, got {other}"),
    }
}

#[test]
fn submitted_record_is_stored_normalized() {
    let engine = engine();
    let mut record = HiNataRecord::new("  reader ", "  deep work matters  ", "");
    record.tags = vec![" Focus ".to_string(), "focus".to_string(), "Books".to_string()];
    record.access_level = AccessLevel::Public;

    let id = engine.submit_hinata(&record).unwrap();
    assert_eq!(id, record.id);

    let stored = engine.get_record(id).unwrap().unwrap();
    assert_eq!(stored.source_app, "reader");
    assert_eq!(stored.highlight, "deep work matters");
    assert_eq!(stored.tags, vec!["books".to_string(), "focus".to_string()]);
    assert_eq!(stored.access_level, AccessLevel::Public);
    assert_eq!(stored.timestamp, record.timestamp);
}

#[test]
fn record_without_content_is_rejected() {
    let engine = engine();
    let record = HiNataRecord::new("reader", "   ", "");

    let err = ingest_error(engine.submit_hinata(&record).unwrap_err());
    assert!(matches!(
        err,
        IngestError::Validation(HiNataValidationError::EmptyContent)
    ));
    assert_eq!(err.code(), "validation");
    assert_eq!(engine.stats().unwrap().total_records, 0);
}

#[test]
fn record_with_invalid_source_app_is_rejected() {
    let engine = engine();
    let record = HiNataRecord::new("Reader App", "text", "");

    let err = ingest_error(engine.submit_hinata(&record).unwrap_err());
    assert!(matches!(
        err,
        IngestError::Validation(HiNataValidationError::InvalidSourceApp(_))
    ));
}

#[test]
fn record_with_non_positive_timestamp_is_rejected() {
    let engine = engine();
    let record = HiNataRecord::with_id(Uuid::new_v4(), 0, "reader", "text", "");

    let err = ingest_error(engine.submit_hinata(&record).unwrap_err());
    assert!(matches!(
        err,
        IngestError::Validation(HiNataValidationError::InvalidTimestamp(0))
    ));
}

#[test]
fn duplicate_id_is_rejected_and_original_kept() {
    let engine = engine();
    let record = HiNataRecord::new("reader", "first version", "");
    engine.submit_hinata(&record).unwrap();

    let mut again = record.clone();
    again.highlight = "second version".to_string();
    let err = ingest_error(engine.submit_hinata(&again).unwrap_err());
    assert!(matches!(err, IngestError::DuplicateRecord(id) if id == record.id));

    let stored = engine.get_record(record.id).unwrap().unwrap();
    assert_eq!(stored.highlight, "first version");
}

#[test]
fn tombstone_submission_is_rejected() {
    let engine = engine();
    let mut record = HiNataRecord::new("reader", "gone", "");
    record.soft_delete();

    let err = ingest_error(engine.submit_hinata(&record).unwrap_err());
    assert!(matches!(err, IngestError::TombstoneSubmitted(id) if id == record.id));
}

#[test]
fn batch_is_all_or_nothing() {
    let engine = engine();
    let existing = HiNataRecord::new("reader", "already here", "");
    engine.submit_hinata(&existing).unwrap();

    let batch = vec![
        HiNataRecord::new("reader", "new one", ""),
        existing.clone(),
    ];
    let err = ingest_error(engine.submit_hinata_batch(&batch).unwrap_err());
    assert!(matches!(err, IngestError::DuplicateRecord(_)));

    assert_eq!(engine.stats().unwrap().total_records, 1);
    assert!(engine.get_record(batch[0].id).unwrap().is_none());
}

#[test]
fn batch_reports_index_of_invalid_item() {
    let engine = engine();
    let batch = vec![
        HiNataRecord::new("reader", "fine", ""),
        HiNataRecord::new("reader", "", ""),
    ];

    let err = ingest_error(engine.submit_hinata_batch(&batch).unwrap_err());
    match err {
        IngestError::BatchItem { index, source } => {
            assert_eq!(index, 1);
            assert_eq!(source.code(), "validation");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.stats().unwrap().total_records, 0);
}

#[test]
fn empty_batch_is_rejected() {
    let engine = engine();
    let err = ingest_error(engine.submit_hinata_batch(&[]).unwrap_err());
    assert!(matches!(err, IngestError::EmptyBatch));
}

#[test]
fn json_array_is_submitted_in_order() {
    let engine = engine();
    let known = Uuid::new_v4();
    let raw = serde_json::json!([
        {
            "id": known,
            "timestamp": 1_700_000_000_000_i64,
            "source_app": "reader",
            "highlight": "typed ownership",
            "tags": ["Rust"],
            "access_level": "shared"
        },
        {
            "timestamp": 1_700_000_100_000_i64,
            "source_app": "browser",
            "note": "remember to read later"
        }
    ])
    .to_string();

    let ids = engine.submit_hinata_json(&raw).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], known);

    let second = engine.get_record(ids[1]).unwrap().unwrap();
    assert_eq!(second.access_level, AccessLevel::Private);
    assert_eq!(second.note, "remember to read later");

    let first = engine.get_record(known).unwrap().unwrap();
    assert_eq!(first.access_level, AccessLevel::Shared);
    assert_eq!(first.tags, vec!["rust".to_string()]);
}

#[test]
fn malformed_json_is_a_decode_error() {
    let engine = engine();

    let err = ingest_error(engine.submit_hinata_json("{not json").unwrap_err());
    assert_eq!(err.code(), "decode");

    let err = ingest_error(engine.submit_hinata_json("42").unwrap_err());
    assert_eq!(err.code(), "decode");

    let invalid = r#"{"timestamp": 1700000000000, "source_app": "reader"}"#;
    let err = ingest_error(engine.submit_hinata_json(invalid).unwrap_err());
    assert_eq!(err.code(), "decode");
}

#[test]
fn list_records_filters_by_tag_and_source() {
    let engine = engine();
    let mut tagged = HiNataRecord::with_id(Uuid::new_v4(), 2_000, "reader", "tagged", "");
    tagged.tags = vec!["focus".to_string()];
    let plain = HiNataRecord::with_id(Uuid::new_v4(), 1_000, "browser", "plain", "");
    engine.submit_hinata_batch(&[tagged.clone(), plain.clone()]).unwrap();

    let all = engine.list_records(&RecordListQuery::default()).unwrap();
    let ids: Vec<_> = all.iter().map(|record| record.id).collect();
    assert_eq!(ids, vec![tagged.id, plain.id]);

    let by_tag = engine
        .list_records(&RecordListQuery {
            tag: Some("FOCUS".to_string()),
            ..RecordListQuery::default()
        })
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].id, tagged.id);

    let by_source = engine
        .list_records(&RecordListQuery {
            source_app: Some("browser".to_string()),
            ..RecordListQuery::default()
        })
        .unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].id, plain.id);
}

#[test]
fn deleted_record_is_hidden_but_counted_in_total() {
    let engine = engine();
    let record = HiNataRecord::new("reader", "to be removed", "");
    engine.submit_hinata(&record).unwrap();

    engine.delete_record(record.id).unwrap();

    assert!(engine.get_record(record.id).unwrap().is_none());
    let stats = engine.stats().unwrap();
    assert_eq!(stats.active_records, 0);
    assert_eq!(stats.total_records, 1);

    let err = engine.delete_record(record.id).unwrap_err();
    assert!(matches!(err, EngineError::Repo(_)));
}

#[test]
fn registered_apps_need_submit_scope() {
    let engine = engine_with_apps(vec![
        manifest("reader", &["submit"]),
        manifest("assistant", &["prompt"]),
    ]);

    engine
        .submit_hinata(&HiNataRecord::new("reader", "allowed", ""))
        .unwrap();

    let err = ingest_error(
        engine
            .submit_hinata(&HiNataRecord::new("assistant", "denied", ""))
            .unwrap_err(),
    );
    assert!(matches!(
        err,
        IngestError::Unauthorized(AppRegistryError::ScopeDenied { .. })
    ));

    let err = ingest_error(
        engine
            .submit_hinata(&HiNataRecord::new("stranger", "unknown", ""))
            .unwrap_err(),
    );
    assert!(matches!(
        err,
        IngestError::Unauthorized(AppRegistryError::UnknownApp(_))
    ));
    assert_eq!(err.code(), "unauthorized");
}
