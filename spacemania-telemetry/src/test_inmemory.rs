use std::sync::Arc;
use tracing::{Instrument, info_span};
use crate::memory::{InMemoryTraceLayer, SharedTraceStorage};
use crate::{capture_subscriber, init_with_storage, installed_service};
use tracing_subscriber::layer::SubscriberExt;

#[tokio::test]
async fn stage_spans_are_stored_under_the_build_id() {
    let storage = Arc::new(SharedTraceStorage::new());
    let _default = tracing::subscriber::set_default(capture_subscriber(storage.clone()));

    async {
        async { tracing::info!("extracting") }.instrument(info_span!("build.extracting")).await;
        async { tracing::info!("chunking") }.instrument(info_span!("build.chunking")).await;
    }
    .instrument(info_span!("pipeline.build", build.id = "build-123", location = "faiss_index"))
    .await;

    let names = storage.span_names("build-123");
    assert_eq!(names, vec!["build.extracting", "build.chunking", "pipeline.build"]);

    let spans = storage.get_trace("build-123").unwrap();
    let root = spans.iter().find(|s| s.name == "pipeline.build").unwrap();
    assert_eq!(root.attribute_str("location"), Some("faiss_index"));
    assert!(root.parent_span_id.is_none());
    assert!(root.duration_nanos().is_some());

    let child = &spans[0];
    assert_eq!(child.attribute_str("build.id"), Some("build-123"));
    assert!(child.parent_span_id.is_some());
}

#[test]
fn spans_without_run_ids_are_ignored() {
    let storage = Arc::new(SharedTraceStorage::new());
    tracing::subscriber::with_default(capture_subscriber(storage.clone()), || {
        let _guard = info_span!("unrelated", user.id = "u1").entered();
    });
    assert!(storage.keys().is_empty());
}

#[test]
fn query_spans_carry_user_and_numeric_fields() {
    let storage = Arc::new(SharedTraceStorage::new());
    tracing::subscriber::with_default(capture_subscriber(storage.clone()), || {
        let span = info_span!("pipeline.ask", query.id = "q-1", user.id = "u-9", top_k = 4u64);
        let _outer = span.enter();
        let _inner = info_span!("ask.retrieving").entered();
    });

    let spans = storage.get_trace("q-1").unwrap();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].attribute_str("user.id"), Some("u-9"));
    assert_eq!(spans[1].attributes.get("top_k"), Some(&serde_json::json!(4)));
}

#[test]
fn custom_key_fields() {
    let storage = Arc::new(SharedTraceStorage::new());
    let subscriber = tracing_subscriber::registry()
        .with(InMemoryTraceLayer::new(storage.clone()).with_key_fields(&["user.id"]));
    tracing::subscriber::with_default(subscriber, || {
        let _guard = info_span!("anything", user.id = "u1").entered();
    });
    assert_eq!(storage.span_names("u1"), vec!["anything"]);
}

#[tokio::test]
async fn global_init_is_idempotent() {
    let storage = Arc::new(SharedTraceStorage::new());
    let first = init_with_storage("test-service", storage.clone());
    let second = crate::init_telemetry("other-service");
    // Another test binary may already own the global subscriber.
    if first.is_ok() {
        assert!(second.is_ok());
        assert_eq!(installed_service().as_deref(), Some("test-service"));
    }
}
