use crate::memory::SpanData;
use std::collections::HashMap;

#[test]
fn span_data_serialization() {
    let span = SpanData {
        span_id: "0000000000000001".to_string(),
        name: "pipeline.build".to_string(),
        parent_span_id: None,
        start_time: 1234567890000000000,
        end_time: Some(1234567890000001000),
        attributes: HashMap::from([("build.id".to_string(), serde_json::json!("b-1"))]),
    };

    let json = serde_json::to_string(&span).unwrap();
    assert!(json.contains("\"span_id\""));
    assert!(json.contains("\"start_time\""));
    assert!(json.contains("\"build.id\":\"b-1\""));
    assert!(!json.contains("parent_span_id"));
    assert_eq!(span.duration_nanos(), Some(1000));
}
