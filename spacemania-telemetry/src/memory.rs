use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{Id, Subscriber};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// Span fields that identify a pipeline run. Closed spans are stored under
/// the value of each one present.
pub const DEFAULT_KEY_FIELDS: &[&str] = &["build.id", "query.id"];

/// Span fields copied from a parent span to its children, so stage spans can
/// be found under the id of the run that opened them.
const PROPAGATED_FIELDS: &[&str] = &["build.id", "query.id", "user.id"];

/// Data for a captured span
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    pub span_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    // Nanoseconds since the Unix epoch
    pub start_time: u128,
    pub end_time: Option<u128>,

    pub attributes: HashMap<String, serde_json::Value>,
}

impl SpanData {
    /// Elapsed time between open and close, in nanoseconds.
    pub fn duration_nanos(&self) -> Option<u128> {
        self.end_time.map(|end| end.saturating_sub(self.start_time))
    }

    /// A string attribute, if present.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Shared storage for traces
#[derive(Debug, Clone, Default)]
pub struct SharedTraceStorage {
    /// Map of run id (`build.id` / `query.id` value) -> closed spans, in close order
    traces: Arc<RwLock<HashMap<String, Vec<SpanData>>>>,
}

impl SharedTraceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_trace(&self, key: &str) -> Option<Vec<SpanData>> {
        self.traces.read().ok()?.get(key).cloned()
    }

    /// Names of the spans stored under `key`, in close order.
    pub fn span_names(&self, key: &str) -> Vec<String> {
        self.get_trace(key).unwrap_or_default().into_iter().map(|s| s.name).collect()
    }

    pub fn add_span(&self, key: String, span: SpanData) {
        if let Ok(mut traces) = self.traces.write() {
            traces.entry(key).or_default().push(span);
        }
    }

    /// All keys with at least one stored span.
    pub fn keys(&self) -> Vec<String> {
        self.traces.read().map(|t| t.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut traces) = self.traces.write() {
            traces.clear();
        }
    }
}

/// A tracing layer that captures closed spans in memory
pub struct InMemoryTraceLayer {
    storage: Arc<SharedTraceStorage>,
    key_fields: Vec<&'static str>,
}

impl InMemoryTraceLayer {
    pub fn new(storage: Arc<SharedTraceStorage>) -> Self {
        Self { storage, key_fields: DEFAULT_KEY_FIELDS.to_vec() }
    }

    /// Store spans under the values of `fields` instead of the defaults.
    pub fn with_key_fields(mut self, fields: &[&'static str]) -> Self {
        self.key_fields = fields.to_vec();
        self
    }
}

#[derive(Clone)]
struct SpanFields(HashMap<String, serde_json::Value>);

struct StartTime(u128);

fn now_nanos() -> u128 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos()
}

impl<S> Layer<S> for InMemoryTraceLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };

        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        let mut fields = visitor.0;

        if let Some(parent) = span.parent() {
            if let Some(parent_fields) = parent.extensions().get::<SpanFields>() {
                for key in PROPAGATED_FIELDS {
                    if !fields.contains_key(*key) {
                        if let Some(value) = parent_fields.0.get(*key) {
                            fields.insert(key.to_string(), value.clone());
                        }
                    }
                }
            }
        }

        let mut extensions = span.extensions_mut();
        extensions.insert(StartTime(now_nanos()));
        extensions.insert(SpanFields(fields));
    }

    fn on_record(&self, id: &Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor::default();
            values.record(&mut visitor);
            fields.0.extend(visitor.0);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let extensions = span.extensions();
        let fields = extensions.get::<SpanFields>().map(|f| f.0.clone()).unwrap_or_default();

        let keys: Vec<String> = self
            .key_fields
            .iter()
            .filter_map(|field| fields.get(*field).and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        if keys.is_empty() {
            return;
        }

        let span_data = SpanData {
            span_id: format!("{:016x}", id.into_u64()),
            name: span.metadata().name().to_string(),
            parent_span_id: span.parent().map(|p| format!("{:016x}", p.id().into_u64())),
            start_time: extensions.get::<StartTime>().map(|s| s.0).unwrap_or(0),
            end_time: Some(now_nanos()),
            attributes: fields,
        };

        for key in keys {
            self.storage.add_span(key, span_data.clone());
        }
    }
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}
