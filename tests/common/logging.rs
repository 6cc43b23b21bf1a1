//! Capturing error records emitted by the filter

use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// One `error!` record and the fields the filter attaches to it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorRecord {
    pub kind: Option<String>,
    pub action: Option<String>,
    pub message: String,
}

impl Visit for ErrorRecord {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "kind" => self.kind = Some(value.to_string()),
            "action" => self.action = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

struct ErrorCollector {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl<S: Subscriber> Layer<S> for ErrorCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            let mut record = ErrorRecord::default();
            event.record(&mut record);
            self.records.lock().push(record);
        }
    }
}

/// Run `f` with a subscriber on the current thread that collects every
/// error record
pub fn capture_errors<R>(f: impl FnOnce() -> R) -> (R, Vec<ErrorRecord>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(ErrorCollector {
        records: records.clone(),
    });
    let result = tracing::subscriber::with_default(subscriber, f);
    let records = records.lock().clone();
    (result, records)
}
