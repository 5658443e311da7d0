//! Records log lines so tests can assert on what the tracker and watchdog reported.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{dispatcher, Dispatch, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// Level and rendered message of every event seen while the guard is held.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    /// Whether any event at `level` has a message containing `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

#[derive(Default)]
struct MessageOnly(String);

impl Visit for MessageOnly {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageOnly::default();
        event.record(&mut message);
        self.lines.lock().unwrap().push((*event.metadata().level(), message.0));
    }
}

/// Install a thread-local subscriber for the rest of the test.
///
/// Only tasks polled on the test thread are seen, so keep the default current-thread
/// `#[tokio::test]` runtime.
pub fn install_tracing_capture() -> (CapturedLogs, dispatcher::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(logs.clone());
    let guard = dispatcher::set_default(&Dispatch::new(subscriber));
    (logs, guard)
}
