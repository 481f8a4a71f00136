//! Log capture for unit tests.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Records level and message of every event while installed.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    /// Install as the thread's default subscriber until the guard drops.
    pub(crate) fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub(crate) fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, message: &str) -> usize {
        self.events().iter().filter(|(_, m)| m == message).count()
    }

    pub(crate) fn level_of(&self, message: &str) -> Option<Level> {
        self.events().into_iter().find(|(_, m)| m == message).map(|(level, _)| level)
    }
}

struct Message(String);

impl Visit for Message {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = Message(String::new());
        event.record(&mut message);
        self.events.lock().unwrap().push((*event.metadata().level(), message.0));
    }
}
