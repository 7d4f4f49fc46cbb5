use counsel_protocol::{ConsultEventMsg, EventSink};
use parking_lot::Mutex;
use std::sync::Arc;

/// Event sink that records every emitted event for later assertions.
pub struct CollectingSink {
    events: Arc<Mutex<Vec<ConsultEventMsg>>>,
}

impl CollectingSink {
    /// Build a sink together with a handle to the recorded events.
    pub fn new() -> (Self, Arc<Mutex<Vec<ConsultEventMsg>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            events: Arc::clone(&events),
        };
        (sink, events)
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: ConsultEventMsg) {
        self.events.lock().push(event);
    }
}
