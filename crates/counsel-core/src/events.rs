//! Event sinks for consultation observability.

use counsel_protocol::{ConsultEventMsg, EventSink};
use log::debug;
use std::sync::Arc;

/// Sink that writes each event to the log at debug level.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: ConsultEventMsg) {
        debug!(
            "consult event (consultation={}, payload={:?})",
            event.consultation_id, event.payload
        );
    }
}

/// Sink that forwards every event to multiple downstream sinks.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: ConsultEventMsg) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_protocol::{ConsultEventPayload, PipelineStage};
    use counsel_test_utils::CollectingSink;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn fanout_delivers_to_every_sink() {
        let (first, first_events) = CollectingSink::new();
        let (second, second_events) = CollectingSink::new();
        let fanout = FanoutSink::new(vec![Arc::new(first), Arc::new(second)]);

        fanout.emit(ConsultEventMsg::new(
            Uuid::new_v4(),
            ConsultEventPayload::StageStarted {
                stage: PipelineStage::Searching,
            },
        ));

        assert_eq!(first_events.lock().len(), 1);
        assert_eq!(second_events.lock().len(), 1);
    }
}
