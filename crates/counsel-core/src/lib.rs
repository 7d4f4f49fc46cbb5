//! Core supervision and consultation logic for Counsel.
//!
//! This crate owns the service client, the consultation pipeline, health
//! tracking, recovery automation, and startup sequencing used by the facade
//! and the CLI.

pub mod error;
pub mod events;
pub mod health;
pub mod orchestrator;
pub mod recovery;
pub mod service;
pub mod startup;
pub mod tuning;

pub use counsel_protocol::EventSink;
pub use error::CounselCoreError;
pub use events::{FanoutSink, LogEventSink};
pub use health::{HealthBoard, HealthRecord};
/// Consultation pipeline and its analysis helpers.
pub use orchestrator::{
    AnalysisOutcome, ConsultOrchestrator, RelevanceAnalyzer, build_prompt, filter_by_threshold,
};
pub use recovery::{RecoveryAutomation, RecoveryHandle};
/// Model service access and its degradation-aware call results.
pub use service::{ChildProcessTransport, Generation, ModelServiceClient, Outcome, fallback_answer};
pub use startup::{CounselSystem, SERVICE_BINARY, SERVICE_PROCESS, StartupCoordinator};
pub use tuning::{SharedTuning, Tuning};
