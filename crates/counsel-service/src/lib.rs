//! Model service: registry, engines and the serving loop.
//!
//! The supervisor reaches this crate in one of two ways. Production
//! deployments spawn the `counsel-serviced` binary and speak the line
//! protocol over its pipes. Embedded deployments construct a
//! [`ServiceHost`] directly and hand the supervisor an
//! [`InProcessTransport`], skipping process isolation.

pub mod device;
pub mod engine;
pub mod error;
pub mod host;
pub mod loader;
pub mod registry;
pub mod stdio;
pub mod transport;

pub use device::{DeviceProbe, FixedProbe, SystemProbe, plan_gpu_layers};
pub use engine::{HashEmbedder, InferenceEngine, OverlapScorer, TemplateGenerator};
pub use error::ServiceError;
pub use host::ServiceHost;
pub use loader::{DEFAULT_EMBEDDING_DIMENSIONS, DeterministicLoader, ModelLoader, ModelRole};
pub use registry::{ModelHandle, ModelLease, ModelRegistry, ModelState};
pub use transport::InProcessTransport;
