// Candidate vetting: rate-limited dispatch, filter stages, detection store
pub mod dispatcher;
pub mod filters;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig, RateGate};
pub use filters::{FilterPipeline, PipelineConfig, PipelineOutcome, RejectReason};
pub use store::DetectionStore;
