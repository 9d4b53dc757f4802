mod event;
mod fingerprint;
mod wire;

pub use event::{JobStage, PerfCounters, ProgressEvent};
pub use fingerprint::{Fingerprint, PageOrder, ParseOrderError};
pub use wire::{
    HealthResponse, LegacyRejection, ProcessResult, StatusResponse, SubmitResponse,
};
