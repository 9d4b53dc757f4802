mod client;
mod store;

pub use client::{ClientError, SheetClient, UploadRequest};
pub use store::{store_key, JobStore, MemoryJobStore, StoredJob, StoredStatus};
