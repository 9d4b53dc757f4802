use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use sheet_protocol::PageOrder;

use crate::constants::MAX_SHEET_HEIGHT_PT;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
    #[error("No pages to compose")]
    NoPages,
    #[error(
        "Page {page} is {height_pt:.2}pt tall and cannot fit a {MAX_SHEET_HEIGHT_PT:.2}pt sheet"
    )]
    PageTooTall { page: usize, height_pt: f32 },
    #[error("Invalid request: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ComposeError>;

/// Everything the composition pipeline needs to turn one stored upload
/// into one output document.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    /// Staged upload on disk; deleted when composition ends either way.
    pub source_path: PathBuf,
    /// Rotation applied to every placed page, in degrees (0 disables).
    pub rotation_degrees: i32,
    /// Page consumption order; `Rev` inserts a reversed-copy pre-step.
    pub order: PageOrder,
    /// Where the finished document is written.
    pub output_path: PathBuf,
}

/// Summary of a finished composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOutcome {
    pub input_pages: usize,
    /// Number of sheets (= pages of the output document).
    pub output_pages: usize,
    pub elapsed: Duration,
}
