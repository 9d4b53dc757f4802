pub mod constants;

mod cache;
mod compose;
mod io;
mod packing;
mod progress;
mod render;
mod reverse;
mod types;

pub use cache::FormObjectCache;
pub use compose::{compose, reversed_path};
pub use io::{open_source, write_output, SourceDocument};
pub use packing::{plan_sheets, standard_sheet_height, PageGroup, SheetPlan};
pub use progress::{MemorySampler, NoopSink, ProgressSink, ProgressUpdate};
pub use render::scan_page_dimensions;
pub use reverse::reverse_document;
pub use types::*;
