//! Document I/O for composition.
//!
//! Parsing and serialization are lopdf calls that chew CPU, so both run
//! on the blocking pool; only the byte transfer itself touches async fs.

use std::path::Path;

use lopdf::{Document, ObjectId};

use crate::types::{ComposeError, Result};

/// A parsed upload with its page list, the unit the pipeline works on.
/// Construction rejects empty documents, so downstream packing can rely
/// on at least one page existing.
pub struct SourceDocument {
    pub doc: Document,
    /// Page object ids in reading order; kept aligned with the document
    /// through the reversal pre-step.
    pub page_ids: Vec<ObjectId>,
}

impl SourceDocument {
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }
}

/// Read and parse a stored upload.
pub async fn open_source(path: impl AsRef<Path>) -> Result<SourceDocument> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    let doc = tokio::task::spawn_blocking(move || Document::load_mem(&bytes)).await??;
    source_from(doc)
}

pub(crate) fn source_from(doc: Document) -> Result<SourceDocument> {
    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    if page_ids.is_empty() {
        return Err(ComposeError::NoPages);
    }
    Ok(SourceDocument { doc, page_ids })
}

/// Serialize a document to `path` and hand it back, for callers that
/// keep working with it (the reversed intermediate is both persisted for
/// cleanup accounting and consumed in memory).
pub(crate) async fn persist(doc: Document, path: impl AsRef<Path>) -> Result<Document> {
    let (doc, bytes) = tokio::task::spawn_blocking(move || {
        let mut doc = doc;
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok::<_, ComposeError>((doc, buffer))
    })
    .await??;
    tokio::fs::write(path.as_ref(), bytes).await?;
    Ok(doc)
}

/// Write a finished output document.
pub async fn write_output(doc: Document, path: impl AsRef<Path>) -> Result<()> {
    persist(doc, path).await.map(drop)
}
