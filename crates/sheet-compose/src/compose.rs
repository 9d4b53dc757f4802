//! The composition pipeline.
//!
//! Order of operations for one job: optional reversed-copy pre-step,
//! dimension scan, packing plan, sheet-by-sheet rendering through the
//! form-object cache, compression, save. Progress flows out through the
//! caller's [`ProgressSink`]; terminal success/failure reporting is the
//! caller's responsibility. The staged upload and any reversed
//! intermediate are deleted whether the pipeline succeeds or fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use lopdf::{Dictionary, Document, Object, ObjectId};

use sheet_protocol::{JobStage, PageOrder, PerfCounters};

use crate::cache::FormObjectCache;
use crate::constants::{
    DIMENSION_REPORT_INTERVAL, FORM_CACHE_CAPACITY, HEIGHT_EPSILON, MAX_SHEET_HEIGHT_PT,
    MIN_PAGES_PER_SECOND, MIN_PROGRESS_PAGE_INTERVAL, PERCENT_DIMENSIONS_END,
    PERCENT_DIMENSIONS_START, PERCENT_OPTIMIZING, PERCENT_PAGES_END, PERCENT_PAGES_START,
    PROGRESS_REPORT_DIVISOR,
};
use crate::io::{open_source, persist, write_output, SourceDocument};
use crate::packing::plan_sheets;
use crate::progress::{MemorySampler, ProgressSink, ProgressUpdate};
use crate::render::{render_sheet, scan_page_dimensions, RotationMatrices};
use crate::reverse::reverse_document;
use crate::types::{ComposeOutcome, ComposeRequest, Result};

/// Location of the reversed intermediate for a staged upload.
pub fn reversed_path(source_path: &Path) -> PathBuf {
    let mut name = source_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".reversed.pdf");
    source_path.with_file_name(name)
}

/// Run the full composition pipeline for one request.
pub async fn compose(request: ComposeRequest, sink: Arc<dyn ProgressSink>) -> Result<ComposeOutcome> {
    let started = Instant::now();
    let outcome = run_pipeline(&request, Arc::clone(&sink), started).await;
    cleanup_intermediates(&request).await;
    outcome
}

async fn run_pipeline(
    request: &ComposeRequest,
    sink: Arc<dyn ProgressSink>,
    started: Instant,
) -> Result<ComposeOutcome> {
    sink.stage(JobStage::Initializing, "Opening source document");
    let mut source = open_source(&request.source_path).await?;

    if request.order == PageOrder::Rev {
        sink.stage(JobStage::Initializing, "Reversing page order");
        reverse_document(&mut source)?;
        let SourceDocument { doc, page_ids } = source;
        let doc = persist(doc, reversed_path(&request.source_path)).await?;
        source = SourceDocument { doc, page_ids };
    }

    let rotation_degrees = request.rotation_degrees;
    let sync_sink = Arc::clone(&sink);
    let (output, stats) =
        tokio::task::spawn_blocking(move || compose_sync(source, rotation_degrees, sync_sink, started))
            .await??;

    write_output(output, &request.output_path).await?;
    sink.stage(JobStage::Finalizing, "Output file written");

    Ok(ComposeOutcome {
        input_pages: stats.input_pages,
        output_pages: stats.sheets,
        elapsed: started.elapsed(),
    })
}

/// Cleanup failure must not mask the job's outcome; errors are logged
/// and swallowed.
async fn cleanup_intermediates(request: &ComposeRequest) {
    let paths = [
        request.source_path.clone(),
        reversed_path(&request.source_path),
    ];
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("removed intermediate {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove intermediate {}: {}", path.display(), e),
        }
    }
}

struct ComposeStats {
    input_pages: usize,
    sheets: usize,
}

fn compose_sync(
    source: SourceDocument,
    rotation_degrees: i32,
    sink: Arc<dyn ProgressSink>,
    started: Instant,
) -> Result<(Document, ComposeStats)> {
    let total = source.page_count();
    let mut sampler = MemorySampler::new();

    sink.stage(JobStage::PreparingDimensions, "Measuring page dimensions");
    let dims = measure_dimensions(&source, sink.as_ref(), &mut sampler, started)?;

    let plan = plan_sheets(&dims)?;

    sink.stage(JobStage::ProcessingPages, "Packing pages onto sheets");

    let mut output = Document::with_version("1.7");
    let pages_id = output.new_object_id();

    let mut form_cache = FormObjectCache::new(FORM_CACHE_CAPACITY);
    let mut matrices = RotationMatrices::new();
    let rotation = match rotation_degrees.rem_euclid(360) {
        0 => None,
        _ => Some(matrices.get(rotation_degrees)),
    };

    let report_interval = (total / PROGRESS_REPORT_DIVISOR).max(MIN_PROGRESS_PAGE_INTERVAL);
    let mut next_report = report_interval;

    let mut page_refs = Vec::with_capacity(plan.groups.len());
    for (sheet_index, group) in plan.groups.iter().enumerate() {
        let canvas_height = if group.stack_height_pt > plan.standard_height_pt + HEIGHT_EPSILON {
            // An anomalous stack taller than the chosen standard would push
            // its bottom pages below the canvas edge; render it full-height.
            log::warn!(
                "sheet {} stacks {:.2}pt above the {:.2}pt standard, using maximum height",
                sheet_index + 1,
                group.stack_height_pt,
                plan.standard_height_pt
            );
            MAX_SHEET_HEIGHT_PT
        } else {
            plan.standard_height_pt
        };

        let page_ref = render_sheet(
            &mut output,
            &source.doc,
            &source.page_ids,
            &dims,
            group,
            canvas_height,
            rotation,
            pages_id,
            &mut form_cache,
        )?;
        page_refs.push(Object::Reference(page_ref));

        let pages_done = group.start + group.len;
        if pages_done >= next_report || pages_done == total {
            next_report = pages_done + report_interval;
            let elapsed = started.elapsed().as_secs_f32();
            let pages_per_second = pages_done as f32 / elapsed.max(f32::EPSILON);
            sink.progress(ProgressUpdate {
                stage: JobStage::ProcessingPages,
                current_page: pages_done,
                total_pages: total,
                percent_complete: PERCENT_PAGES_START
                    + (PERCENT_PAGES_END - PERCENT_PAGES_START) * pages_done as f32 / total as f32,
                pages_per_second,
                eta_seconds: (total - pages_done) as f32
                    / pages_per_second.max(MIN_PAGES_PER_SECOND),
                elapsed_seconds: elapsed,
                operation: format!(
                    "Composed sheet {} ({}/{} pages)",
                    sheet_index + 1,
                    pages_done,
                    total
                ),
                perf: perf_counters(&form_cache, &mut sampler, sheet_index + 1),
            });
        }
    }

    let sheets = page_refs.len();
    attach_page_tree(&mut output, pages_id, page_refs);

    sink.progress(ProgressUpdate {
        stage: JobStage::OptimizingOutput,
        current_page: total,
        total_pages: total,
        percent_complete: PERCENT_OPTIMIZING,
        pages_per_second: 0.0,
        eta_seconds: 0.0,
        elapsed_seconds: started.elapsed().as_secs_f32(),
        operation: "Compressing output document".to_string(),
        perf: perf_counters(&form_cache, &mut sampler, sheets),
    });
    output.compress();

    Ok((
        output,
        ComposeStats {
            input_pages: total,
            sheets,
        },
    ))
}

/// Dimension scan with an event every `DIMENSION_REPORT_INTERVAL` pages.
fn measure_dimensions(
    source: &SourceDocument,
    sink: &dyn ProgressSink,
    sampler: &mut MemorySampler,
    started: Instant,
) -> Result<Vec<(f32, f32)>> {
    let total = source.page_count();
    let mut dims = Vec::with_capacity(total);

    for chunk in source.page_ids.chunks(DIMENSION_REPORT_INTERVAL) {
        dims.extend(scan_page_dimensions(&source.doc, chunk)?);
        let done = dims.len();
        sink.progress(ProgressUpdate {
            stage: JobStage::PreparingDimensions,
            current_page: done,
            total_pages: total,
            percent_complete: PERCENT_DIMENSIONS_START
                + (PERCENT_DIMENSIONS_END - PERCENT_DIMENSIONS_START) * done as f32 / total as f32,
            pages_per_second: 0.0,
            eta_seconds: 0.0,
            elapsed_seconds: started.elapsed().as_secs_f32(),
            operation: format!("Measured {}/{} pages", done, total),
            perf: PerfCounters {
                memory_mb: sampler.sample_mb(),
                ..Default::default()
            },
        });
    }

    Ok(dims)
}

fn perf_counters(
    cache: &FormObjectCache,
    sampler: &mut MemorySampler,
    sheets_generated: usize,
) -> PerfCounters {
    PerfCounters {
        memory_mb: sampler.sample_mb(),
        cache_hits: cache.hits(),
        cache_misses: cache.misses(),
        cache_hit_ratio: 0.0,
        cached_objects: cache.len(),
        sheets_generated,
    }
    .with_ratio()
}

fn attach_page_tree(output: &mut Document, pages_id: ObjectId, page_refs: Vec<Object>) {
    let count = page_refs.len() as i64;
    let pages_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(page_refs)),
        ("Count", Object::Integer(count)),
    ]);
    output
        .objects
        .insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = output.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    output.trailer.set("Root", catalog_id);
}
