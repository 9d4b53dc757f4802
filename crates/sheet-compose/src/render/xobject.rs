//! Form XObject copying.
//!
//! Each source page is copied into the output document exactly once as a
//! Form XObject and placed by reference, possibly several times and under
//! different transforms. Importing works as a worklist over the
//! reference graph: rewriting an object's direct structure reserves an
//! output id for every reference it meets, and the loop drains those
//! reservations until the reachable set is copied. Reservations live in
//! the job's [`FormObjectCache`], so fonts and images shared between
//! pages are imported a single time.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::cache::FormObjectCache;
use crate::constants::DEFAULT_PAGE_DIMENSIONS;
use crate::types::Result;

/// Copy one source page into `output` as a reusable Form XObject and
/// return the new object's id.
pub(crate) fn copy_page_as_form(
    output: &mut Document,
    source: &Document,
    page_id: ObjectId,
    cache: &mut FormObjectCache,
) -> Result<ObjectId> {
    let page_dict = source.get_dictionary(page_id)?;

    let media_box = page_dict
        .get(b"MediaBox")
        .and_then(|obj| obj.as_array())
        .ok()
        .cloned()
        .unwrap_or_else(|| {
            vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(DEFAULT_PAGE_DIMENSIONS.0),
                Object::Real(DEFAULT_PAGE_DIMENSIONS.1),
            ]
        });

    let mut form_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Form".to_vec())),
        ("BBox", Object::Array(media_box)),
        ("FormType", Object::Integer(1)),
    ]);
    if let Ok(resources) = page_dict.get(b"Resources") {
        form_dict.set("Resources", import_value(output, source, resources, cache)?);
    }

    let content = page_content(source, page_dict)?;
    Ok(output.add_object(Stream::new(form_dict, content)))
}

/// Import the subgraph reachable from `value` into the output document
/// and return the rewritten value.
///
/// Reference cycles terminate because an id is reserved before its
/// object is visited; an already-reserved reference rewrites without
/// being queued again.
fn import_value(
    output: &mut Document,
    source: &Document,
    value: &Object,
    cache: &mut FormObjectCache,
) -> Result<Object> {
    let mut queue: Vec<(ObjectId, ObjectId)> = Vec::new();
    let rewritten = rewrite(value, output, cache, &mut queue);

    while let Some((source_id, target_id)) = queue.pop() {
        let object = source.get_object(source_id)?;
        let copied = rewrite(object, output, cache, &mut queue);
        output.objects.insert(target_id, copied);
    }

    Ok(rewritten)
}

/// Rewrite one object's direct structure for the output document. Every
/// reference is remapped through the cache, reserving a fresh output id
/// (and queueing the referent for copying) on first sight.
fn rewrite(
    value: &Object,
    output: &mut Document,
    cache: &mut FormObjectCache,
    queue: &mut Vec<(ObjectId, ObjectId)>,
) -> Object {
    match value {
        Object::Reference(id) => {
            let mapped = match cache.resource_mapping(*id) {
                Some(target) => target,
                None => {
                    let target = output.new_object_id();
                    cache.record_resource(*id, target);
                    queue.push((*id, target));
                    target
                }
            };
            Object::Reference(mapped)
        }
        Object::Dictionary(dict) => {
            let mut copied = Dictionary::new();
            for (key, nested) in dict.iter() {
                copied.set(key.clone(), rewrite(nested, output, cache, queue));
            }
            Object::Dictionary(copied)
        }
        Object::Array(items) => Object::Array(
            items
                .iter()
                .map(|item| rewrite(item, output, cache, queue))
                .collect(),
        ),
        Object::Stream(stream) => {
            let mut dict = Dictionary::new();
            for (key, nested) in stream.dict.iter() {
                dict.set(key.clone(), rewrite(nested, output, cache, queue));
            }
            let mut copied = Stream::new(dict, stream.content.clone());
            copied.allows_compression = stream.allows_compression;
            Object::Stream(copied)
        }
        other => other.clone(),
    }
}

/// Concatenated, decompressed content of a page. The Contents entry is
/// first normalized to a list of stream ids (single reference, array of
/// references, or nothing for a blank page), then folded into one
/// buffer.
fn page_content(source: &Document, page_dict: &Dictionary) -> Result<Vec<u8>> {
    let stream_ids: Vec<ObjectId> = match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => vec![*id],
        Ok(Object::Array(refs)) => refs
            .iter()
            .filter_map(|obj| obj.as_reference().ok())
            .collect(),
        _ => Vec::new(),
    };

    let mut combined = Vec::new();
    for id in stream_ids {
        let Ok(stream) = source.get_object(id)?.as_stream() else {
            continue;
        };
        match stream.decompressed_content() {
            Ok(data) => combined.extend_from_slice(&data),
            Err(_) => combined.extend_from_slice(&stream.content),
        }
        combined.push(b'\n');
    }
    Ok(combined)
}

// =============================================================================
// Page Dimensions
// =============================================================================

/// Declared `(width, height)` of every page in points, in page order,
/// falling back to US Letter for pages without a usable MediaBox.
pub fn scan_page_dimensions(doc: &Document, page_ids: &[ObjectId]) -> Result<Vec<(f32, f32)>> {
    page_ids
        .iter()
        .map(|&id| page_dimensions(doc, id))
        .collect()
}

fn page_dimensions(doc: &Document, page_id: ObjectId) -> Result<(f32, f32)> {
    let page_dict = doc.get_dictionary(page_id)?;
    match page_dict.get(b"MediaBox").and_then(|obj| obj.as_array()) {
        Ok(mb) => Ok((
            dimension(mb, 2, DEFAULT_PAGE_DIMENSIONS.0),
            dimension(mb, 3, DEFAULT_PAGE_DIMENSIONS.1),
        )),
        Err(_) => Ok(DEFAULT_PAGE_DIMENSIONS),
    }
}

/// Numeric MediaBox component with bounds checking folded in.
fn dimension(media_box: &[Object], index: usize, fallback: f32) -> f32 {
    match media_box.get(index) {
        Some(Object::Integer(v)) => *v as f32,
        Some(Object::Real(v)) => *v,
        _ => fallback,
    }
}
