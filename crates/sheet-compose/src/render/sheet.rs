//! Sheet canvas assembly.
//!
//! A sheet is one output page of fixed width whose packed source pages
//! stack top-to-bottom, each centered horizontally. Placement happens in
//! the content stream via `cm` transforms referencing cached form objects.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::cache::FormObjectCache;
use crate::constants::SHEET_WIDTH_PT;
use crate::packing::PageGroup;
use crate::types::Result;

use super::xobject::copy_page_as_form;

/// Per-angle `(cos, sin)` cache so repeated sheets skip the trig calls.
pub(crate) struct RotationMatrices {
    cache: HashMap<i32, (f32, f32)>,
}

impl RotationMatrices {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, degrees: i32) -> (f32, f32) {
        let normalized = degrees.rem_euclid(360);
        *self.cache.entry(normalized).or_insert_with(|| {
            let radians = (normalized as f32).to_radians();
            (radians.cos(), radians.sin())
        })
    }
}

/// Render one packed group onto a fresh `(SHEET_WIDTH_PT, canvas_height_pt)`
/// output page and return its object id.
#[allow(clippy::too_many_arguments)]
pub(crate) fn render_sheet(
    output: &mut Document,
    source: &Document,
    page_ids: &[ObjectId],
    dims: &[(f32, f32)],
    group: &PageGroup,
    canvas_height_pt: f32,
    rotation: Option<(f32, f32)>,
    parent_pages_id: ObjectId,
    form_cache: &mut FormObjectCache,
) -> Result<ObjectId> {
    let mut page_dict = Dictionary::new();
    page_dict.set("Type", Object::Name(b"Page".to_vec()));
    page_dict.set("Parent", Object::Reference(parent_pages_id));
    page_dict.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(SHEET_WIDTH_PT),
            Object::Real(canvas_height_pt),
        ]),
    );

    let mut content_ops = Vec::with_capacity(group.len);
    let mut xobjects = Dictionary::new();
    let mut current_y = canvas_height_pt;

    for (slot, page_index) in group.pages().enumerate() {
        let (width, height) = dims[page_index];
        current_y = (current_y - height).max(0.0);
        let x_offset = (SHEET_WIDTH_PT - width) / 2.0;

        let form_id = match form_cache.get(page_index) {
            Some(id) => id,
            None => {
                let id = copy_page_as_form(output, source, page_ids[page_index], form_cache)?;
                form_cache.insert(page_index, id);
                id
            }
        };

        let name = format!("P{}", slot);
        xobjects.set(name.as_bytes(), Object::Reference(form_id));
        content_ops.push(placement_ops(
            &name, x_offset, current_y, width, height, rotation,
        ));
    }

    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));

    let content = content_ops.join("");
    let content_id = output.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    page_dict.set("Contents", Object::Reference(content_id));
    page_dict.set("Resources", Object::Dictionary(resources));

    Ok(output.add_object(page_dict))
}

/// Content-stream command placing one form object.
///
/// Without rotation the form lands at `(x, y)` directly. With rotation the
/// transform chain translates to the placed page's center, rotates, then
/// shifts the form so its own center sits at the origin, which spins the
/// page about its midpoint.
fn placement_ops(
    name: &str,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    rotation: Option<(f32, f32)>,
) -> String {
    match rotation {
        None => format!("q 1 0 0 1 {:.4} {:.4} cm /{} Do Q\n", x, y, name),
        Some((cos, sin)) => {
            let center_x = x + width / 2.0;
            let center_y = y + height / 2.0;
            format!(
                "q 1 0 0 1 {:.4} {:.4} cm {:.6} {:.6} {:.6} {:.6} 0 0 cm 1 0 0 1 {:.4} {:.4} cm /{} Do Q\n",
                center_x,
                center_y,
                cos,
                sin,
                -sin,
                cos,
                -width / 2.0,
                -height / 2.0,
                name
            )
        }
    }
}
