//! Whole-document page reversal, the pre-step for `order = Rev`.

use lopdf::Object;

use crate::io::SourceDocument;
use crate::types::Result;

/// Invert the page order of `source` in place: page N..1 becomes 1..N.
///
/// The page tree is flattened while rebuilding, so nested `Pages` nodes
/// collapse into a single Kids array under the root, and the source's
/// cached page list is reversed in step with the tree. Only the tree
/// wiring changes; page objects and their content are untouched.
pub fn reverse_document(source: &mut SourceDocument) -> Result<()> {
    let catalog_id = source.doc.trailer.get(b"Root")?.as_reference()?;
    let pages_id = source
        .doc
        .get_dictionary(catalog_id)?
        .get(b"Pages")?
        .as_reference()?;

    source.page_ids.reverse();
    for id in &source.page_ids {
        if let Ok(Object::Dictionary(page_dict)) = source.doc.get_object_mut(*id) {
            page_dict.set("Parent", Object::Reference(pages_id));
        }
    }

    let kids: Vec<Object> = source
        .page_ids
        .iter()
        .map(|id| Object::Reference(*id))
        .collect();
    let mut pages_dict = source.doc.get_dictionary(pages_id)?.clone();
    pages_dict.set("Count", Object::Integer(kids.len() as i64));
    pages_dict.set("Kids", Object::Array(kids));
    source
        .doc
        .objects
        .insert(pages_id, Object::Dictionary(pages_dict));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::source_from;
    use lopdf::{Dictionary, Document, Stream};

    fn test_source(heights: &[i64]) -> SourceDocument {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for &height in heights {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), b"q Q".to_vec()));
            let page_id = doc.add_object(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(612),
                        Object::Integer(height),
                    ]),
                ),
                ("Resources", Object::Dictionary(Dictionary::new())),
                ("Contents", Object::Reference(content_id)),
            ]));
            kids.push(Object::Reference(page_id));
        }

        let pages_dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(heights.len() as i64)),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", catalog_id);
        source_from(doc).unwrap()
    }

    fn page_heights(doc: &Document) -> Vec<i64> {
        doc.get_pages()
            .values()
            .map(|&id| {
                let media_box = doc
                    .get_dictionary(id)
                    .unwrap()
                    .get(b"MediaBox")
                    .unwrap()
                    .as_array()
                    .unwrap()
                    .clone();
                media_box[3].as_i64().unwrap()
            })
            .collect()
    }

    #[test]
    fn reversal_inverts_page_order() {
        let mut source = test_source(&[100, 200, 300]);
        reverse_document(&mut source).unwrap();
        assert_eq!(page_heights(&source.doc), vec![300, 200, 100]);
    }

    #[test]
    fn cached_page_ids_stay_aligned_with_the_tree() {
        let mut source = test_source(&[100, 200, 300, 400]);
        reverse_document(&mut source).unwrap();

        let tree_order: Vec<_> = source.doc.get_pages().values().copied().collect();
        assert_eq!(source.page_ids, tree_order);
    }

    #[test]
    fn double_reversal_restores_order() {
        let mut source = test_source(&[100, 200, 300, 400]);
        reverse_document(&mut source).unwrap();
        reverse_document(&mut source).unwrap();
        assert_eq!(page_heights(&source.doc), vec![100, 200, 300, 400]);
    }

    #[test]
    fn page_count_is_preserved() {
        let mut source = test_source(&[50, 60, 70, 80, 90]);
        reverse_document(&mut source).unwrap();
        assert_eq!(source.page_count(), 5);
        assert_eq!(source.doc.get_pages().len(), 5);
    }
}
