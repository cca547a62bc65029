//! Page tree traversal

use std::collections::HashSet;

use log::warn;

use super::PdfReader;
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Object, ObjectId};

/// Leaf pages of the document in reading order.
///
/// Nodes reached twice are skipped, so a cyclic `/Kids` graph ends the walk
/// instead of looping.
pub(crate) fn collect_pages(reader: &PdfReader) -> PDFResult<Vec<ObjectId>> {
    let catalog = reader.catalog()?;
    let Some(root) = catalog.get_reference("Pages") else {
        warn!("Catalog has no /Pages reference");
        return Ok(Vec::new());
    };

    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            warn!("Page tree visits {} twice", id);
            continue;
        }
        let node = reader.get_object(id)?;
        let Some(dict) = node.as_dict() else {
            warn!("Page tree node {} is a {}", id, node.type_name());
            continue;
        };

        match dict.get_array("Kids") {
            Some(kids) if !dict.has_type("Page") => {
                stack.extend(kids.iter().rev().filter_map(Object::as_reference));
            }
            _ => pages.push(id),
        }
    }
    Ok(pages)
}

/// Id of page `number`, counting from 1
pub(crate) fn page_id(reader: &PdfReader, number: usize) -> PDFResult<ObjectId> {
    let pages = collect_pages(reader)?;
    number
        .checked_sub(1)
        .and_then(|index| pages.get(index).copied())
        .ok_or_else(|| PDFError::invalid_state(format!("page {} of {}", number, pages.len())))
}

/// Decoded bytes of a page's `/Contents`, streams joined by newlines
pub(crate) fn page_content(reader: &PdfReader, number: usize) -> PDFResult<Vec<u8>> {
    let page = reader.get_object(page_id(reader, number)?)?;
    let dict = page.expect_dict()?;

    let parts = match dict.get("Contents") {
        Some(Object::Array(items)) => items.clone(),
        Some(contents) => vec![contents.clone()],
        None => Vec::new(),
    };

    let mut content = Vec::new();
    for part in parts {
        let resolved = reader.resolve(&part)?;
        match resolved.as_stream() {
            Some(stream) => {
                if !content.is_empty() {
                    content.push(b'\n');
                }
                content.extend_from_slice(&stream.decoded_content()?);
            }
            None if resolved.is_null() => {}
            None => warn!("Page {} content is a {}", number, resolved.type_name()),
        }
    }
    Ok(content)
}
