use std::sync::Arc;

use async_trait::async_trait;

use super::{ExtractionError, Extractor, chunk_id_stem, read_source};
use crate::document::{Document, HeadingHierarchy, HeadingLevel, ProcessingParameters};
use crate::storage::ObjectStore;

/// Splits text on ATX headings (`#` .. `######`), one document per section.
///
/// Each section carries its heading path as `heading_hierarchy` and as a rendered
/// `complete_heading`; neighbouring section ids are listed in `extend_chunks`. Text without
/// headings becomes a single document.
pub struct MarkdownExtractor {
    store: Option<Arc<dyn ObjectStore>>,
}

impl MarkdownExtractor {
    /// Read sources through `store`.
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Extractor for MarkdownExtractor {
    async fn extract(&self, params: &ProcessingParameters) -> Result<Vec<Document>, ExtractionError> {
        let text = read_source(self.store.as_ref(), params).await?;
        Ok(split_sections(&text, params))
    }
}

struct Section {
    headings: Vec<HeadingLevel>,
    body: String,
}

pub(crate) fn split_sections(text: &str, params: &ProcessingParameters) -> Vec<Document> {
    let mut sections = Vec::new();
    let mut stack: Vec<HeadingLevel> = Vec::new();
    let mut body = String::new();

    for line in text.lines() {
        if let Some(heading) = parse_heading(line) {
            flush(&mut sections, &stack, &mut body);
            while stack.last().is_some_and(|last| last.level >= heading.level) {
                stack.pop();
            }
            stack.push(heading);
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    flush(&mut sections, &stack, &mut body);

    let stem = chunk_id_stem(params);
    let ids: Vec<String> = (0..sections.len())
        .map(|idx| format!("{stem}-{idx}"))
        .collect();

    sections
        .into_iter()
        .enumerate()
        .map(|(idx, section)| {
            let mut document = Document::new(section.body, ids[idx].clone(), params);
            if !section.headings.is_empty() {
                document.metadata.complete_heading = Some(
                    section
                        .headings
                        .iter()
                        .map(|heading| heading.title.as_str())
                        .collect::<Vec<_>>()
                        .join(" > "),
                );
                document.metadata.heading_hierarchy = Some(HeadingHierarchy {
                    levels: section.headings,
                    size: None,
                });
            }
            if idx > 0 {
                document.metadata.extend_chunks.push(ids[idx - 1].clone());
            }
            if let Some(next) = ids.get(idx + 1) {
                document.metadata.extend_chunks.push(next.clone());
            }
            document
        })
        .collect()
}

fn flush(sections: &mut Vec<Section>, stack: &[HeadingLevel], body: &mut String) {
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        sections.push(Section {
            headings: stack.to_vec(),
            body: trimmed.to_string(),
        });
    }
    body.clear();
}

fn parse_heading(line: &str) -> Option<HeadingLevel> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some(HeadingLevel {
        level: hashes as u8,
        title: title.to_string(),
    })
}
