//! Two-pass document chunking.
//!
//! Splitting is character bounded: `semchunk-rs` recursively splits on the most semantically
//! meaningful separator available (blank lines, newlines, sentence punctuation, whitespace) until
//! every piece fits `chunk_size` characters. Pieces still over budget are re-split on word
//! boundaries. Then a sliding overlap of up to `overlap` characters is carried from the tail of
//! each chunk into the next, limited to the room the next chunk leaves under `chunk_size`.
//!
//! The engine runs the same splitter configuration twice:
//!
//! - [`probe_sizes`] counts splits per input document and stamps that count into a copy of its
//!   heading hierarchy, so consumers know how many chunks a section expands into;
//! - [`emit`] splits again and yields pieces with `chunk_id = "{input_id}-{i}"` (`i` from 1),
//!   attaching the probed hierarchy to every piece of that input.

use std::collections::HashMap;

use semchunk_rs::Chunker;

use super::types::ChunkingError;
use crate::document::{Document, HeadingHierarchy};

/// Default characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Default characters of overlap between adjacent chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 30;

/// Recursive character-bounded splitter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    /// Validate and build a splitter.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        })
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Effective overlap, always below the chunk size.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` with a fresh chunker instance.
    ///
    /// Returns an empty vector when the input text is all whitespace.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let chunker = Chunker::new(self.chunk_size, Box::new(char_len));
        let base_chunks: Vec<String> = chunker
            .chunk(text)
            .into_iter()
            .flat_map(|piece| enforce_budget(piece, self.chunk_size))
            .filter(|piece| !piece.trim().is_empty())
            .collect();
        apply_overlap(base_chunks, self.chunk_size, self.overlap)
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn char_len(segment: &str) -> usize {
    segment.chars().count()
}

/// Probe pass: heading hierarchies keyed by input chunk id, with `size` set to the split count.
///
/// Inputs without a heading hierarchy are not recorded.
pub fn probe_sizes(
    documents: &[Document],
    splitter: &TextSplitter,
) -> HashMap<String, HeadingHierarchy> {
    let mut sizes = HashMap::new();
    for document in documents {
        let Some(hierarchy) = document.metadata.heading_hierarchy.as_ref() else {
            continue;
        };
        let split_count = splitter.split(&document.page_content).len();
        let mut updated = hierarchy.clone();
        updated.size = Some(split_count);
        sizes.insert(document.metadata.chunk_id.clone(), updated);
    }
    sizes
}

/// Emission pass: lazily split each input and stamp lineage onto every piece.
pub fn emit(
    documents: Vec<Document>,
    sizes: HashMap<String, HeadingHierarchy>,
    splitter: TextSplitter,
) -> impl Iterator<Item = Document> {
    documents.into_iter().flat_map(move |document| {
        let parent_id = document.metadata.chunk_id.clone();
        let hierarchy = sizes.get(&parent_id).cloned();
        let pieces = splitter.split(&document.page_content);
        tracing::trace!(chunk_id = %parent_id, pieces = pieces.len(), "Split document");
        pieces
            .into_iter()
            .enumerate()
            .map(move |(idx, text)| {
                let mut metadata = document.metadata.clone();
                metadata.chunk_id = format!("{parent_id}-{}", idx + 1);
                if let Some(hierarchy) = hierarchy.as_ref() {
                    metadata.heading_hierarchy = Some(hierarchy.clone());
                }
                Document {
                    page_content: text,
                    metadata,
                }
            })
            .collect::<Vec<_>>()
    })
}

/// Run both passes over `documents`.
pub fn chunk_documents(
    documents: Vec<Document>,
    chunk_size: usize,
    overlap: usize,
) -> Result<impl Iterator<Item = Document>, ChunkingError> {
    let splitter = TextSplitter::new(chunk_size, overlap)?;
    let sizes = probe_sizes(&documents, &splitter);
    Ok(emit(documents, sizes, splitter))
}

/// Re-split a piece the chunker left over budget, packing whole words and cutting any single
/// word longer than `chunk_size` on character boundaries.
fn enforce_budget(piece: String, chunk_size: usize) -> Vec<String> {
    if char_len(&piece) <= chunk_size {
        return vec![piece];
    }

    let mut pieces = Vec::new();
    let mut open: Option<(WordSpan, WordSpan)> = None;
    for word in word_spans(&piece) {
        if word.char_end - word.char_start > chunk_size {
            if let Some((first, last)) = open.take() {
                pieces.push(piece[first.byte_start..last.byte_end].to_string());
            }
            pieces.extend(hard_split(&piece[word.byte_start..word.byte_end], chunk_size));
            continue;
        }
        open = match open {
            Some((first, _)) if word.char_end - first.char_start <= chunk_size => Some((first, word)),
            Some((first, last)) => {
                pieces.push(piece[first.byte_start..last.byte_end].to_string());
                Some((word, word))
            }
            None => Some((word, word)),
        };
    }
    if let Some((first, last)) = open {
        pieces.push(piece[first.byte_start..last.byte_end].to_string());
    }
    pieces
}

#[derive(Debug, Clone, Copy)]
struct WordSpan {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, usize)> = None;
    let mut char_count = 0;
    for (char_pos, (byte_pos, ch)) in text.char_indices().enumerate() {
        char_count = char_pos + 1;
        if ch.is_whitespace() {
            if let Some((byte_start, char_start)) = open.take() {
                spans.push(WordSpan {
                    byte_start,
                    byte_end: byte_pos,
                    char_start,
                    char_end: char_pos,
                });
            }
        } else if open.is_none() {
            open = Some((byte_pos, char_pos));
        }
    }
    if let Some((byte_start, char_start)) = open {
        spans.push(WordSpan {
            byte_start,
            byte_end: text.len(),
            char_start,
            char_end: char_count,
        });
    }
    spans
}

fn hard_split(word: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|part| part.iter().collect())
        .collect()
}

/// Prepend the tail of each previous chunk to the next chunk.
///
/// The tail is at most `overlap` characters and never more than the room `current` leaves under
/// `chunk_size`. The current chunk itself is never shortened.
fn apply_overlap(chunks: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunks.is_empty() || overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let chunk = match previous.as_deref() {
            Some(prev) => build_overlapped_chunk(prev, &current, overlap, chunk_size),
            None => current.clone(),
        };
        overlapped.push(chunk);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(previous: &str, current: &str, overlap: usize, chunk_size: usize) -> String {
    let needs_separator = !starts_with_whitespace(current);
    let room = chunk_size.saturating_sub(char_len(current) + usize::from(needs_separator));
    let tail = overlap_tail(previous, overlap.min(room));
    if tail.is_empty() {
        return current.to_string();
    }

    let mut combined = String::with_capacity(tail.len() + current.len() + 1);
    combined.push_str(tail);
    if needs_separator {
        combined.push(' ');
    }
    combined.push_str(current);
    combined
}

/// Last `limit` characters of `text`, starting on a word boundary.
fn overlap_tail(text: &str, limit: usize) -> &str {
    if limit == 0 {
        return "";
    }
    let text = text.trim_end();
    let tail = tail_chars(text, limit);
    let cut_mid_word = tail.len() < text.len()
        && !starts_with_whitespace(tail)
        && !ends_with_whitespace(&text[..text.len() - tail.len()]);
    if !cut_mid_word {
        return tail.trim_start();
    }
    match tail.find(char::is_whitespace) {
        Some(offset) => tail[offset..].trim_start(),
        None => "",
    }
}

fn tail_chars(text: &str, limit: usize) -> &str {
    let total = char_len(text);
    if total <= limit {
        return text;
    }
    let skip = total - limit;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len());
    &text[start..]
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars()
        .next()
        .map(|c| c.is_whitespace())
        .unwrap_or(false)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars()
        .next_back()
        .map(|c| c.is_whitespace())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMetadata, HeadingLevel};

    fn document(chunk_id: &str, text: &str, with_heading: bool) -> Document {
        Document {
            page_content: text.to_string(),
            metadata: DocumentMetadata {
                chunk_id: chunk_id.to_string(),
                source_path: "s3://docs/guide.md".into(),
                heading_hierarchy: with_heading.then(|| HeadingHierarchy {
                    levels: vec![HeadingLevel {
                        level: 1,
                        title: "Guide".into(),
                    }],
                    size: None,
                }),
                ..Default::default()
            },
        }
    }

    fn long_text(words: usize) -> String {
        (0..words)
            .map(|idx| format!("word{idx}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn split_respects_character_budget() {
        let splitter = TextSplitter::new(40, 0).expect("splitter");
        let text = long_text(60);
        let pieces = splitter.split(&text);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 40, "piece too long: {piece}");
        }
        let rejoined: Vec<String> = pieces
            .iter()
            .flat_map(|piece| piece.split_whitespace().map(str::to_string))
            .collect();
        let original: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn split_handles_blank_input() {
        let splitter = TextSplitter::default();
        assert!(splitter.split("   \n ").is_empty());
    }

    #[test]
    fn overlap_carries_tail_and_keeps_budget() {
        let chunks = vec!["alpha beta gamma".to_string(), "delta epsilon".to_string()];
        let overlapped = apply_overlap(chunks, 20, 5);
        assert_eq!(overlapped[0], "alpha beta gamma");
        assert_eq!(overlapped[1], "gamma delta epsilon");
        assert!(overlapped[1].chars().count() <= 20);
    }

    #[test]
    fn overlap_never_shortens_the_current_piece() {
        let chunks = vec!["aaaa bbbb".to_string(), "cccc dddd".to_string()];
        let overlapped = apply_overlap(chunks, 10, 4);
        assert_eq!(overlapped[1], "cccc dddd");

        let chunks = vec!["one two three".to_string(), "four".to_string()];
        let overlapped = apply_overlap(chunks, 12, 8);
        assert_eq!(overlapped[1], "three four");
    }

    #[test]
    fn overlap_tail_starts_on_a_word_boundary() {
        assert_eq!(overlap_tail("alpha beta gamma", 7), "gamma");
        assert_eq!(overlap_tail("alpha beta gamma", 6), "gamma");
        assert_eq!(overlap_tail("unbroken", 4), "");
        assert_eq!(overlap_tail("short ", 30), "short");
    }

    fn assert_every_word_survives(splitter: TextSplitter, text: &str) {
        let pieces = splitter.split(text);
        for piece in &pieces {
            assert!(
                piece.chars().count() <= splitter.chunk_size(),
                "piece too long: {piece}"
            );
        }
        let emitted: std::collections::HashSet<&str> = pieces
            .iter()
            .flat_map(|piece| piece.split_whitespace())
            .collect();
        for word in text.split_whitespace() {
            assert!(emitted.contains(word), "missing {word}");
        }
    }

    #[test]
    fn every_word_survives_with_overlap() {
        assert_every_word_survives(TextSplitter::new(40, 8).expect("splitter"), &long_text(60));
        assert_every_word_survives(TextSplitter::default(), &long_text(2000));
        let paragraphs = (0..40)
            .map(|idx| format!("Paragraph {idx} talks about {}", long_text(12)))
            .collect::<Vec<_>>()
            .join("\n\n");
        assert_every_word_survives(TextSplitter::new(64, 16).expect("splitter"), &paragraphs);
    }

    #[test]
    fn oversized_tokens_are_cut_to_the_budget() {
        let token = "x".repeat(100);
        let pieces = TextSplitter::new(40, 0).expect("splitter").split(&token);
        assert!(pieces.iter().all(|piece| piece.chars().count() <= 40));
        assert_eq!(pieces.concat(), token);

        let packed = enforce_budget(format!("ab cd {token} ef"), 40);
        assert_eq!(packed[0], "ab cd");
        assert_eq!(packed.last().map(String::as_str), Some("ef"));
        assert_eq!(packed[1..packed.len() - 1].concat(), token);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(
            TextSplitter::new(0, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        let splitter = TextSplitter::new(10, 50).expect("splitter");
        assert_eq!(splitter.overlap(), 9);
    }

    #[test]
    fn chunk_ids_are_suffixed_per_input() {
        let documents = vec![
            document("a", &long_text(40), false),
            document("b", "short text", false),
        ];
        let chunks: Vec<_> = chunk_documents(documents, 50, 0).expect("chunk").collect();
        let ids: Vec<_> = chunks
            .iter()
            .map(|chunk| chunk.metadata.chunk_id.as_str())
            .collect();
        let a_count = ids.iter().filter(|id| id.starts_with("a-")).count();
        assert!(a_count > 1);
        for (idx, id) in ids.iter().take(a_count).enumerate() {
            assert_eq!(*id, format!("a-{}", idx + 1));
        }
        assert_eq!(ids[a_count], "b-1");
        assert_eq!(ids.len(), a_count + 1);
    }

    #[test]
    fn chunking_is_deterministic() {
        let build = || vec![document("a", &long_text(80), true)];
        let first: Vec<_> = chunk_documents(build(), 64, 8).expect("chunk").collect();
        let second: Vec<_> = chunk_documents(build(), 64, 8).expect("chunk").collect();
        assert_eq!(first, second);
    }

    #[test]
    fn heading_size_matches_emitted_count() {
        let documents = vec![
            document("h", &long_text(50), true),
            document("plain", &long_text(50), false),
        ];
        let chunks: Vec<_> = chunk_documents(documents, 60, 10).expect("chunk").collect();
        let headed: Vec<_> = chunks
            .iter()
            .filter(|chunk| chunk.metadata.chunk_id.starts_with("h-"))
            .collect();
        assert!(headed.len() > 1);
        for chunk in &headed {
            let hierarchy = chunk.metadata.heading_hierarchy.as_ref().expect("hierarchy");
            assert_eq!(hierarchy.size, Some(headed.len()));
        }
        assert!(
            chunks
                .iter()
                .filter(|chunk| chunk.metadata.chunk_id.starts_with("plain-"))
                .all(|chunk| chunk.metadata.heading_hierarchy.is_none())
        );
    }

    #[test]
    fn probe_skips_documents_without_headings() {
        let splitter = TextSplitter::default();
        let sizes = probe_sizes(
            &[document("x", "text", false), document("y", "text", true)],
            &splitter,
        );
        assert!(!sizes.contains_key("x"));
        assert_eq!(sizes["y"].size, Some(1));
    }
}
