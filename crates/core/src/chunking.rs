use crate::error::ChunkingError;
use crate::models::{Chunk, Segment};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

/// Split points tried in order, from paragraph breaks down to single characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ChunkingError> {
        if max_chars == 0 {
            return Err(ChunkingError::ZeroMaxLength);
        }
        if overlap_chars == 0 {
            return Err(ChunkingError::ZeroOverlap);
        }
        if overlap_chars >= max_chars {
            return Err(ChunkingError::OverlapTooLarge {
                overlap: overlap_chars,
                max: max_chars,
            });
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }
}

/// Splits every segment and tags the pieces with their document.
///
/// Output keeps segment order, and text order within a segment. Chunk
/// indices count per document, so a document loaded as several segments
/// (pdf pages, csv rows) gets one contiguous run of indices.
pub fn split_segments(segments: &[Segment], config: ChunkingConfig) -> Vec<Chunk> {
    let mut next_index = HashMap::<&str, u64>::new();
    let mut chunks = Vec::new();

    for segment in segments {
        for text in split_text(&segment.text, config) {
            let cursor = next_index.entry(segment.document_id.as_str()).or_insert(0);
            chunks.push(Chunk {
                chunk_id: make_chunk_id(&segment.document_id, *cursor, &text),
                document_id: segment.document_id.clone(),
                chunk_index: *cursor,
                text,
            });
            *cursor = cursor.saturating_add(1);
        }
    }

    chunks
}

/// Recursive character splitting of a single text.
///
/// Separators stay attached to the start of the piece that follows them and
/// whitespace is preserved, so concatenating the chunks minus their overlaps
/// reproduces the input.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let (position, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, separator)| separator.is_empty() || text.contains(**separator))
        .map(|(position, separator)| (position, *separator))
        .unwrap_or((separators.len(), ""));
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.max_chars {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, config));
            pending.clear();
        }

        if finer.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, finer, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, config));
    }

    chunks
}

fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn merge_pieces(pieces: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut merged = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let length = char_len(piece);

        if total + length > config.max_chars && !window.is_empty() {
            push_joined(&mut merged, &window);
            while total > config.overlap_chars
                || (total + length > config.max_chars && total > 0)
            {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }

        window.push_back((piece, length));
        total += length;
    }

    push_joined(&mut merged, &window);
    merged
}

fn push_joined(target: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let text: String = window.iter().map(|(piece, _)| *piece).collect();
    if !text.is_empty() {
        target.push(text);
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
