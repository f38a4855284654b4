//! Line-oriented fragmenting of documents into embeddable pieces.
//!
//! Configuration files are split on line boundaries so a fragment never cuts
//! a key or a resource header in half. A document that fits within
//! `max_chars` becomes exactly one fragment holding its full text.

use crate::config::ChunkingConfig;
use crate::memory::models::{Document, Fragment};

pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_chars: config.max_chars.max(1),
            overlap_chars: config.overlap_chars.min(config.max_chars.saturating_sub(1)),
        }
    }

    /// Split a document into fragments. Blank documents produce none.
    pub fn split(&self, document: &Document) -> Vec<Fragment> {
        self.split_text(&document.text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Fragment {
                id: Fragment::record_id(&document.id, index),
                document_id: document.id.clone(),
                path: document.relative_path.clone(),
                extension: document.extension.clone(),
                index,
                text,
            })
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if text.chars().count() <= self.max_chars {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for line in lines_with_endings(text) {
            let line_len = line.chars().count();

            if line_len > self.max_chars {
                flush(&mut pieces, &mut current, &mut current_len);
                pieces.extend(hard_split(line, self.max_chars, self.overlap_chars));
                continue;
            }

            if current_len + line_len > self.max_chars && !current.is_empty() {
                let finished = current.concat();
                pieces.push(finished);
                let carried = self.overlap_tail(&current, line_len);
                current_len = carried.iter().map(|l| l.chars().count()).sum();
                current = carried;
            }

            current.push(line);
            current_len += line_len;
        }
        flush(&mut pieces, &mut current, &mut current_len);

        pieces.retain(|piece| !piece.trim().is_empty());
        pieces
    }

    /// Trailing lines of `lines` totalling at most `overlap_chars`, leaving
    /// room for the next line of `incoming` characters.
    fn overlap_tail<'a>(&self, lines: &[&'a str], incoming: usize) -> Vec<&'a str> {
        let budget = self
            .overlap_chars
            .min(self.max_chars.saturating_sub(incoming));
        let mut tail = Vec::new();
        let mut used = 0usize;
        for line in lines.iter().rev() {
            let len = line.chars().count();
            if used + len > budget {
                break;
            }
            used += len;
            tail.push(*line);
        }
        tail.reverse();
        tail
    }
}

fn flush(pieces: &mut Vec<String>, current: &mut Vec<&str>, current_len: &mut usize) {
    if !current.is_empty() {
        pieces.push(current.concat());
        current.clear();
        *current_len = 0;
    }
}

fn lines_with_endings(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n')
}

/// Character-window split for a single line longer than a fragment.
fn hard_split(line: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let step = max_chars - overlap_chars;
    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_chars: usize, overlap_chars: usize) -> Chunker {
        Chunker::new(&ChunkingConfig {
            max_chars,
            overlap_chars,
        })
    }

    fn document(text: &str) -> Document {
        Document {
            id: "doc_0011223344556677".to_string(),
            path: "app.tf".into(),
            relative_path: "app.tf".to_string(),
            extension: ".tf".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn small_document_is_one_fragment_with_exact_text() {
        let doc = document("resource aws_instance web\n");
        let fragments = chunker(100, 10).split(&doc);

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "resource aws_instance web\n");
        assert_eq!(fragments[0].id, "doc_0011223344556677#0");
        assert_eq!(fragments[0].path, "app.tf");
        assert_eq!(fragments[0].extension, ".tf");
    }

    #[test]
    fn blank_document_has_no_fragments() {
        assert!(chunker(100, 10).split(&document("  \n\t\n")).is_empty());
    }

    #[test]
    fn long_document_splits_on_lines_within_budget() {
        let text: String = (0..40).map(|i| format!("key_{i:02} = value\n")).collect();
        let fragments = chunker(100, 20).split_text(&text);

        assert!(fragments.len() > 1);
        for fragment in &fragments {
            assert!(fragment.chars().count() <= 100, "fragment too long: {fragment:?}");
            assert!(fragment.ends_with('\n'));
        }
        assert!(fragments[0].starts_with("key_00"));
        assert!(fragments.last().unwrap().contains("key_39"));
    }

    #[test]
    fn consecutive_fragments_overlap() {
        let text: String = (0..20).map(|i| format!("line {i:02}\n")).collect();
        let fragments = chunker(40, 16).split_text(&text);

        assert!(fragments.len() > 1);
        let last_line_of_first = fragments[0].lines().last().unwrap();
        assert!(fragments[1].starts_with(last_line_of_first) || fragments[1].contains(last_line_of_first));
    }

    #[test]
    fn oversized_single_line_is_window_split() {
        let line = "x".repeat(250);
        let fragments = chunker(100, 10).split_text(&line);

        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.chars().count() <= 100));
    }
}
