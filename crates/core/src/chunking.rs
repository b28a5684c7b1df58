use crate::error::IngestError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_200,
            overlap_chars: 120,
            min_chars: 40,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidArgument(
                "chunk max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidArgument(format!(
                "chunk overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// Chunks shorter than `min_chars` are folded into a neighbouring chunk.
pub fn chunk_by_paragraph(text: &str, config: ChunkingConfig) -> Vec<String> {
    let paragraphs = text
        .split("\n\n")
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current.push_str(&paragraph);
            continue;
        }

        let fits = current.chars().count() + paragraph.chars().count() + 2 <= config.max_chars;
        if fits || current.chars().count() < config.min_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(&paragraph);
        }
    }

    if !current.is_empty() {
        match chunks.last_mut() {
            Some(last) if current.chars().count() < config.min_chars => {
                last.push_str("\n\n");
                last.push_str(&current);
            }
            _ => chunks.push(current),
        }
    }

    let mut windowed = Vec::new();
    for chunk in chunks {
        let chars: Vec<char> = chunk.chars().collect();
        if chars.len() <= config.max_chars {
            windowed.push(chunk);
            continue;
        }

        let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            windowed.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    windowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn short_text_still_yields_one_chunk() {
        let chunks = chunk_by_paragraph("The sky is blue.", ChunkingConfig::default());
        assert_eq!(chunks, vec!["The sky is blue.".to_string()]);
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(chunk_by_paragraph(" \n\n \t", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn paragraphs_are_packed_up_to_max() {
        let config = ChunkingConfig {
            max_chars: 30,
            overlap_chars: 4,
            min_chars: 1,
        };
        let chunks = chunk_by_paragraph("first para\n\nsecond para\n\nthird paragraph here", config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "first para\n\nsecond para");
        assert_eq!(chunks[1], "third paragraph here");
    }

    #[test]
    fn short_paragraph_before_long_one_is_kept() {
        let long = "word ".repeat(240);
        let text = format!("Warranty: ten years.\n\n{long}");
        let config = ChunkingConfig::default();

        let chunks = chunk_by_paragraph(&text, config);

        assert!(chunks[0].starts_with("Warranty: ten years."));
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= config.max_chars));
    }

    #[test]
    fn short_trailing_paragraph_is_kept() {
        let long = "word ".repeat(240);
        let text = format!("{long}\n\nWarranty: ten years.");

        let chunks = chunk_by_paragraph(&text, ChunkingConfig::default());

        let last = chunks.last().expect("at least one chunk");
        assert!(last.ends_with("Warranty: ten years."));
    }

    #[test]
    fn oversized_paragraph_is_windowed_with_overlap() {
        let config = ChunkingConfig {
            max_chars: 10,
            overlap_chars: 2,
            min_chars: 1,
        };
        let chunks = chunk_by_paragraph("abcdefghijklmnop", config);
        assert_eq!(chunks, vec!["abcdefghij".to_string(), "ijklmnop".to_string()]);
    }

    #[test]
    fn overlap_must_be_smaller_than_max() {
        let config = ChunkingConfig {
            max_chars: 10,
            overlap_chars: 10,
            min_chars: 1,
        };
        assert!(config.validate().is_err());
    }
}
