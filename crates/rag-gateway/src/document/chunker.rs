use unicode_segmentation::UnicodeSegmentation;

pub const TARGET_CHUNK_TOKENS: usize = 512;
pub const TOKEN_OVERLAP: usize = 128;
pub const MAX_CHUNK_TOKENS: usize = 1024;

/// Documents below this size are split on sentence boundaries only.
const SHORT_TEXT_BYTES: usize = 2000;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    /// Byte offsets into the source text, `[chunk_start, chunk_end)`.
    pub chunk_start: usize,
    pub chunk_end: usize,
    pub token_count: usize,
}

/// Splits document text into retrieval-sized pieces. Tokenization is plain
/// Unicode word segmentation, which is stable across runs; switching the
/// tokenizer requires a reindex.
pub struct TextChunker {
    target_tokens: usize,
    overlap_tokens: usize,
    max_tokens: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(TARGET_CHUNK_TOKENS, TOKEN_OVERLAP)
    }
}

impl TextChunker {
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Self {
        let target_tokens = target_tokens.clamp(1, MAX_CHUNK_TOKENS);
        Self {
            target_tokens,
            overlap_tokens: overlap_tokens.min(target_tokens.saturating_sub(1)),
            max_tokens: MAX_CHUNK_TOKENS,
        }
    }

    /// Strategy selection: structured markup and short text go through the
    /// sentence-aware splitter, everything else through the token splitter.
    pub fn chunk(&self, text: &str, file_type: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sentence_aware =
            matches!(file_type, "html" | "md") || text.len() < SHORT_TEXT_BYTES;

        if sentence_aware {
            self.chunk_sentences(text)
        } else {
            self.chunk_tokens(text, 0)
        }
    }

    /// Token-window splitter: windows of `target_tokens` words advancing by
    /// `target - overlap`, spans taken from the underlying byte offsets.
    fn chunk_tokens(&self, text: &str, base_offset: usize) -> Vec<Chunk> {
        let spans: Vec<(usize, &str)> = text.unicode_word_indices().collect();
        if spans.is_empty() {
            return Vec::new();
        }

        let step = self.target_tokens - self.overlap_tokens;
        let mut chunks = Vec::new();
        let mut start_tok = 0;

        while start_tok < spans.len() {
            let end_tok = (start_tok + self.target_tokens).min(spans.len());

            let mut start = spans[start_tok].0;
            let mut end = spans[end_tok - 1].0 + spans[end_tok - 1].1.len();

            // The first and last chunks absorb surrounding whitespace so the
            // union of spans covers the whole input.
            if start_tok == 0 {
                start = 0;
            }
            if end_tok == spans.len() {
                end = text.len();
            }

            chunks.push(Chunk {
                text: text[start..end].to_string(),
                chunk_start: base_offset + start,
                chunk_end: base_offset + end,
                token_count: end_tok - start_tok,
            });

            if end_tok == spans.len() {
                break;
            }
            start_tok += step;
        }

        chunks
    }

    /// Sentence-aware splitter: groups whole sentences up to the token
    /// target, overlapping one sentence between consecutive chunks. A single
    /// sentence above the hard cap falls back to the token splitter.
    fn chunk_sentences(&self, text: &str) -> Vec<Chunk> {
        let sentences: Vec<(usize, &str)> = text
            .split_sentence_bound_indices()
            .filter(|(_, s)| !s.trim().is_empty())
            .collect();
        if sentences.is_empty() {
            return Vec::new();
        }

        let counts: Vec<usize> = sentences
            .iter()
            .map(|(_, s)| s.unicode_words().count())
            .collect();

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut i = 0;

        while i < sentences.len() {
            // Oversized single sentence: hard-split on tokens.
            if counts[i] > self.max_tokens {
                let (offset, sentence) = sentences[i];
                chunks.extend(self.chunk_tokens(sentence, offset));
                i += 1;
                continue;
            }

            let mut tokens = counts[i];
            let mut j = i + 1;
            while j < sentences.len()
                && counts[j] <= self.max_tokens
                && tokens + counts[j] <= self.target_tokens
            {
                tokens += counts[j];
                j += 1;
            }

            let start = sentences[i].0;
            let end = sentences[j - 1].0 + sentences[j - 1].1.len();
            chunks.push(Chunk {
                text: text[start..end].to_string(),
                chunk_start: start,
                chunk_end: end,
                token_count: tokens,
            });

            if j >= sentences.len() {
                break;
            }
            // One-sentence overlap into the next chunk. A single-sentence
            // group moves straight on so the loop always advances.
            if j - 1 > i && counts[j - 1] < self.target_tokens {
                i = j - 1;
            } else {
                i = j;
            }
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_text(n: usize) -> String {
        (0..n).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = TextChunker::default();
        assert!(chunker.chunk("", "txt").is_empty());
        assert!(chunker.chunk("   \n\t ", "txt").is_empty());
    }

    #[test]
    fn short_text_stays_in_one_chunk() {
        let chunker = TextChunker::default();
        let text = "Machine learning enables systems to learn from data. \
                    Deep learning uses neural networks.";
        let chunks = chunker.chunk(text, "txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_start, 0);
        assert_eq!(chunks[0].chunk_end, text.len());
        assert_eq!(chunks[0].token_count, 13);
    }

    #[test]
    fn token_windows_overlap_and_cover() {
        let chunker = TextChunker::new(100, 25);
        let text = word_text(1000);
        // force the token splitter despite the word count
        let chunks = chunker.chunk_tokens(&text, 0);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].chunk_start, 0);
        assert_eq!(chunks.last().unwrap().chunk_end, text.len());

        for pair in chunks.windows(2) {
            // monotonic starts, overlapping spans
            assert!(pair[1].chunk_start > pair[0].chunk_start);
            assert!(pair[1].chunk_start < pair[0].chunk_end);
        }
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
            assert_eq!(chunk.text, &text[chunk.chunk_start..chunk.chunk_end]);
        }
    }

    #[test]
    fn spans_slice_back_to_source() {
        let chunker = TextChunker::new(8, 2);
        let text = "One sentence here. Another sentence follows it. A third one closes. \
                    And then a fourth sentence arrives. Finally the fifth sentence ends this."
            .to_string();
        let chunks = chunker.chunk(&text, "md");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(chunk.text, &text[chunk.chunk_start..chunk.chunk_end]);
        }
    }

    #[test]
    fn sentence_chunks_overlap_one_sentence() {
        let chunker = TextChunker::new(12, 0);
        let text = (0..12)
            .map(|i| format!("Sentence number {} has five words.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunker.chunk(&text, "md");

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // consecutive chunks share their boundary sentence
            assert!(pair[1].chunk_start < pair[0].chunk_end);
        }
    }

    #[test]
    fn no_chunk_exceeds_hard_cap() {
        let chunker = TextChunker::default();
        // one giant "sentence" with no terminal punctuation
        let text = word_text(5000);
        let chunks = chunker.chunk(&text, "txt");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.token_count <= MAX_CHUNK_TOKENS);
        }
    }

    #[test]
    fn oversized_sentence_in_markup_is_split() {
        let chunker = TextChunker::new(64, 16);
        let text = word_text(3000); // < target would never hold this
        let chunks = chunker.chunk(&text, "md");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= MAX_CHUNK_TOKENS);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = TextChunker::default();
        let text = word_text(2000);
        let a = chunker.chunk(&text, "txt");
        let b = chunker.chunk(&text, "txt");
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_start, y.chunk_start);
            assert_eq!(x.chunk_end, y.chunk_end);
            assert_eq!(x.text, y.text);
        }
    }
}
