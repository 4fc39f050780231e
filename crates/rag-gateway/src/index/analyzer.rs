use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("valid url regex"));

static STOPWORDS_EN: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "was", "were", "will", "with", "what", "which", "who", "not",
];

static STOPWORDS_RU: &[&str] = &[
    "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все", "она",
    "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по", "ее", "мне", "было",
    "от", "о", "из", "ему", "или", "ни", "быть", "был", "него", "до", "вас", "это", "эта",
];

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    STOPWORDS_EN
        .iter()
        .chain(STOPWORDS_RU.iter())
        .copied()
        .collect()
});

/// Analyze text for scoring: URL removal, Unicode word segmentation,
/// case-folding, punctuation stripping, English/Russian stopword elimination.
///
/// The output is what the inverted index stores and what queries are reduced
/// to; it must stay stable across runs.
pub fn analyze(text: &str) -> Vec<String> {
    let stripped = URL_RE.replace_all(text, " ");

    stripped
        .unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(w.as_str()))
        .collect()
}

/// Word tokens of the original text with their byte spans, case-folded but
/// without stopword elimination. Used for highlighting and filename matching.
pub fn token_spans(text: &str) -> Vec<(String, usize, usize)> {
    text.unicode_word_indices()
        .map(|(start, w)| (w.to_lowercase(), start, start + w.len()))
        .collect()
}

/// Tokens of a filename, split on word boundaries (so `ml_basics.txt`
/// yields `ml`, `basics`, `txt`).
pub fn filename_tokens(filename: &str) -> HashSet<String> {
    filename
        .unicode_words()
        .map(|w| w.to_lowercase())
        .collect()
}

/// Bounded Levenshtein distance; returns `max + 1` once the bound is exceeded.
fn levenshtein_bounded(a: &str, b: &str, max: usize) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.len().abs_diff(b.len()) > max {
        return max + 1;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > max {
            return max + 1;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// AUTO fuzziness: exact for very short terms, edit distance 1 for terms of
/// 3..=5 chars, 2 beyond that.
pub fn auto_fuzzy_distance(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

pub fn fuzzy_match(term: &str, candidate: &str) -> bool {
    let max = auto_fuzzy_distance(term);
    if max == 0 {
        return term == candidate;
    }
    levenshtein_bounded(term, candidate, max) <= max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_strips_punctuation() {
        let tokens = analyze("Machine Learning, enables: systems!");
        assert_eq!(tokens, vec!["machine", "learning", "enables", "systems"]);
    }

    #[test]
    fn removes_urls() {
        let tokens = analyze("see https://example.com/docs?q=1 for details");
        assert!(!tokens.iter().any(|t| t.contains("example")));
        assert!(tokens.contains(&"details".to_string()));
    }

    #[test]
    fn removes_english_and_russian_stopwords() {
        let tokens = analyze("the cat is on the mat");
        assert_eq!(tokens, vec!["cat", "mat"]);

        let tokens = analyze("он сказал что документ готов");
        assert_eq!(tokens, vec!["сказал", "документ", "готов"]);
    }

    #[test]
    fn token_spans_report_byte_offsets() {
        let spans = token_spans("Deep learning");
        assert_eq!(spans[0], ("deep".to_string(), 0, 4));
        assert_eq!(spans[1], ("learning".to_string(), 5, 13));
    }

    #[test]
    fn filename_tokens_split_extension() {
        let tokens = filename_tokens("ml_basics.txt");
        assert!(tokens.contains("ml"));
        assert!(tokens.contains("basics"));
        assert!(tokens.contains("txt"));
    }

    #[test]
    fn fuzzy_auto_distances() {
        assert_eq!(auto_fuzzy_distance("ml"), 0);
        assert_eq!(auto_fuzzy_distance("learn"), 1);
        assert_eq!(auto_fuzzy_distance("learning"), 2);

        assert!(fuzzy_match("learn", "lern"));
        assert!(fuzzy_match("learning", "lerning"));
        assert!(!fuzzy_match("ml", "mll"));
        assert!(!fuzzy_match("cat", "dog"));
    }

    #[test]
    fn levenshtein_bound_cuts_off() {
        assert_eq!(levenshtein_bounded("abcdef", "uvwxyz", 2), 3);
        assert_eq!(levenshtein_bounded("kitten", "sitting", 3), 3);
    }
}
