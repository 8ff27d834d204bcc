//! Text normalization (spec §4.4). `TextNormalizer` is a capability
//! interface (spec §9 "Dynamic dispatch on Normalizer / Embedder / Reranker")
//! so a fuller external lemmatizer can be swapped in without touching the
//! recall/ingest pipelines; `DefaultNormalizer` is the built-in
//! ASCII-folding + stopword + temporal-phrase implementation.

use chrono::{DateTime, Duration, Utc};

/// Result of normalizing a piece of raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub text: String,
    pub tokens: Vec<String>,
    pub folded: String,
    pub language_guess: Language,
    pub temporal_refs: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Turkish,
    English,
    Unknown,
}

/// Capability interface so a real morphological analyzer can replace the
/// built-in folding/stopword implementation (spec §9).
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> Normalized;
}

const TURKISH_FOLD_PAIRS: &[(char, char)] = &[
    ('ç', 'c'),
    ('Ç', 'C'),
    ('ğ', 'g'),
    ('Ğ', 'G'),
    ('ı', 'i'),
    ('İ', 'I'),
    ('ö', 'o'),
    ('Ö', 'O'),
    ('ş', 's'),
    ('Ş', 'S'),
    ('ü', 'u'),
    ('Ü', 'U'),
];

/// ASCII-fold Turkish diacritics, e.g. `ç→c`, `ğ→g`, `ı→i`, `ö→o`, `ş→s`, `ü→u`.
pub fn ascii_fold(s: &str) -> String {
    s.chars()
        .map(|c| {
            TURKISH_FOLD_PAIRS
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect()
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "to", "of", "and", "in", "on",
    "at", "for", "with", "that", "this", "it", "as", "by",
];

const TURKISH_STOPWORDS: &[&str] = &[
    "bir", "ve", "ile", "de", "da", "mi", "mu", "ki", "bu", "su", "o", "ama", "ya",
];

fn looks_turkish(lower: &str) -> bool {
    lower.chars().any(|c| "çğışöü".contains(c))
        || TURKISH_STOPWORDS.iter().any(|w| lower.split_whitespace().any(|t| t == *w))
}

/// Recognized Turkish + English relative-time phrases (spec §4.4). Each
/// entry maps a phrase to an absolute `[start, end)` range relative to `now`.
fn temporal_catalog(lower: &str, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let day = Duration::days(1);
    let mut refs = Vec::new();

    let mut push_day_range = |start: DateTime<Utc>| refs.push((start, start + day));

    if lower.contains("yesterday") || lower.contains("dün") {
        push_day_range(now - day);
    }
    if lower.contains("dün akşam") {
        push_day_range(now - day);
    }
    if lower.contains("today") || lower.contains("bugün") {
        push_day_range(now);
    }
    if lower.contains("geçen hafta") || lower.contains("last week") {
        refs.push((now - Duration::days(14), now - Duration::days(7)));
    }
    if lower.contains("öbür gün") {
        push_day_range(now + day * 2);
    }
    if let Some(n) = parse_n_days_ago(lower) {
        push_day_range(now - Duration::days(n));
    }

    refs
}

fn parse_n_days_ago(lower: &str) -> Option<i64> {
    // "3 days ago" / "3 gün önce"
    let words: Vec<&str> = lower.split_whitespace().collect();
    for (i, w) in words.iter().enumerate() {
        if let Ok(n) = w.parse::<i64>() {
            let rest = words.get(i + 1..).unwrap_or(&[]).join(" ");
            if rest.starts_with("days ago") || rest.starts_with("day ago") || rest.starts_with("gün önce") {
                return Some(n);
            }
        }
    }
    None
}

/// Built-in normalizer: lowercases, ASCII-folds, tokenizes on whitespace and
/// punctuation, strips stopwords, guesses language, extracts temporal refs.
/// English text falls through lowercased (spec §4.4); Turkish is folded and
/// stopword-pruned using the built-in list unless a richer lemmatizer is
/// injected via `TextNormalizer`.
pub struct DefaultNormalizer;

impl TextNormalizer for DefaultNormalizer {
    fn normalize(&self, raw: &str) -> Normalized {
        let lower = raw.to_lowercase();
        let language_guess = if looks_turkish(&lower) {
            Language::Turkish
        } else if lower.chars().any(|c| c.is_alphabetic()) {
            Language::English
        } else {
            Language::Unknown
        };

        let folded = ascii_fold(&lower);
        let stopwords: &[&str] = match language_guess {
            Language::Turkish => TURKISH_STOPWORDS,
            _ => ENGLISH_STOPWORDS,
        };

        let tokens: Vec<String> = folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .filter(|t| !stopwords.contains(t))
            .map(|t| t.to_string())
            .collect();

        let normalized_text = tokens.join(" ");
        let temporal_refs = temporal_catalog(&lower, Utc::now());

        Normalized {
            text: normalized_text,
            tokens,
            folded,
            language_guess,
            temporal_refs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_turkish_diacritics() {
        assert_eq!(ascii_fold("çğışöü"), "cgisou");
    }

    #[test]
    fn same_normalized_form_for_identical_sentence() {
        let n = DefaultNormalizer;
        let a = n.normalize("geçen hafta yeni sunucu aldık");
        let b = n.normalize("geçen hafta yeni sunucu aldık");
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn strips_english_stopwords() {
        let n = DefaultNormalizer;
        let r = n.normalize("the user is in the office");
        assert!(!r.tokens.contains(&"the".to_string()));
        assert!(r.tokens.contains(&"user".to_string()));
    }

    #[test]
    fn detects_yesterday_phrase() {
        let n = DefaultNormalizer;
        let r = n.normalize("yesterday's deploy errors");
        assert_eq!(r.temporal_refs.len(), 1);
    }
}
