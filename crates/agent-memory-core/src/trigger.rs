//! `TriggerScorer` (spec §4.5): decides whether a free-text query warrants a
//! recall, and scores write-time importance.

const POSITIVE_TRIGGERS_TR: &[&str] = &[
    "hatırl", "ne konuştuk", "geçen", "karar", "söylemiştim", "unutma", "hatırlıyor musun",
    "daha önce", "demiştin", "kaydet", "not al", "tercih", "kural", "önemli", "bahsetmiştim",
    "ne demiştik", "geçen sefer", "geçen hafta", "geçen ay", "geçen yıl", "hani demiştin",
    "konuşmuştuk", "anlaşmıştık", "söz vermiştin", "not etmiştim", "daha önce konuştuk",
    "eskiden", "önceki konuşmamızda", "kararlaştırmıştık", "ne söylemiştim", "aklında mı",
    "tekrar hatırlat", "neydi", "nasıldı", "hatırlamıyorum",
];

const POSITIVE_TRIGGERS_EN: &[&str] = &[
    "remember", "last time", "we discussed", "you said", "recall", "what did i", "earlier",
    "previously", "my preference", "don't forget", "note that", "as i mentioned", "we talked about",
    "we agreed", "you mentioned", "what was", "remind me", "did i tell you", "we decided",
];

const ANTI_TRIGGERS: &[&str] = &["hi", "hello", "hey", "merhaba", "selam", "ok", "thanks", "teşekkürler", "👍", "yep"];

/// Rule-based signal deciding whether a query should hit the memory system,
/// plus write-time importance scoring.
pub struct TriggerScorer {
    positive_tr: Vec<String>,
    positive_en: Vec<String>,
}

impl Default for TriggerScorer {
    fn default() -> Self {
        Self {
            positive_tr: POSITIVE_TRIGGERS_TR.iter().map(|s| s.to_string()).collect(),
            positive_en: POSITIVE_TRIGGERS_EN.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TriggerScorer {
    /// Whether `query` naturally warrants a memory lookup. Ambiguous cases
    /// default to `true` — prefer recall (spec §4.5).
    pub fn should_trigger(&self, query: &str) -> bool {
        let lower = query.to_lowercase();
        let trimmed = lower.trim();

        if trimmed.split_whitespace().count() <= 1 && ANTI_TRIGGERS.contains(&trimmed) {
            return false;
        }
        if ANTI_TRIGGERS.iter().any(|a| trimmed == *a) {
            return false;
        }

        let has_positive = self
            .positive_tr
            .iter()
            .chain(self.positive_en.iter())
            .any(|p| lower.contains(p.as_str()));
        if has_positive {
            return true;
        }

        if self.has_past_tense_heuristic(&lower) {
            return true;
        }

        // Ambiguous: prefer recall.
        true
    }

    /// Crude past-tense heuristic: Turkish past-tense suffixes or common
    /// English past-tense verb endings near a first-/second-person pronoun.
    fn has_past_tense_heuristic(&self, lower: &str) -> bool {
        let turkish_past_suffixes = ["dı", "di", "du", "dü", "tı", "ti", "tu", "tü", "mıştı", "miydi"];
        turkish_past_suffixes.iter().any(|s| lower.ends_with(s))
            || lower.contains(" said ")
            || lower.contains(" told ")
            || lower.contains(" decided ")
    }

    /// Write-time importance in `[0, 1]` from simple text features (spec §4.5).
    /// `from_automated_source` caps the result at 0.4 regardless of signal
    /// strength, per the cron-origin rule.
    pub fn score_importance(&self, text: &str, is_qa_pair: bool, from_automated_source: bool) -> f32 {
        let lower = text.to_lowercase();
        let mut score: f32 = 0.3;

        let decision_markers = ["decided", "karar verdik", "karar", "will", "going to", "planning to"];
        if decision_markers.iter().any(|m| lower.contains(m)) {
            score += 0.25;
        }

        let imperative_markers = ["always", "never", "must", "should", "kural olarak", "her zaman", "asla"];
        if imperative_markers.iter().any(|m| lower.contains(m)) {
            score += 0.25;
        }

        let len = text.trim().len();
        if len > 20 && len < 400 {
            score += 0.1;
        }

        if is_qa_pair {
            score += 0.1;
        }

        score = score.clamp(0.0, 1.0);

        if from_automated_source {
            score = score.min(0.4);
        }

        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_on_explicit_recall_phrase() {
        let t = TriggerScorer::default();
        assert!(t.should_trigger("what did we decide last time?"));
        assert!(t.should_trigger("geçen hafta ne konuştuk?"));
    }

    #[test]
    fn does_not_trigger_on_greeting() {
        let t = TriggerScorer::default();
        assert!(!t.should_trigger("hi"));
        assert!(!t.should_trigger("merhaba"));
    }

    #[test]
    fn automated_source_importance_is_capped() {
        let t = TriggerScorer::default();
        let score = t.score_importance("We always deploy on Fridays and must never skip tests.", false, true);
        assert!(score <= 0.4);
    }

    #[test]
    fn rule_like_text_scores_higher_than_plain_text() {
        let t = TriggerScorer::default();
        let rule_score = t.score_importance("You must always confirm before deleting data.", false, false);
        let plain_score = t.score_importance("ok", false, false);
        assert!(rule_score > plain_score);
    }
}
