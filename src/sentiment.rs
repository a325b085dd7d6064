//! Snippet sentiment scoring.
//!
//! [`Classifier`] owns the contract (blank text is neutral, the sign of the
//! score picks the label, scores stay in `[-1, 1]`); the actual polarity
//! estimate comes from a pluggable [`SentimentScorer`].

use std::collections::HashMap;

use crate::models::{Sentiment, SentimentLabel};

pub trait SentimentScorer: Send + Sync {
    /// Raw polarity estimate for non-blank text.
    fn polarity(&self, text: &str) -> f64;
}

pub struct Classifier {
    scorer: Box<dyn SentimentScorer>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Box::new(LexiconScorer::default()))
    }
}

impl Classifier {
    pub fn new(scorer: Box<dyn SentimentScorer>) -> Self {
        Self { scorer }
    }

    pub fn classify(&self, text: &str) -> Sentiment {
        if text.trim().is_empty() {
            return Sentiment::neutral();
        }

        let raw = self.scorer.polarity(text);
        let score = if raw.is_finite() {
            raw.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        Sentiment {
            label: SentimentLabel::from_score(score),
            score,
        }
    }
}

// Adjective/verb polarities in the spirit of pattern-style lexicons.
const LEXICON: &[(&str, f64)] = &[
    ("amazing", 0.6),
    ("appreciate", 0.5),
    ("awesome", 1.0),
    ("beautiful", 0.85),
    ("best", 1.0),
    ("better", 0.5),
    ("brilliant", 0.9),
    ("congratulations", 0.6),
    ("cool", 0.35),
    ("delighted", 0.7),
    ("enjoy", 0.4),
    ("excellent", 1.0),
    ("excited", 0.4),
    ("fantastic", 0.4),
    ("fine", 0.4),
    ("glad", 0.5),
    ("good", 0.7),
    ("great", 0.8),
    ("happy", 0.8),
    ("helpful", 0.5),
    ("impressive", 1.0),
    ("love", 0.5),
    ("lovely", 0.5),
    ("nice", 0.6),
    ("perfect", 1.0),
    ("pleased", 0.5),
    ("positive", 0.23),
    ("success", 0.3),
    ("successful", 0.75),
    ("thank", 0.3),
    ("thanks", 0.2),
    ("welcome", 0.8),
    ("wonderful", 1.0),
    ("angry", -0.5),
    ("annoying", -0.8),
    ("awful", -1.0),
    ("bad", -0.7),
    ("broken", -0.4),
    ("cancelled", -0.3),
    ("complaint", -0.4),
    ("delay", -0.3),
    ("delayed", -0.3),
    ("disappointed", -0.75),
    ("disappointing", -0.6),
    ("error", -0.4),
    ("fail", -0.5),
    ("failed", -0.5),
    ("failure", -0.3),
    ("hate", -0.8),
    ("horrible", -1.0),
    ("late", -0.3),
    ("poor", -0.4),
    ("problem", -0.3),
    ("sad", -0.5),
    ("sorry", -0.5),
    ("terrible", -1.0),
    ("unfortunately", -0.5),
    ("urgent", -0.2),
    ("worse", -0.4),
    ("worst", -1.0),
    ("wrong", -0.5),
];

const INTENSIFIERS: &[(&str, f64)] = &[
    ("extremely", 1.5),
    ("incredibly", 1.4),
    ("really", 1.3),
    ("so", 1.2),
    ("super", 1.3),
    ("very", 1.3),
];

const NEGATIONS: &[&str] = &["not", "never", "no", "nothing", "hardly", "dont", "isnt", "wasnt"];

/// Flipped polarities are damped rather than mirrored ("not good" is mildly negative).
const NEGATION_FACTOR: f64 = -0.5;

/// Averages the polarity of every lexicon word in the text, applying a
/// preceding intensifier and negation to each.
pub struct LexiconScorer {
    lexicon: HashMap<&'static str, f64>,
    intensifiers: HashMap<&'static str, f64>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            lexicon: LEXICON.iter().copied().collect(),
            intensifiers: INTENSIFIERS.iter().copied().collect(),
        }
    }
}

impl SentimentScorer for LexiconScorer {
    fn polarity(&self, text: &str) -> f64 {
        let words = tokenize(text);
        let mut total = 0.0;
        let mut matched = 0u32;

        for (i, word) in words.iter().enumerate() {
            let Some(&base) = self.lexicon.get(word.as_str()) else {
                continue;
            };

            let mut value = base;
            let mut lookback = i;
            if lookback > 0 {
                if let Some(&factor) = self.intensifiers.get(words[lookback - 1].as_str()) {
                    value *= factor;
                    lookback -= 1;
                }
            }
            if lookback > 0 && NEGATIONS.contains(&words[lookback - 1].as_str()) {
                value *= NEGATION_FACTOR;
            }

            total += value;
            matched += 1;
        }

        if matched == 0 {
            0.0
        } else {
            total / f64::from(matched)
        }
    }
}

/// Lowercased words with apostrophes dropped ("don't" -> "dont").
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.replace('\'', "").to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
