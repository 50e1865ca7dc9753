use crate::sentiment::{SentimentClassifier, SentimentScore};
use once_cell::sync::Lazy;
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

/// How many preceding tokens a negator reaches.
const NEGATION_WINDOW: usize = 3;

/// In-process three-way classifier over a crypto market lexicon.
///
/// Positive and negative word weights become the logits of a
/// negative/neutral/positive distribution (neutral has a fixed logit of 1),
/// and the score is `P(positive) - P(negative)`.
#[derive(Debug, Clone, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Summed positive and negative weight, negation applied.
    fn weights(&self, text: &str) -> (f64, f64) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut pos = 0.0;
        let mut neg = 0.0;

        for (i, tok) in tokens.iter().enumerate() {
            let base = LEXICON.get(tok.as_str()).copied().unwrap_or(0);
            if base == 0 {
                continue;
            }
            let negated =
                (1..=NEGATION_WINDOW).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            let w = f64::from(if negated { -base } else { base });
            if w > 0.0 {
                pos += w;
            } else {
                neg -= w;
            }
        }
        (pos, neg)
    }

    /// `[negative, neutral, positive]` probabilities.
    pub fn distribution(&self, text: &str) -> [f64; 3] {
        let (pos, neg) = self.weights(text);
        softmax([neg, 1.0, pos])
    }
}

#[async_trait::async_trait]
impl SentimentClassifier for LexiconClassifier {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    async fn classify(&self, text: &str) -> anyhow::Result<SentimentScore> {
        let [p_neg, _, p_pos] = self.distribution(text);
        Ok(SentimentScore::from_raw(p_pos - p_neg))
    }
}

fn softmax(logits: [f64; 3]) -> [f64; 3] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = logits.map(|l| (l - max).exp());
    let sum: f64 = exp.iter().sum();
    exp.map(|e| e / sum)
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .map(|t| t.trim_matches(|c| c == '\'' || c == '-'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "without"
            | "despite"
    )
}
