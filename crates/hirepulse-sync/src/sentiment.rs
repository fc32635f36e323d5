//! Lexicon-based polarity scoring.
//!
//! Each token with a lexicon valence contributes to a raw sum. A booster or
//! dampener right before the word shifts it, a negator within the three
//! preceding tokens flips and scales it. The sum is squashed into the
//! `[-1, 1]` compound score; pos/neu/neg are proportions of the token mass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hirepulse_core::SentimentScore;
use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

const BOOSTER_INCREMENT: f64 = 0.293;
const NEGATION_SCALAR: f64 = -0.74;
const EXCLAMATION_INCREMENT: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;
const NORMALIZATION_ALPHA: f64 = 15.0;
const NEGATION_WINDOW: usize = 3;

#[derive(Debug, Error)]
pub enum PolarityError {
    #[error("invalid sentiment lexicon: {0}")]
    Lexicon(String),
    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// Maps text to polarity scores.
pub trait PolarityModel: Send + Sync {
    fn polarity(&self, text: &str) -> Result<SentimentScore, PolarityError>;
}

#[derive(Debug, Deserialize)]
struct LexiconFile {
    valence: HashMap<String, f64>,
    #[serde(default)]
    boosters: Vec<String>,
    #[serde(default)]
    dampeners: Vec<String>,
    #[serde(default)]
    negators: Vec<String>,
}

#[derive(Debug)]
struct Lexicon {
    valence: HashMap<String, f64>,
    boosters: HashSet<String>,
    dampeners: HashSet<String>,
    negators: HashSet<String>,
}

impl Lexicon {
    fn parse(raw: &str) -> Result<Self, PolarityError> {
        let file: LexiconFile =
            serde_json::from_str(raw).map_err(|e| PolarityError::Lexicon(e.to_string()))?;
        if file.valence.is_empty() {
            return Err(PolarityError::Lexicon("no valence entries".into()));
        }
        if let Some((word, _)) = file.valence.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PolarityError::Lexicon(format!("non-finite valence for `{word}`")));
        }
        let lower = |words: Vec<String>| -> HashSet<String> {
            words.into_iter().map(|w| w.to_lowercase()).collect()
        };
        Ok(Self {
            valence: file
                .valence
                .into_iter()
                .map(|(w, v)| (w.to_lowercase(), v))
                .collect(),
            boosters: lower(file.boosters),
            dampeners: lower(file.dampeners),
            negators: lower(file.negators),
        })
    }
}

static EMBEDDED: Lazy<Result<Arc<Lexicon>, String>> = Lazy::new(|| {
    Lexicon::parse(include_str!("../assets/sentiment_lexicon.json"))
        .map(Arc::new)
        .map_err(|e| e.to_string())
});

#[derive(Debug, Clone)]
pub struct LexiconModel {
    lexicon: Arc<Lexicon>,
}

impl LexiconModel {
    /// The lexicon shipped with the crate.
    pub fn embedded() -> Result<Self, PolarityError> {
        match &*EMBEDDED {
            Ok(lexicon) => Ok(Self {
                lexicon: Arc::clone(lexicon),
            }),
            Err(message) => Err(PolarityError::Lexicon(message.clone())),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, PolarityError> {
        Ok(Self {
            lexicon: Arc::new(Lexicon::parse(raw)?),
        })
    }

    fn token_valences(&self, tokens: &[String]) -> Vec<f64> {
        let lex = &self.lexicon;
        tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let Some(&base) = lex.valence.get(token) else {
                    return 0.0;
                };
                let mut valence = base;
                if let Some(prev) = i.checked_sub(1).map(|p| &tokens[p]) {
                    if lex.boosters.contains(prev) {
                        valence += BOOSTER_INCREMENT.copysign(valence);
                    } else if lex.dampeners.contains(prev) {
                        valence -= BOOSTER_INCREMENT.copysign(valence);
                    }
                }
                let negated = (1..=NEGATION_WINDOW)
                    .any(|k| i >= k && lex.negators.contains(&tokens[i - k]));
                if negated {
                    valence *= NEGATION_SCALAR;
                }
                valence
            })
            .collect()
    }
}

impl PolarityModel for LexiconModel {
    fn polarity(&self, text: &str) -> Result<SentimentScore, PolarityError> {
        let tokens: Vec<String> = tokenize(text).collect();
        if tokens.is_empty() {
            return Ok(SentimentScore {
                compound: 0.0,
                pos: 0.0,
                neu: 0.0,
                neg: 0.0,
            });
        }

        let valences = self.token_valences(&tokens);
        let emphasis =
            text.matches('!').count().min(MAX_EXCLAMATIONS) as f64 * EXCLAMATION_INCREMENT;

        let mut sum: f64 = valences.iter().sum();
        if sum > 0.0 {
            sum += emphasis;
        } else if sum < 0.0 {
            sum -= emphasis;
        }

        let mut pos_sum: f64 = 0.0;
        let mut neg_sum: f64 = 0.0;
        let mut neu_count: f64 = 0.0;
        for &v in &valences {
            if v > 0.0 {
                pos_sum += v + 1.0;
            } else if v < 0.0 {
                neg_sum += v - 1.0;
            } else {
                neu_count += 1.0;
            }
        }
        if pos_sum > neg_sum.abs() {
            pos_sum += emphasis;
        } else if pos_sum < neg_sum.abs() {
            neg_sum -= emphasis;
        }

        let total = pos_sum + neg_sum.abs() + neu_count;
        if !total.is_finite() || !sum.is_finite() {
            return Err(PolarityError::Analysis("non-finite score".into()));
        }

        Ok(SentimentScore {
            compound: round_to(normalize(sum), 4),
            pos: round_to((pos_sum / total).abs(), 3),
            neu: round_to((neu_count / total).abs(), 3),
            neg: round_to((neg_sum / total).abs(), 3),
        })
    }
}

fn normalize(sum: f64) -> f64 {
    (sum / (sum * sum + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Whitespace tokens, lowercased, with surrounding punctuation removed.
/// Inner apostrophes survive so contractions like "isn't" stay whole.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|raw| {
            raw.replace('\u{2019}', "'")
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> LexiconModel {
        LexiconModel::embedded().expect("embedded lexicon")
    }

    fn assert_proportions(score: &SentimentScore) {
        let total = score.pos + score.neu + score.neg;
        assert!((total - 1.0).abs() < 0.002, "proportions sum to {total}");
    }

    #[test]
    fn hiring_enthusiasm_is_positive() {
        let score = model().polarity("We're hiring, great team and generous pay!").unwrap();
        assert!(score.compound > 0.5, "{score:?}");
        assert!(score.pos > 0.0);
        assert_eq!(score.neg, 0.0);
        assert_proportions(&score);
    }

    #[test]
    fn negation_flips_polarity() {
        let model = model();
        let plain = model.polarity("the market is good").unwrap();
        let negated = model.polarity("the market is not good").unwrap();
        let far = model.polarity("not that the market is good").unwrap();
        assert!(plain.compound > 0.0);
        assert!(negated.compound < 0.0);
        // Negator more than three tokens back has no effect.
        assert_eq!(far.compound, plain.compound);
    }

    #[test]
    fn boosters_and_dampeners_shift_intensity() {
        let model = model();
        let base = model.polarity("pay is bad").unwrap().compound;
        let boosted = model.polarity("pay is very bad").unwrap().compound;
        let damped = model.polarity("pay is slightly bad").unwrap().compound;
        assert!(boosted < base);
        assert!(damped > base);
        assert!(damped < 0.0);
    }

    #[test]
    fn hiring_and_market_chatter_is_scored() {
        let model = model();
        let positive = [
            "Just got hired at a DeFi startup, thrilled!",
            "Bullish on Solana dev hiring this quarter",
            "Congrats to the team on the funding round",
            "Remote Rust roles with bonuses and flexible hours",
        ];
        let negative = [
            "Another round of layoffs, feeling burned out",
            "That project was a rugpull and everyone got rekt",
            "Recruiter ghosted me after four interviews",
            "Exchange hacked, withdrawals frozen, total nightmare",
        ];
        for text in positive {
            assert!(model.polarity(text).unwrap().compound > 0.05, "{text}");
        }
        for text in negative {
            assert!(model.polarity(text).unwrap().compound < -0.05, "{text}");
        }
    }

    #[test]
    fn neutral_text_scores_zero() {
        let score = model().polarity("The role is based in Berlin").unwrap();
        assert_eq!(score.compound, 0.0);
        assert_eq!(score.neu, 1.0);
        assert_proportions(&score);
    }

    #[test]
    fn contractions_are_kept_whole() {
        let tokens: Vec<String> = tokenize("It isn\u{2019}t great, (really)!").collect();
        assert_eq!(tokens, vec!["it", "isn't", "great", "really"]);
        assert!(model().polarity("It isn't great").unwrap().compound < 0.0);
    }

    #[test]
    fn custom_lexicon_must_have_entries() {
        assert!(matches!(
            LexiconModel::from_json(r#"{"valence": {}}"#),
            Err(PolarityError::Lexicon(_))
        ));
        let tiny = LexiconModel::from_json(r#"{"valence": {"Moon": 2.0}}"#).unwrap();
        assert!(tiny.polarity("to the moon").unwrap().compound > 0.0);
    }
}
