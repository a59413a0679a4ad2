//! The emotion label set and sentiment score bounds.
//!
//! Cognition services are free-form; everything stored in a
//! [`PlanRecord`](crate::plan::PlanRecord) is folded onto this closed set
//! first so the visualization step and API clients see a stable vocabulary.

use crate::{Error, Result};

/// Labels a stored record may carry.
pub const LABELS: &[&str] = &[
  "happy", "excited", "hopeful", "anxious", "stressed", "sad", "angry",
  "neutral", "tired", "grateful",
];

/// Label used when nothing else matches.
pub const NEUTRAL: &str = "neutral";

pub const SCORE_MIN: u8 = 0;
pub const SCORE_MAX: u8 = 100;

const SYNONYMS: &[(&str, &str)] = &[
  ("joyful", "happy"),
  ("elated", "excited"),
  ("enthusiastic", "excited"),
  ("optimistic", "hopeful"),
  ("worried", "anxious"),
  ("nervous", "anxious"),
  ("overwhelmed", "stressed"),
  ("depressed", "sad"),
  ("melancholic", "sad"),
  ("furious", "angry"),
  ("irritated", "angry"),
  ("exhausted", "tired"),
  ("fatigued", "tired"),
  ("thankful", "grateful"),
  ("appreciative", "grateful"),
];

/// Fold a free-form emotion onto [`LABELS`].
///
/// Matching is case-insensitive and ignores surrounding whitespace. Unknown
/// emotions become [`NEUTRAL`].
pub fn normalize_label(raw: &str) -> &'static str {
  let lowered = raw.trim().to_lowercase();

  if let Some(label) = LABELS.iter().find(|l| **l == lowered) {
    return label;
  }

  SYNONYMS
    .iter()
    .find(|(synonym, _)| *synonym == lowered)
    .map(|(_, label)| *label)
    .unwrap_or(NEUTRAL)
}

pub fn is_label(s: &str) -> bool { LABELS.contains(&s) }

/// Round and clamp a raw score into `SCORE_MIN..=SCORE_MAX`.
///
/// NaN and infinities are rejected; everything else is clamped.
pub fn clamp_score(raw: f64) -> Result<u8> {
  if !raw.is_finite() {
    return Err(Error::MalformedAnalysis(format!(
      "sentiment score is not finite: {raw}"
    )));
  }
  let rounded = raw.round().clamp(SCORE_MIN as f64, SCORE_MAX as f64);
  Ok(rounded as u8)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn labels_pass_through() {
    for label in LABELS {
      assert_eq!(normalize_label(label), *label);
    }
  }

  #[test]
  fn synonyms_fold_onto_labels() {
    assert_eq!(normalize_label("Overwhelmed"), "stressed");
    assert_eq!(normalize_label("  nervous "), "anxious");
    assert_eq!(normalize_label("THANKFUL"), "grateful");
  }

  #[test]
  fn unknown_emotion_is_neutral() {
    assert_eq!(normalize_label("bamboozled"), NEUTRAL);
    assert_eq!(normalize_label(""), NEUTRAL);
  }

  #[test]
  fn scores_are_clamped_and_rounded() {
    assert_eq!(clamp_score(-12.0).unwrap(), 0);
    assert_eq!(clamp_score(140.0).unwrap(), 100);
    assert_eq!(clamp_score(41.6).unwrap(), 42);
  }

  #[test]
  fn non_finite_score_is_malformed() {
    assert!(matches!(clamp_score(f64::NAN), Err(Error::MalformedAnalysis(_))));
    assert!(clamp_score(f64::INFINITY).is_err());
  }
}
