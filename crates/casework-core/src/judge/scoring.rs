//! Overall score aggregation and verdict banding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Rubric;
use crate::types::Verdict;
use crate::ValidationError;

/// Score thresholds mapping an overall score onto a verdict.
///
/// `score >= pass_threshold` passes, `score < review_threshold` fails,
/// anything in between needs human review.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictBands {
    pub pass_threshold: f64,
    pub review_threshold: f64,
}

impl Default for VerdictBands {
    fn default() -> Self {
        Self {
            pass_threshold: 7.0,
            review_threshold: 5.0,
        }
    }
}

impl VerdictBands {
    pub fn validate(&self, scale_max: f64) -> Result<(), ValidationError> {
        let in_scale = |v: f64| v.is_finite() && (0.0..=scale_max).contains(&v);
        if !in_scale(self.pass_threshold) || !in_scale(self.review_threshold) {
            return Err(ValidationError::new(
                "thresholds",
                format!("thresholds must lie within 0 - {scale_max}"),
            ));
        }
        if self.review_threshold > self.pass_threshold {
            return Err(ValidationError::new(
                "reviewThreshold",
                "review threshold cannot exceed pass threshold",
            ));
        }
        Ok(())
    }

    pub fn verdict(&self, overall_score: f64) -> Verdict {
        if overall_score >= self.pass_threshold {
            Verdict::Pass
        } else if overall_score < self.review_threshold {
            Verdict::Fail
        } else {
            Verdict::NeedsReview
        }
    }
}

/// Weighted mean of criterion scores in rubric order, rounded to two decimals.
///
/// Falls back to the plain mean when every weight is zero. Criteria absent
/// from `scores` are ignored; the strict decoder guarantees they are present.
pub fn overall_score(scores: &BTreeMap<String, f64>, rubric: &Rubric) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut plain = 0.0;
    let mut count = 0usize;

    for criterion in &rubric.criteria {
        if let Some(score) = scores.get(&criterion.name) {
            weighted += score * criterion.weight;
            total_weight += criterion.weight;
            plain += score;
            count += 1;
        }
    }

    let mean = if total_weight > 0.0 {
        weighted / total_weight
    } else if count > 0 {
        plain / count as f64
    } else {
        0.0
    };

    (mean * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::Criterion;
    use proptest::prelude::*;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_equal_weights_is_mean() {
        let rubric = Rubric::default_v1();
        let s = scores(&[
            ("faithfulness", 9.0),
            ("completeness", 8.0),
            ("relevance", 8.0),
            ("clarity", 7.0),
        ]);
        assert_eq!(overall_score(&s, &rubric), 8.0);
    }

    #[test]
    fn test_weighted_mean_and_rounding() {
        let rubric = Rubric {
            version: "w".to_string(),
            criteria: vec![
                Criterion {
                    weight: 2.0,
                    ..Criterion::new("a", "")
                },
                Criterion::new("b", ""),
            ],
            scale_max: 10.0,
        };
        // (2*10 + 1*5) / 3 = 8.333...
        assert_eq!(overall_score(&scores(&[("a", 10.0), ("b", 5.0)]), &rubric), 8.33);
    }

    #[test]
    fn test_verdict_bands() {
        let bands = VerdictBands::default();
        assert_eq!(bands.verdict(7.0), Verdict::Pass);
        assert_eq!(bands.verdict(6.99), Verdict::NeedsReview);
        assert_eq!(bands.verdict(5.0), Verdict::NeedsReview);
        assert_eq!(bands.verdict(4.99), Verdict::Fail);
    }

    #[test]
    fn test_band_validation() {
        assert!(VerdictBands::default().validate(10.0).is_ok());
        let inverted = VerdictBands {
            pass_threshold: 4.0,
            review_threshold: 6.0,
        };
        assert!(inverted.validate(10.0).is_err());
        let out_of_scale = VerdictBands {
            pass_threshold: 12.0,
            review_threshold: 6.0,
        };
        assert!(out_of_scale.validate(10.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_overall_within_bounds_and_deterministic(
            values in proptest::collection::vec(0.0f64..=10.0, 4)
        ) {
            let rubric = Rubric::default_v1();
            let s: BTreeMap<String, f64> = rubric
                .criterion_names()
                .into_iter()
                .zip(values.iter().copied())
                .map(|(n, v)| (n.to_string(), v))
                .collect();

            let first = overall_score(&s, &rubric);
            let second = overall_score(&s, &rubric);
            prop_assert_eq!(first, second);

            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(first >= (min * 100.0).floor() / 100.0);
            prop_assert!(first <= (max * 100.0).ceil() / 100.0);

            let bands = VerdictBands::default();
            prop_assert_eq!(bands.verdict(first), bands.verdict(second));
        }
    }
}
