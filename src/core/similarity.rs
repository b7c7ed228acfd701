use thiserror::Error;

use crate::core::features::{FeatureVector, round_to_precision};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("Feature group '{group}' has mismatched lengths ({left} vs {right})")]
    LengthMismatch {
        group: String,
        left: usize,
        right: usize,
    },
}

/// Element-wise absolute difference averaged over the bins, rounded to 4 digits.
pub fn mean_absolute_difference(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let total: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    round_to_precision(total / a.len() as f64)
}

/// Similarity of two feature vectors, 1.0 meaning identical histograms.
///
/// Groups present in both vectors contribute their mean absolute difference; the
/// average over those groups is subtracted from 1. Vectors with no group in common
/// score 0.0.
pub fn score(a: &FeatureVector, b: &FeatureVector) -> Result<f64, ScoreError> {
    let mut total_difference = 0.0;
    let mut shared = 0usize;

    for (name, values_a) in a.groups() {
        let Some(values_b) = b.group(name) else {
            continue;
        };
        if values_a.len() != values_b.len() {
            return Err(ScoreError::LengthMismatch {
                group: name.to_string(),
                left: values_a.len(),
                right: values_b.len(),
            });
        }
        total_difference += mean_absolute_difference(values_a, values_b);
        shared += 1;
    }

    if shared == 0 {
        return Ok(0.0);
    }

    let average = round_to_precision(total_difference / shared as f64);
    Ok(round_to_precision(1.0 - average))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{COLOR_GROUP, EDGE_GROUP, FeatureExtractor};
    use crate::core::fixtures::{gradient_image, near_copy_of_gradient, solid_image};
    use image::DynamicImage;

    fn vector(groups: &[(&str, &[f64])]) -> FeatureVector {
        groups
            .iter()
            .map(|(name, values)| (name.to_string(), values.to_vec()))
            .collect()
    }

    fn sample_vectors() -> Vec<FeatureVector> {
        let extractor = FeatureExtractor::new(8, None);
        [
            gradient_image(32, 32),
            near_copy_of_gradient(32, 32),
            solid_image(32, 32, [250, 10, 10]),
            solid_image(20, 30, [0, 0, 0]),
        ]
        .into_iter()
        .map(|img| extractor.extract(&DynamicImage::ImageRgb8(img)).unwrap())
        .collect()
    }

    #[test]
    fn test_identical_vectors_score_one() {
        for features in sample_vectors() {
            assert_eq!(score(&features, &features).unwrap(), 1.0);
        }
    }

    #[test]
    fn test_score_is_symmetric_and_bounded() {
        let vectors = sample_vectors();
        for a in &vectors {
            for b in &vectors {
                let ab = score(a, b).unwrap();
                let ba = score(b, a).unwrap();
                assert_eq!(ab, ba);
                assert!((0.0..=1.0).contains(&ab), "score {ab} out of range");
            }
        }
    }

    #[test]
    fn test_opposite_histograms_score_zero() {
        let a = vector(&[(COLOR_GROUP, &[1.0, 0.0])]);
        let b = vector(&[(COLOR_GROUP, &[0.0, 1.0])]);
        assert_eq!(score(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_score_averages_groups() {
        let a = vector(&[
            (COLOR_GROUP, &[0.5, 0.5]),
            (EDGE_GROUP, &[1.0, 0.0, 0.0, 0.0]),
        ]);
        let b = vector(&[
            (COLOR_GROUP, &[0.5, 0.5]),
            (EDGE_GROUP, &[0.0, 1.0, 0.0, 0.0]),
        ]);
        // color differs by 0, edges by 2/4 = 0.5, average 0.25
        assert_eq!(score(&a, &b).unwrap(), 0.75);
    }

    #[test]
    fn test_no_shared_groups_scores_zero() {
        let a = vector(&[(COLOR_GROUP, &[1.0])]);
        let b = vector(&[(EDGE_GROUP, &[1.0])]);
        assert_eq!(score(&a, &b).unwrap(), 0.0);
        assert_eq!(score(&FeatureVector::new(), &FeatureVector::new()).unwrap(), 0.0);
    }

    #[test]
    fn test_only_shared_groups_count() {
        let a = vector(&[(COLOR_GROUP, &[0.2, 0.8]), (EDGE_GROUP, &[1.0])]);
        let b = vector(&[(COLOR_GROUP, &[0.2, 0.8])]);
        assert_eq!(score(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn test_mismatched_bins_fail() {
        let a = vector(&[(COLOR_GROUP, &[0.5, 0.5])]);
        let b = vector(&[(COLOR_GROUP, &[0.3, 0.3, 0.4])]);
        assert_eq!(
            score(&a, &b),
            Err(ScoreError::LengthMismatch {
                group: COLOR_GROUP.to_string(),
                left: 2,
                right: 3,
            })
        );
    }
}
