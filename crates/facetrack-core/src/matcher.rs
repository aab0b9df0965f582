//! Match engine: decides whether a probe encoding belongs to an enrolled employee.

use crate::registry::EncodingRegistry;
use crate::types::{EmployeeRecord, Encoding, MatchResult};

/// Minimum mean confidence required to accept a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a probe encoding against the enrolled registry.
pub trait Matcher {
    fn compare(&self, probe: &Encoding, registry: &EncodingRegistry) -> MatchResult;
}

/// Mean-confidence matcher.
///
/// Each employee is scored by the arithmetic mean of `1 - distance` over all
/// of their samples. The best score strictly above the threshold wins; on
/// equal scores the employee enrolled first is kept.
#[derive(Debug, Clone, Copy)]
pub struct MeanConfidenceMatcher {
    threshold: f32,
}

impl MeanConfidenceMatcher {
    /// Create a matcher. The threshold is clamped to [0, 1]; NaN falls back to the default.
    pub fn new(threshold: f32) -> Self {
        let threshold = if threshold.is_nan() {
            DEFAULT_MATCH_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for MeanConfidenceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for MeanConfidenceMatcher {
    fn compare(&self, probe: &Encoding, registry: &EncodingRegistry) -> MatchResult {
        if probe.is_empty() || !probe.is_finite() || registry.is_empty() {
            return MatchResult::no_match();
        }

        let mut best: Option<(&str, &EmployeeRecord)> = None;
        let mut best_confidence = 0.0f32;

        for (id, record) in registry.iter() {
            let Some(confidence) = mean_confidence(probe, record) else {
                continue;
            };
            // NaN never compares greater, so corrupt samples cannot win.
            if confidence > self.threshold && confidence > best_confidence {
                best = Some((id, record));
                best_confidence = confidence;
            }
        }

        match best {
            Some((id, record)) => {
                tracing::debug!(employee = id, confidence = best_confidence, "probe matched");
                MatchResult {
                    matched: true,
                    employee_id: Some(id.to_string()),
                    name: Some(record.name.clone()),
                    confidence: best_confidence,
                }
            }
            None => MatchResult::no_match(),
        }
    }
}

/// Match a probe against the registry with the given threshold.
pub fn match_encoding(probe: &Encoding, registry: &EncodingRegistry, threshold: f32) -> MatchResult {
    MeanConfidenceMatcher::new(threshold).compare(probe, registry)
}

/// Mean of `1 - distance` over the employee's non-empty samples.
fn mean_confidence(probe: &Encoding, record: &EmployeeRecord) -> Option<f32> {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for sample in record.encodings.iter().filter(|s| !s.is_empty()) {
        sum += probe.confidence(sample);
        count += 1;
    }
    (count > 0).then(|| sum / count as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(values: &[f32]) -> Encoding {
        Encoding::new(values.to_vec())
    }

    fn registry(entries: &[(&str, &[&[f32]])]) -> EncodingRegistry {
        EncodingRegistry::from_records(entries.iter().map(|(id, samples)| {
            (
                id.to_string(),
                EmployeeRecord::new(
                    format!("name-{id}"),
                    samples.iter().map(|s| enc(s)).collect(),
                ),
            )
        }))
    }

    #[test]
    fn test_empty_registry_never_matches() {
        let result = match_encoding(&enc(&[0.1, 0.2]), &EncodingRegistry::new(), 0.6);
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn test_identical_samples_match_with_full_confidence() {
        let probe: [f32; 3] = [0.3, -0.1, 0.7];
        let reg = registry(&[("1", &[&probe, &probe])]);
        let result = match_encoding(&enc(&probe), &reg, DEFAULT_MATCH_THRESHOLD);
        assert!(result.matched);
        assert_eq!(result.employee_id.as_deref(), Some("1"));
        assert_eq!(result.name.as_deref(), Some("name-1"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_best_of_two_above_threshold() {
        // Distances 0.1 and 0.3 give confidences 0.9 and 0.7.
        let reg = registry(&[("low", &[&[0.3]]), ("high", &[&[0.1]])]);
        let result = match_encoding(&enc(&[0.0]), &reg, 0.6);
        assert!(result.matched);
        assert_eq!(result.employee_id.as_deref(), Some("high"));
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_all_below_threshold() {
        // Confidences 0.55 and 0.50.
        let reg = registry(&[("a", &[&[0.45]]), ("b", &[&[0.5]])]);
        let result = match_encoding(&enc(&[0.0]), &reg, 0.6);
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let reg = registry(&[("a", &[&[0.5]])]);
        assert!(!match_encoding(&enc(&[0.0]), &reg, 0.5).matched);
        assert!(match_encoding(&enc(&[0.0]), &reg, 0.49).matched);
    }

    #[test]
    fn test_uses_mean_not_max() {
        // One perfect sample and one far sample: mean is 0.5, max would be 1.0.
        let reg = registry(&[("1", &[&[0.0], &[1.0]])]);
        let result = match_encoding(&enc(&[0.0]), &reg, 0.6);
        assert!(!result.matched);

        let result = match_encoding(&enc(&[0.0]), &reg, 0.4);
        assert!(result.matched);
        assert!((result.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_tie_keeps_first_enrolled() {
        let reg = registry(&[("first", &[&[0.2]]), ("second", &[&[-0.2]])]);
        let result = match_encoding(&enc(&[0.0]), &reg, 0.6);
        assert_eq!(result.employee_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_confidence_non_increasing_with_distance() {
        let probe = enc(&[0.0, 0.0]);
        let mut previous = f32::INFINITY;
        for step in 0..40 {
            let d = step as f32 * 0.01;
            let reg = registry(&[("1", &[&[d, 0.0], &[0.0, d]])]);
            let result = match_encoding(&probe, &reg, 0.0);
            let confidence = if result.matched { result.confidence } else { 0.0 };
            assert!(confidence <= previous, "step {step}: {confidence} > {previous}");
            previous = confidence;
        }
    }

    #[test]
    fn test_probe_truncated_to_registry_dimension() {
        let reg = registry(&[("1", &[&[0.1, 0.2]])]);
        let long_probe = enc(&[0.1, 0.2, 9.0, 9.0]);
        let result = match_encoding(&long_probe, &reg, 0.6);
        assert!(result.matched);
        assert_eq!(result.confidence, 1.0);

        let short_probe = enc(&[0.1]);
        let result = match_encoding(&short_probe, &reg, 0.6);
        assert!(result.matched);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_malformed_probe_does_not_match() {
        let reg = registry(&[("1", &[&[0.0, 0.0]])]);
        assert!(!match_encoding(&enc(&[]), &reg, 0.6).matched);
        assert!(!match_encoding(&enc(&[f32::NAN, 0.0]), &reg, 0.6).matched);
        assert!(!match_encoding(&enc(&[f32::INFINITY, 0.0]), &reg, 0.6).matched);
    }

    #[test]
    fn test_corrupt_samples_are_tolerated() {
        let reg = registry(&[
            ("empty", &[&[]]),
            ("nan", &[&[f32::NAN, 0.0]]),
            ("none", &[]),
            ("good", &[&[0.0, 0.1]]),
        ]);
        let result = match_encoding(&enc(&[0.0, 0.0]), &reg, 0.6);
        assert_eq!(result.employee_id.as_deref(), Some("good"));
    }

    #[test]
    fn test_compare_is_idempotent() {
        let reg = registry(&[("1", &[&[0.1, 0.1]]), ("2", &[&[0.05, 0.0]])]);
        let probe = enc(&[0.0, 0.0]);
        let matcher = MeanConfidenceMatcher::default();
        assert_eq!(matcher.compare(&probe, &reg), matcher.compare(&probe, &reg));
    }

    #[test]
    fn test_threshold_clamped() {
        assert_eq!(MeanConfidenceMatcher::new(-1.0).threshold(), 0.0);
        assert_eq!(MeanConfidenceMatcher::new(3.0).threshold(), 1.0);
        assert_eq!(MeanConfidenceMatcher::new(f32::NAN).threshold(), DEFAULT_MATCH_THRESHOLD);
    }
}
