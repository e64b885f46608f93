//! Locally synthesized classification for when the live path is off or fails.

use rand::Rng;

use crate::result::{Category, ClassificationResult};

/// Lower bound of the fallback confidence band.
pub const FALLBACK_CONFIDENCE_MIN: f64 = 0.3;
/// Upper bound of the fallback confidence band.
pub const FALLBACK_CONFIDENCE_MAX: f64 = 0.7;

/// Produce a random, non-authoritative classification.
///
/// Category is uniform over [`Category::ALL`]; confidence is uniform in
/// `[0.3, 0.7]` rounded to two decimals. Never touches the network.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> ClassificationResult {
    let category = Category::ALL[rng.random_range(0..Category::ALL.len())];
    let raw = rng.random_range(FALLBACK_CONFIDENCE_MIN..=FALLBACK_CONFIDENCE_MAX);
    let confidence = ((raw * 100.0).round() / 100.0)
        .clamp(FALLBACK_CONFIDENCE_MIN, FALLBACK_CONFIDENCE_MAX);

    ClassificationResult::fallback(
        category,
        format!("Random classification (fallback): {category}"),
        confidence,
    )
    .unwrap_or_else(|e| unreachable!("fallback band is always valid: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_output_within_band() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let result = generate(&mut rng);
            assert!(result.is_fallback());
            assert!((FALLBACK_CONFIDENCE_MIN..=FALLBACK_CONFIDENCE_MAX)
                .contains(&result.confidence()));
            let cents = result.confidence() * 100.0;
            assert!((cents - cents.round()).abs() < 1e-9, "not two decimals");
            assert_eq!(
                result.explanation(),
                format!("Random classification (fallback): {}", result.category())
            );
        }
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| generate(&mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| generate(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_covers_every_category() {
        let mut rng = StdRng::seed_from_u64(1);
        let seen: HashSet<Category> = (0..500).map(|_| generate(&mut rng).category()).collect();
        assert_eq!(seen.len(), Category::ALL.len());
    }
}
