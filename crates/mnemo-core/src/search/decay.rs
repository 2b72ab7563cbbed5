//! Temporal-decay ranking

use crate::types::Observation;

/// Half-life for importance 5
pub const BASE_HALF_LIFE_DAYS: f64 = 90.0;

/// Half-life in days: 18 at importance 1, 180 at importance 10.
pub fn half_life_days(importance: i64) -> f64 {
    BASE_HALF_LIFE_DAYS * (importance.clamp(1, 10) as f64 / 5.0)
}

/// `exp(-ln 2 / half_life * age) * (1 + ln(1 + accesses) * 0.1)`, scaled by
/// 0.1 for stale observations.
pub fn decay_score(importance: i64, age_days: f64, access_count: i64, is_stale: bool) -> f64 {
    let decay = (-std::f64::consts::LN_2 / half_life_days(importance) * age_days.max(0.0)).exp();
    let access_boost = 1.0 + (1.0 + access_count.max(0) as f64).ln() * 0.1;
    let staleness = if is_stale { 0.1 } else { 1.0 };
    decay * access_boost * staleness
}

/// Decay score of an observation at `now_ms`.
pub fn observation_score(observation: &Observation, now_ms: i64) -> f64 {
    decay_score(
        observation.importance,
        observation.age_days(now_ms),
        observation.access_count,
        observation.is_stale,
    )
}

/// Sort by decay score, highest first. Equal scores keep input order.
pub fn rank_by_decay(observations: Vec<Observation>, now_ms: i64) -> Vec<(Observation, f64)> {
    let mut scored: Vec<(Observation, f64)> = observations
        .into_iter()
        .map(|o| {
            let score = observation_score(&o, now_ms);
            (o, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_life_range() {
        assert_eq!(half_life_days(1), 18.0);
        assert_eq!(half_life_days(5), 90.0);
        assert_eq!(half_life_days(10), 180.0);
        assert_eq!(half_life_days(0), 18.0);
        assert_eq!(half_life_days(99), 180.0);
    }

    #[test]
    fn test_half_life_halves_score() {
        let fresh = decay_score(5, 0.0, 0, false);
        let half = decay_score(5, 90.0, 0, false);
        assert!((fresh - 1.0).abs() < 1e-12);
        assert!((half - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_older_scores_strictly_lower() {
        for importance in [1, 5, 10] {
            for accesses in [0, 3, 100] {
                let newer = decay_score(importance, 10.0, accesses, false);
                let older = decay_score(importance, 10.5, accesses, false);
                assert!(older < newer);
            }
        }
    }

    #[test]
    fn test_access_and_staleness() {
        assert!(decay_score(5, 10.0, 5, false) > decay_score(5, 10.0, 0, false));
        let stale = decay_score(5, 10.0, 0, true);
        let live = decay_score(5, 10.0, 0, false);
        assert!((stale - live * 0.1).abs() < 1e-12);
    }
}
