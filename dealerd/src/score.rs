use crate::store::model::Status;

const EPSILON: f64 = 1e-9;
/// Number of checks over which confidence ramps up.
const SMOOTHING_CHECKS: f64 = 50.0;

/// Quality of one target in [0, 1], from its check history.
///
/// `max_uptime_override` replaces the status's own streak ceiling, which
/// lets a ranking compare members against a shared ceiling.
pub fn score(status: &Status, max_uptime_override: Option<f64>) -> f64 {
    let failed_tests = status.failed_tests as f64;
    let test_no = status.test_no as f64;
    let uptime = status.uptime as f64;
    let max_uptime = max_uptime_override
        .unwrap_or(status.max_uptime as f64)
        .max(0.0);

    let uptime_ratio = if max_uptime > 0.0 {
        (uptime / max_uptime).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let test_factor = 1.0 - failed_tests / (test_no + EPSILON);
    let smoothing = 1.0 - (-test_no / SMOOTHING_CHECKS).exp();

    let score = test_factor * (0.5 * uptime_ratio + 0.5) * smoothing;
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::TableType;

    fn status(test_no: u64, failed_tests: u64, uptime: u64, max_uptime: u64) -> Status {
        Status {
            test_no,
            failed_tests,
            uptime,
            max_uptime,
            ..Status::new(1, 1, TableType::Services, 0)
        }
    }

    #[test]
    fn test_untested_scores_zero() {
        assert_eq!(score(&status(0, 0, 0, 0), None), 0.0);
    }

    #[test]
    fn test_all_failures_score_zero() {
        assert!(score(&status(20, 20, 0, 0), None).abs() < 1e-6);
    }

    #[test]
    fn test_known_value() {
        // Half the checks failed, streak at half its best.
        let s = status(50, 25, 100, 200);
        let expected = 0.5 * 0.75 * (1.0 - (-1.0f64).exp());
        assert!((score(&s, None) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_zero_ceiling_gives_no_uptime_credit() {
        let perfect = score(&status(100, 0, 10, 10), None);
        let unmeasured = score(&status(100, 0, 0, 0), None);
        assert!((unmeasured * 2.0 - (1.0 - (-2.0f64).exp())).abs() < 1e-6);
        assert!(perfect > unmeasured);
    }

    #[test]
    fn test_more_history_more_confidence() {
        let few = score(&status(5, 0, 50, 50), None);
        let many = score(&status(200, 0, 50, 50), None);
        assert!(few < many);
        assert!(many <= 1.0);
    }

    #[test]
    fn test_override_ceiling() {
        let s = status(100, 0, 50, 50);
        assert!(score(&s, Some(100.0)) < score(&s, None));
        // Ratio never exceeds one, and a negative ceiling counts as none.
        assert_eq!(score(&s, Some(10.0)), score(&s, None));
        assert_eq!(score(&s, Some(-5.0)), score(&status(100, 0, 0, 0), None));
    }
}
