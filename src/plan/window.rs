//! Bounded slice of the plan around the athlete's position

use serde::Serialize;

use crate::error::PlanError;
use crate::models::PacingPlan;

/// Points taken on each side of the athlete's position
pub const DEFAULT_HALF_WINDOW: usize = 50;

/// Index-aligned power and distance slices of the active plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayWindow {
    /// Index of the first point within the plan
    pub start: usize,
    pub power: Vec<f64>,
    pub distance: Vec<f64>,
}

impl DisplayWindow {
    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }
}

/// Extract the plan window centred on `distance`
///
/// The window covers `[idx - half, idx + half)` clamped to the plan,
/// where `idx` is the first point at or beyond `distance`. Returns
/// `Ok(None)` once `distance` reaches the end of the plan so callers stop
/// drawing the target trace. A `half` of zero is rejected, since it would
/// yield an empty window before the end of the plan.
pub fn window_around(
    plan: &PacingPlan,
    distance: f64,
    half: usize,
) -> Result<Option<DisplayWindow>, PlanError> {
    if half == 0 {
        return Err(PlanError::EmptyWindow);
    }
    let max = plan.max_distance().ok_or(PlanError::EmptyPlan)?;
    if distance >= max {
        return Ok(None);
    }

    let n = plan.len();
    let idx = plan.distance().partition_point(|&d| d < distance);
    let start = idx.saturating_sub(half);
    let end = idx.saturating_add(half).min(n);

    Ok(Some(DisplayWindow {
        start,
        power: plan.power()[start..end].to_vec(),
        distance: plan.distance()[start..end].to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn linear_plan(n: usize) -> PacingPlan {
        let distance = (0..n).map(|i| i as f64 * 10.0).collect();
        let power = (0..n).map(|i| 200.0 + i as f64).collect();
        PacingPlan::new(distance, power, None).unwrap()
    }

    #[test]
    fn test_window_in_the_middle() {
        let plan = linear_plan(1000);
        let window = window_around(&plan, 5000.0, 50).unwrap().unwrap();

        assert_eq!(window.start, 450);
        assert_eq!(window.len(), 100);
        assert_eq!(window.distance[0], 4500.0);
        assert_eq!(window.power[50], 700.0);
    }

    #[test]
    fn test_window_clamped_at_start() {
        let plan = linear_plan(1000);
        let window = window_around(&plan, 105.0, 50).unwrap().unwrap();

        assert_eq!(window.start, 0);
        // lower bound of 105.0 is index 11
        assert_eq!(window.len(), 61);
    }

    #[test]
    fn test_window_clamped_at_end() {
        let plan = linear_plan(1000);
        let window = window_around(&plan, 9985.0, 50).unwrap().unwrap();

        assert_eq!(window.start, 949);
        assert_eq!(window.len(), 51);
        assert_eq!(*window.distance.last().unwrap(), 9990.0);
    }

    #[test]
    fn test_end_of_plan() {
        let plan = linear_plan(10);
        assert!(window_around(&plan, 90.0, 50).unwrap().is_none());
        assert!(window_around(&plan, 1e9, 50).unwrap().is_none());
    }

    #[test]
    fn test_zero_half_is_rejected() {
        let plan = linear_plan(3);
        assert_eq!(
            window_around(&plan, 5.0, 0).unwrap_err(),
            PlanError::EmptyWindow
        );
        // Past the end still errors rather than reporting no window
        assert_eq!(
            window_around(&plan, 100.0, 0).unwrap_err(),
            PlanError::EmptyWindow
        );

        let window = window_around(&plan, 5.0, 1).unwrap().unwrap();
        assert_eq!(window.start, 0);
        assert_eq!(window.distance, vec![0.0, 10.0]);
    }

    #[test]
    fn test_empty_plan() {
        let plan = PacingPlan::new(vec![], vec![], None).unwrap();
        assert_eq!(
            window_around(&plan, 0.0, 50).unwrap_err(),
            PlanError::EmptyPlan
        );
    }

    proptest! {
        #[test]
        fn test_window_shape(
            n in 1usize..400,
            half in 1usize..80,
            query in -100.0f64..5000.0
        ) {
            let plan = linear_plan(n);
            let max = plan.max_distance().unwrap();

            match window_around(&plan, query, half).unwrap() {
                Some(window) => {
                    prop_assert!(query < max);
                    prop_assert_eq!(window.power.len(), window.distance.len());
                    prop_assert!(window.len() <= 2 * half);
                    prop_assert!(window.len() <= n);
                    prop_assert!(!window.is_empty());
                    prop_assert_eq!(&window.power[..], &plan.power()[window.start..window.start + window.len()]);
                }
                None => prop_assert!(query >= max),
            }
        }
    }
}
