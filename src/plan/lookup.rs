//! Nearest-distance lookup of plan targets
//!
//! Lookups run once per telemetry tick against plans with thousands of
//! points, so they binary search the sorted distance series.

use crate::error::PlanError;
use crate::models::PacingPlan;

/// Index of the plan point whose distance is closest to `query`
///
/// Equidistant neighbours resolve to the lower index, and a repeated
/// distance resolves to its first point. Queries before the first or
/// past the last point clamp to that endpoint.
pub fn nearest_index(distance: &[f64], query: f64) -> Result<usize, PlanError> {
    let n = distance.len();
    if n == 0 {
        return Err(PlanError::EmptyPlan);
    }

    // First index with distance >= query
    let hi = distance.partition_point(|&d| d < query);
    if hi == 0 {
        return Ok(0);
    }
    if hi == n {
        let last = distance[n - 1];
        return Ok(distance.partition_point(|&d| d < last));
    }
    if distance[hi] == query {
        return Ok(hi);
    }

    let lo = hi - 1;
    if (distance[hi] - query).abs() < (query - distance[lo]).abs() {
        Ok(hi)
    } else {
        // Step back over repeats of the lower neighbour
        let value = distance[lo];
        Ok(distance[..lo].partition_point(|&d| d < value))
    }
}

/// Target power at the plan point nearest to `distance`
pub fn target_power(plan: &PacingPlan, distance: f64) -> Result<f64, PlanError> {
    let index = nearest_index(plan.distance(), distance)?;
    Ok(plan.power()[index])
}

/// Target W′ balance at the plan point nearest to `distance`
pub fn target_w_bal(plan: &PacingPlan, distance: f64) -> Result<f64, PlanError> {
    let w_bal = plan
        .w_bal()
        .ok_or(PlanError::MissingSeries { series: "wBal" })?;
    let index = nearest_index(plan.distance(), distance)?;
    Ok(w_bal[index])
}
