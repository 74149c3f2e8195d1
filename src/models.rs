use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::error::{PlanError, TelemetryError};

/// Athlete identifier as reported by the telemetry collaborator
pub type AthleteId = u64;

/// Routes known to the optimisation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    MechIsleLoop,
    HillyRoute,
    CobbledClimbs,
    ParkPerimeterLoop,
    DowntownTitans,
    TwoBridgesLoop,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::MechIsleLoop => write!(f, "Mech Isle Loop"),
            Route::HillyRoute => write!(f, "Hilly Route"),
            Route::CobbledClimbs => write!(f, "Cobbled Climbs"),
            Route::ParkPerimeterLoop => write!(f, "Park Perimeter Loop"),
            Route::DowntownTitans => write!(f, "Downtown Titans"),
            Route::TwoBridgesLoop => write!(f, "Two Bridges Loop"),
        }
    }
}

/// Integration scheme the optimiser uses for the rider dynamics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    Euler,
    #[serde(rename = "RK4")]
    Rk4,
    Midpoint,
}

/// Plan document as published by the optimisation service
///
/// Kept verbatim so a refresh can be deep-compared against the last
/// accepted document before anything is rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPlan {
    pub distance: Vec<f64>,
    pub power: Vec<f64>,
    #[serde(
        default,
        rename = "wBal",
        alias = "w_bal",
        skip_serializing_if = "Option::is_none"
    )]
    pub w_bal: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Vec<f64>>,
}

/// Validated pacing plan
///
/// `distance` is sorted ascending and every series has the same length.
/// Plans are never mutated in place; a refresh builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacingPlan {
    distance: Vec<f64>,
    power: Vec<f64>,
    w_bal: Option<Vec<f64>>,
}

impl PacingPlan {
    /// Build a plan, rejecting mismatched, unsorted or non-finite series
    pub fn new(
        distance: Vec<f64>,
        power: Vec<f64>,
        w_bal: Option<Vec<f64>>,
    ) -> Result<Self, PlanError> {
        Self::check_series("distance", &distance)?;
        Self::check_series("power", &power)?;

        if power.len() != distance.len() {
            return Err(PlanError::LengthMismatch {
                series: "power",
                distance: distance.len(),
                actual: power.len(),
            });
        }

        if let Some(w_bal) = &w_bal {
            Self::check_series("wBal", w_bal)?;
            if w_bal.len() != distance.len() {
                return Err(PlanError::LengthMismatch {
                    series: "wBal",
                    distance: distance.len(),
                    actual: w_bal.len(),
                });
            }
        }

        if let Some(index) = distance.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(PlanError::Unsorted {
                index: index + 1,
                previous: distance[index],
                current: distance[index + 1],
            });
        }

        Ok(Self {
            distance,
            power,
            w_bal,
        })
    }

    /// Build a plan from a raw document, adding `offset` to every distance
    pub fn from_raw(raw: &RawPlan, offset: f64) -> Result<Self, PlanError> {
        let distance = raw.distance.iter().map(|d| d + offset).collect();
        Self::new(distance, raw.power.clone(), raw.w_bal.clone())
    }

    fn check_series(series: &'static str, values: &[f64]) -> Result<(), PlanError> {
        match values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(PlanError::NonFinite { series, index }),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn distance(&self) -> &[f64] {
        &self.distance
    }

    pub fn power(&self) -> &[f64] {
        &self.power
    }

    pub fn w_bal(&self) -> Option<&[f64]> {
        self.w_bal.as_deref()
    }

    /// Last (largest) plan distance
    pub fn max_distance(&self) -> Option<f64> {
        self.distance.last().copied()
    }
}

/// One tick of athlete state, validated at the boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub athlete_id: AthleteId,
    pub ftp: f64,
    pub distance: f64,
    pub power: f64,
    pub speed: f64,
    pub w_bal: f64,
}

impl TelemetrySample {
    pub fn new(
        athlete_id: AthleteId,
        ftp: f64,
        distance: f64,
        power: f64,
        speed: f64,
        w_bal: f64,
    ) -> Result<Self, TelemetryError> {
        let sample = Self {
            athlete_id,
            ftp,
            distance,
            power,
            speed,
            w_bal,
        };
        sample.validate()?;
        Ok(sample)
    }

    fn validate(&self) -> Result<(), TelemetryError> {
        let fields = [
            ("ftp", self.ftp),
            ("distance", self.distance),
            ("power", self.power),
            ("speed", self.speed),
            ("wBal", self.w_bal),
        ];
        if let Some(&(field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TelemetryError::NonFinite { field });
        }

        if self.ftp <= 0.0 {
            return Err(TelemetryError::InvalidFtp { ftp: self.ftp });
        }
        for (field, value) in [
            ("distance", self.distance),
            ("power", self.power),
            ("speed", self.speed),
        ] {
            if value < 0.0 {
                return Err(TelemetryError::OutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Telemetry event as pushed by the game connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTelemetry {
    pub athlete_id: Option<AthleteId>,
    pub athlete: Option<RawAthlete>,
    pub state: Option<RawState>,
    pub w_bal: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAthlete {
    pub ftp: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawState {
    pub distance: Option<f64>,
    pub power: Option<f64>,
    pub speed: Option<f64>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, TelemetryError> {
    value.ok_or_else(|| TelemetryError::Malformed {
        reason: format!("missing field {}", field),
    })
}

impl TryFrom<RawTelemetry> for TelemetrySample {
    type Error = TelemetryError;

    fn try_from(raw: RawTelemetry) -> Result<Self, Self::Error> {
        let athlete_id = required(raw.athlete_id, "athleteId")?;
        let ftp = required(raw.athlete.and_then(|a| a.ftp), "athlete.ftp")?;
        let state = required(raw.state, "state")?;

        TelemetrySample::new(
            athlete_id,
            ftp,
            required(state.distance, "state.distance")?,
            required(state.power, "state.power")?,
            required(state.speed, "state.speed")?,
            required(raw.w_bal, "wBal")?,
        )
    }
}
