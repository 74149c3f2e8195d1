use serde::{Deserialize, Serialize};

/// Errors that can occur during zone classification
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoneError {
    #[error("Invalid threshold value: {0}")]
    InvalidThreshold(String),
}

/// RGB color used to style a plan segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ZoneColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// CSS style `#rrggbb`
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Power zones as ratios of FTP
///
/// - Z1: < 55% FTP (Active Recovery)
/// - Z2: 55-74% FTP (Endurance)
/// - Z3: 75-89% FTP (Tempo)
/// - Z4: 90-104% FTP (Threshold)
/// - Z5: 105-119% FTP (VO2 Max)
/// - Z6: >= 120% FTP (Anaerobic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerZone {
    Z1,
    Z2,
    Z3,
    Z4,
    Z5,
    Z6,
}

impl PowerZone {
    /// Zones in ascending order of their lower bound
    pub const ALL: [PowerZone; 6] = [
        PowerZone::Z1,
        PowerZone::Z2,
        PowerZone::Z3,
        PowerZone::Z4,
        PowerZone::Z5,
        PowerZone::Z6,
    ];

    /// Inclusive lower bound as a ratio of FTP
    pub fn from(&self) -> f64 {
        match self {
            PowerZone::Z1 => 0.0,
            PowerZone::Z2 => 0.55,
            PowerZone::Z3 => 0.75,
            PowerZone::Z4 => 0.90,
            PowerZone::Z5 => 1.05,
            PowerZone::Z6 => 1.20,
        }
    }

    /// Exclusive upper bound as a ratio of FTP, `None` when unbounded
    pub fn to(&self) -> Option<f64> {
        match self {
            PowerZone::Z1 => Some(0.55),
            PowerZone::Z2 => Some(0.75),
            PowerZone::Z3 => Some(0.90),
            PowerZone::Z4 => Some(1.05),
            PowerZone::Z5 => Some(1.20),
            PowerZone::Z6 => None,
        }
    }

    pub fn contains(&self, ratio: f64) -> bool {
        ratio >= self.from() && self.to().map_or(true, |to| ratio < to)
    }

    pub fn number(&self) -> u8 {
        match self {
            PowerZone::Z1 => 1,
            PowerZone::Z2 => 2,
            PowerZone::Z3 => 3,
            PowerZone::Z4 => 4,
            PowerZone::Z5 => 5,
            PowerZone::Z6 => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PowerZone::Z1 => "Active Recovery",
            PowerZone::Z2 => "Endurance",
            PowerZone::Z3 => "Tempo",
            PowerZone::Z4 => "Threshold",
            PowerZone::Z5 => "VO2 Max",
            PowerZone::Z6 => "Anaerobic",
        }
    }

    pub fn color(&self) -> ZoneColor {
        POWER_ZONE_COLORS[self.number() as usize - 1]
    }
}

impl std::fmt::Display for PowerZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Z{}", self.number())
    }
}

/// Display colors, indexed by zone number - 1
pub const POWER_ZONE_COLORS: [ZoneColor; 6] = [
    ZoneColor::new(128, 128, 128), // Z1: Gray
    ZoneColor::new(0, 128, 255),   // Z2: Blue
    ZoneColor::new(0, 200, 100),   // Z3: Green
    ZoneColor::new(255, 200, 0),   // Z4: Yellow
    ZoneColor::new(255, 128, 0),   // Z5: Orange
    ZoneColor::new(255, 50, 50),   // Z6: Red
];

/// Zone classification for plan windows
pub struct ZoneClassifier;

impl ZoneClassifier {
    /// Zone whose `[from, to)` interval contains `ratio`
    ///
    /// Ratios outside every interval (negative power) resolve to the
    /// zone with the nearest lower bound.
    pub fn zone_for_ratio(ratio: f64) -> PowerZone {
        if let Some(zone) = PowerZone::ALL.iter().find(|zone| zone.contains(ratio)) {
            return *zone;
        }

        PowerZone::ALL
            .iter()
            .copied()
            .min_by(|a, b| {
                (ratio - a.from())
                    .abs()
                    .total_cmp(&(ratio - b.from()).abs())
            })
            .unwrap_or(PowerZone::Z1)
    }

    /// One zone per power value
    pub fn classify_zones(power: &[f64], ftp: f64) -> Result<Vec<PowerZone>, ZoneError> {
        Self::validate_ftp(ftp)?;
        Ok(power
            .iter()
            .map(|watts| Self::zone_for_ratio(watts / ftp))
            .collect())
    }

    /// One display color per power value
    pub fn classify(power: &[f64], ftp: f64) -> Result<Vec<ZoneColor>, ZoneError> {
        Ok(Self::classify_zones(power, ftp)?
            .iter()
            .map(PowerZone::color)
            .collect())
    }

    fn validate_ftp(ftp: f64) -> Result<(), ZoneError> {
        if !ftp.is_finite() || ftp <= 0.0 {
            return Err(ZoneError::InvalidThreshold(format!(
                "FTP must be a positive number of watts, got {}",
                ftp
            )));
        }
        Ok(())
    }
}
