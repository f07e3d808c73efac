//! Static domain catalog
//!
//! Play levels, threshold cohorts, force-plate test types and the metrics
//! tracked for each of them. Everything here is fixed at compile time; the
//! `metric_definitions` table is populated from [`Metric::ALL`] on startup.

use crate::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Competitive tier used to segment reference populations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlayLevel {
    Youth,
    HighSchool,
    College,
    Pro,
}

impl PlayLevel {
    pub const ALL: [PlayLevel; 4] = [
        PlayLevel::Youth,
        PlayLevel::HighSchool,
        PlayLevel::College,
        PlayLevel::Pro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayLevel::Youth => "Youth",
            PlayLevel::HighSchool => "High School",
            PlayLevel::College => "College",
            PlayLevel::Pro => "Pro",
        }
    }

    /// Parse the spellings found in vendor exports and seed files
    ///
    /// Accepts the canonical names plus `HS` and `Professional`.
    pub fn normalize(raw: &str) -> Option<PlayLevel> {
        match raw.trim() {
            "Youth" => Some(PlayLevel::Youth),
            "High School" | "HS" => Some(PlayLevel::HighSchool),
            "College" => Some(PlayLevel::College),
            "Pro" | "Professional" => Some(PlayLevel::Pro),
            _ => None,
        }
    }
}

impl fmt::Display for PlayLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayLevel::normalize(s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown play level: {}", s)))
    }
}

/// Population a threshold table is built from
///
/// Either a single play level or the pooled `Overall` population, which is
/// built from the raw values of every level rather than from the per-level
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cohort {
    Level(PlayLevel),
    Overall,
}

impl Cohort {
    pub const ALL: [Cohort; 5] = [
        Cohort::Level(PlayLevel::Youth),
        Cohort::Level(PlayLevel::HighSchool),
        Cohort::Level(PlayLevel::College),
        Cohort::Level(PlayLevel::Pro),
        Cohort::Overall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Level(level) => level.as_str(),
            Cohort::Overall => "Overall",
        }
    }

    /// Cohorts whose population includes values recorded at `level`
    pub fn containing(level: PlayLevel) -> [Cohort; 2] {
        [Cohort::Level(level), Cohort::Overall]
    }
}

impl From<PlayLevel> for Cohort {
    fn from(level: PlayLevel) -> Self {
        Cohort::Level(level)
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cohort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "Overall" {
            return Ok(Cohort::Overall);
        }
        s.parse::<PlayLevel>().map(Cohort::Level)
    }
}

/// Force-plate test protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestType {
    /// Countermovement jump
    Cmj,
    /// Squat jump
    Sj,
    /// Hop test
    Hj,
    /// Prone push-up
    Ppu,
    /// Isometric mid-thigh pull
    Imtp,
}

impl TestType {
    pub const ALL: [TestType; 5] = [
        TestType::Cmj,
        TestType::Sj,
        TestType::Hj,
        TestType::Ppu,
        TestType::Imtp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Cmj => "CMJ",
            TestType::Sj => "SJ",
            TestType::Hj => "HJ",
            TestType::Ppu => "PPU",
            TestType::Imtp => "IMTP",
        }
    }

    /// Metrics a test of this type must carry to count as qualifying
    pub fn metrics(&self) -> &'static [Metric] {
        match self {
            TestType::Cmj => &[Metric::CmjPeakPower, Metric::CmjPeakPowerBm],
            TestType::Sj => &[Metric::SjPeakPower, Metric::SjPeakPowerBm],
            TestType::Hj => &[Metric::HjRsi],
            TestType::Ppu => &[Metric::PpuPeakTakeoffForce],
            TestType::Imtp => &[Metric::ImtpNetPeakForce, Metric::ImtpRelativeStrength],
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CMJ" => Ok(TestType::Cmj),
            "SJ" => Ok(TestType::Sj),
            "HJ" | "HT" => Ok(TestType::Hj),
            "PPU" | "PP" => Ok(TestType::Ppu),
            "IMTP" => Ok(TestType::Imtp),
            other => Err(Error::InvalidInput(format!("Unknown test type: {}", other))),
        }
    }
}

/// A ranked metric
///
/// Each metric belongs to exactly one test type, so a `Metric` identifies a
/// (test type, metric name) pair on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    CmjPeakPower,
    CmjPeakPowerBm,
    SjPeakPower,
    SjPeakPowerBm,
    HjRsi,
    PpuPeakTakeoffForce,
    ImtpNetPeakForce,
    ImtpRelativeStrength,
}

/// Immutable description of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDefinition {
    pub name: &'static str,
    pub test_type: TestType,
    pub display_name: &'static str,
    pub unit: &'static str,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::CmjPeakPower,
        Metric::CmjPeakPowerBm,
        Metric::SjPeakPower,
        Metric::SjPeakPowerBm,
        Metric::HjRsi,
        Metric::PpuPeakTakeoffForce,
        Metric::ImtpNetPeakForce,
        Metric::ImtpRelativeStrength,
    ];

    /// Threshold table key
    pub fn key(&self) -> &'static str {
        self.definition().name
    }

    pub fn test_type(&self) -> TestType {
        self.definition().test_type
    }

    pub fn display_name(&self) -> &'static str {
        self.definition().display_name
    }

    pub fn definition(&self) -> MetricDefinition {
        let (name, test_type, display_name, unit) = match self {
            Metric::CmjPeakPower => (
                "peak_takeoff_power_trial_value",
                TestType::Cmj,
                "Peak Power (W)",
                "W",
            ),
            Metric::CmjPeakPowerBm => (
                "bodymass_relative_takeoff_power_trial_value",
                TestType::Cmj,
                "Peak Power / BM (W/kg)",
                "W/kg",
            ),
            Metric::SjPeakPower => (
                "sj_peak_takeoff_power_trial_value",
                TestType::Sj,
                "Peak Power (W)",
                "W",
            ),
            Metric::SjPeakPowerBm => (
                "sj_bodymass_relative_takeoff_power_trial_value",
                TestType::Sj,
                "Peak Power / BM (W/kg)",
                "W/kg",
            ),
            Metric::HjRsi => (
                "hop_mean_rsi_trial_value",
                TestType::Hj,
                "Reactive Strength Index",
                "ratio",
            ),
            Metric::PpuPeakTakeoffForce => (
                "ppu_peak_takeoff_force_trial_value",
                TestType::Ppu,
                "Peak Takeoff Force (N)",
                "N",
            ),
            Metric::ImtpNetPeakForce => (
                "net_peak_vertical_force_trial_value",
                TestType::Imtp,
                "Net Peak Force (N)",
                "N",
            ),
            Metric::ImtpRelativeStrength => (
                "relative_strength_trial_value",
                TestType::Imtp,
                "Relative Strength",
                "ratio",
            ),
        };
        MetricDefinition { name, test_type, display_name, unit }
    }

    /// Look up a metric by its threshold key
    pub fn from_key(key: &str) -> Option<Metric> {
        Metric::ALL.iter().copied().find(|m| m.key() == key)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::from_key(s.trim())
            .ok_or_else(|| Error::InvalidInput(format!("Unknown metric: {}", s)))
    }
}

/// Vendor export field names, keyed by test type
///
/// The vendor reuses field names across protocols (SJ and CMJ both report
/// `peak_takeoff_power_trial_value`), so the test type disambiguates.
const FIELD_MAP: &[(TestType, &str, Metric)] = &[
    (TestType::Cmj, "peak_takeoff_power_trial_value", Metric::CmjPeakPower),
    (TestType::Cmj, "bodymass_relative_takeoff_power_trial_value", Metric::CmjPeakPowerBm),
    (TestType::Sj, "peak_takeoff_power_trial_value", Metric::SjPeakPower),
    (TestType::Sj, "bodymass_relative_takeoff_power_trial_value", Metric::SjPeakPowerBm),
    (TestType::Hj, "hop_mean_rsi_trial_value", Metric::HjRsi),
    (TestType::Hj, "rsi_trial_value", Metric::HjRsi),
    (TestType::Ppu, "peak_takeoff_force_trial_value", Metric::PpuPeakTakeoffForce),
    (TestType::Imtp, "net_peak_vertical_force_trial_value", Metric::ImtpNetPeakForce),
    (TestType::Imtp, "relative_strength_trial_value", Metric::ImtpRelativeStrength),
];

/// Resolve an ingestion field name to a tracked metric
///
/// Returns `None` for fields that are not ranked. Threshold keys are accepted
/// verbatim as long as they belong to `test_type`.
pub fn resolve_field(test_type: TestType, field: &str) -> Option<Metric> {
    FIELD_MAP
        .iter()
        .find(|(tt, name, _)| *tt == test_type && *name == field)
        .map(|(_, _, metric)| *metric)
        .or_else(|| Metric::from_key(field).filter(|m| m.test_type() == test_type))
}

/// The six components of the overall force profile
pub const COMPOSITE_COMPONENTS: [Metric; 6] = [
    Metric::SjPeakPower,
    Metric::SjPeakPowerBm,
    Metric::HjRsi,
    Metric::PpuPeakTakeoffForce,
    Metric::ImtpNetPeakForce,
    Metric::ImtpRelativeStrength,
];

/// Ranked values of one test, with a fixed field set per protocol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test_type", rename_all = "UPPERCASE")]
pub enum TestMetrics {
    Cmj { peak_power: Option<f64>, peak_power_bm: Option<f64> },
    Sj { peak_power: Option<f64>, peak_power_bm: Option<f64> },
    Hj { rsi: Option<f64> },
    Ppu { peak_takeoff_force: Option<f64> },
    Imtp { net_peak_force: Option<f64>, relative_strength: Option<f64> },
}

impl TestMetrics {
    pub fn empty(test_type: TestType) -> Self {
        match test_type {
            TestType::Cmj => TestMetrics::Cmj { peak_power: None, peak_power_bm: None },
            TestType::Sj => TestMetrics::Sj { peak_power: None, peak_power_bm: None },
            TestType::Hj => TestMetrics::Hj { rsi: None },
            TestType::Ppu => TestMetrics::Ppu { peak_takeoff_force: None },
            TestType::Imtp => TestMetrics::Imtp { net_peak_force: None, relative_strength: None },
        }
    }

    pub fn test_type(&self) -> TestType {
        match self {
            TestMetrics::Cmj { .. } => TestType::Cmj,
            TestMetrics::Sj { .. } => TestType::Sj,
            TestMetrics::Hj { .. } => TestType::Hj,
            TestMetrics::Ppu { .. } => TestType::Ppu,
            TestMetrics::Imtp { .. } => TestType::Imtp,
        }
    }

    fn slot(&mut self, metric: Metric) -> Option<&mut Option<f64>> {
        match (self, metric) {
            (TestMetrics::Cmj { peak_power, .. }, Metric::CmjPeakPower) => Some(peak_power),
            (TestMetrics::Cmj { peak_power_bm, .. }, Metric::CmjPeakPowerBm) => Some(peak_power_bm),
            (TestMetrics::Sj { peak_power, .. }, Metric::SjPeakPower) => Some(peak_power),
            (TestMetrics::Sj { peak_power_bm, .. }, Metric::SjPeakPowerBm) => Some(peak_power_bm),
            (TestMetrics::Hj { rsi }, Metric::HjRsi) => Some(rsi),
            (TestMetrics::Ppu { peak_takeoff_force }, Metric::PpuPeakTakeoffForce) => {
                Some(peak_takeoff_force)
            }
            (TestMetrics::Imtp { net_peak_force, .. }, Metric::ImtpNetPeakForce) => {
                Some(net_peak_force)
            }
            (TestMetrics::Imtp { relative_strength, .. }, Metric::ImtpRelativeStrength) => {
                Some(relative_strength)
            }
            _ => None,
        }
    }

    /// Store a value; returns false when `metric` is not part of this protocol
    pub fn set(&mut self, metric: Metric, value: f64) -> bool {
        match self.slot(metric) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        let mut copy = *self;
        copy.slot(metric).and_then(|slot| *slot)
    }

    /// Present values in catalog order
    pub fn values(&self) -> Vec<(Metric, f64)> {
        self.test_type()
            .metrics()
            .iter()
            .filter_map(|m| self.get(*m).map(|v| (*m, v)))
            .collect()
    }

    /// True when every metric of the protocol is present
    pub fn is_complete(&self) -> bool {
        self.test_type().metrics().iter().all(|m| self.get(*m).is_some())
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(PlayLevel);
string_serde!(Cohort);
string_serde!(Metric);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_level_normalization() {
        assert_eq!(PlayLevel::normalize("HS"), Some(PlayLevel::HighSchool));
        assert_eq!(PlayLevel::normalize(" High School "), Some(PlayLevel::HighSchool));
        assert_eq!(PlayLevel::normalize("Professional"), Some(PlayLevel::Pro));
        assert_eq!(PlayLevel::normalize("Masters"), None);
        assert!("".parse::<PlayLevel>().is_err());
    }

    #[test]
    fn test_cohort_round_trips_through_strings() {
        for cohort in Cohort::ALL {
            assert_eq!(cohort.as_str().parse::<Cohort>().unwrap(), cohort);
        }
    }

    #[test]
    fn test_vendor_fields_disambiguated_by_test_type() {
        assert_eq!(
            resolve_field(TestType::Sj, "peak_takeoff_power_trial_value"),
            Some(Metric::SjPeakPower)
        );
        assert_eq!(
            resolve_field(TestType::Cmj, "peak_takeoff_power_trial_value"),
            Some(Metric::CmjPeakPower)
        );
        assert_eq!(resolve_field(TestType::Hj, "rsi_trial_value"), Some(Metric::HjRsi));
        assert_eq!(
            resolve_field(TestType::Ppu, "ppu_peak_takeoff_force_trial_value"),
            Some(Metric::PpuPeakTakeoffForce)
        );
        // Key of another protocol is not accepted
        assert_eq!(resolve_field(TestType::Hj, "relative_strength_trial_value"), None);
        assert_eq!(resolve_field(TestType::Imtp, "jump_height_trial_value"), None);
    }

    #[test]
    fn test_metric_keys_unique() {
        let mut keys: Vec<_> = Metric::ALL.iter().map(|m| m.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), Metric::ALL.len());
    }

    #[test]
    fn test_composite_components_exclude_cmj() {
        assert!(COMPOSITE_COMPONENTS.iter().all(|m| m.test_type() != TestType::Cmj));
    }

    #[test]
    fn test_test_metrics_completeness() {
        let mut metrics = TestMetrics::empty(TestType::Imtp);
        assert!(metrics.set(Metric::ImtpNetPeakForce, 2800.0));
        assert!(!metrics.is_complete());
        assert!(!metrics.set(Metric::HjRsi, 2.1));
        assert!(metrics.set(Metric::ImtpRelativeStrength, 3.4));
        assert!(metrics.is_complete());
        assert_eq!(
            metrics.values(),
            vec![(Metric::ImtpNetPeakForce, 2800.0), (Metric::ImtpRelativeStrength, 3.4)]
        );
    }

    #[test]
    fn test_serde_uses_display_strings() {
        let json = serde_json::to_string(&PlayLevel::HighSchool).unwrap();
        assert_eq!(json, "\"High School\"");
        let cohort: Cohort = serde_json::from_str("\"Overall\"").unwrap();
        assert_eq!(cohort, Cohort::Overall);
        let metric: Metric = serde_json::from_str("\"hop_mean_rsi_trial_value\"").unwrap();
        assert_eq!(metric, Metric::HjRsi);
    }
}
