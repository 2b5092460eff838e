use serde::{Deserialize, Serialize};

use crate::types::SourceType;

/// Thresholds for gamma-ray burst proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrbParams {
    pub event_any_duration: bool,
    pub event_min_duration: f64,
    pub event_max_duration: f64,
    pub pending_min_duration_1: f64,
    pub pending_max_duration_1: f64,
    pub pending_min_duration_2: f64,
    pub pending_max_duration_2: f64,
    /// Degrees.
    pub maximum_position_uncertainty: f64,
    /// Percent.
    pub fermi_prob: f64,
    /// Sigma.
    pub swift_rate_signif: f64,
    pub minimum_hess_significance: f64,
    pub maximum_hess_significance: f64,
}

impl Default for GrbParams {
    fn default() -> Self {
        Self {
            event_any_duration: false,
            event_min_duration: 0.256,
            event_max_duration: 1.024,
            pending_min_duration_1: 1.025,
            pending_max_duration_1: 2.056,
            pending_min_duration_2: 0.128,
            pending_max_duration_2: 0.255,
            maximum_position_uncertainty: 0.05,
            fermi_prob: 50.0,
            swift_rate_signif: 0.0,
            minimum_hess_significance: 0.2,
            maximum_hess_significance: 1.0,
        }
    }
}

/// Thresholds for gravitational-wave proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GwParams {
    pub minimum_neutron_star_probability: f64,
    pub maximum_neutron_star_probability: f64,
    pub minimum_binary_neutron_star_probability: f64,
    pub maximum_binary_neutron_star_probability: f64,
    pub minimum_neutron_star_black_hole_probability: f64,
    pub maximum_neutron_star_black_hole_probability: f64,
    pub minimum_binary_black_hole_probability: f64,
    pub maximum_binary_black_hole_probability: f64,
    pub minimum_terrestial_probability: f64,
    pub maximum_terrestial_probability: f64,
    /// Kept as text, parsed at evaluation time like the event's own FAR.
    pub maximum_false_alarm_rate: String,
    pub observe_significant: bool,
    pub early_observation_time_seconds: u64,
}

impl Default for GwParams {
    fn default() -> Self {
        Self {
            minimum_neutron_star_probability: 0.01,
            maximum_neutron_star_probability: 1.0,
            minimum_binary_neutron_star_probability: 0.01,
            maximum_binary_neutron_star_probability: 1.0,
            minimum_neutron_star_black_hole_probability: 0.01,
            maximum_neutron_star_black_hole_probability: 1.0,
            minimum_binary_black_hole_probability: 0.0,
            maximum_binary_black_hole_probability: 1.0,
            minimum_terrestial_probability: 0.0,
            maximum_terrestial_probability: 0.95,
            maximum_false_alarm_rate: "1.00e-8".into(),
            observe_significant: false,
            early_observation_time_seconds: 900,
        }
    }
}

/// Thresholds for neutrino proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NuParams {
    /// Antares rankings at or below this value trigger.
    pub antares_min_ranking: i64,
}

impl Default for NuParams {
    fn default() -> Self {
        Self {
            antares_min_ranking: 2,
        }
    }
}

/// Source-type policy selector with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type")]
pub enum SourcePolicy {
    #[serde(rename = "GRB")]
    Grb(GrbParams),
    #[serde(rename = "GW")]
    Gw(GwParams),
    #[serde(rename = "NU")]
    Nu(NuParams),
    #[serde(rename = "FS")]
    Fs,
}

impl SourcePolicy {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourcePolicy::Grb(_) => SourceType::Grb,
            SourcePolicy::Gw(_) => SourceType::Gw,
            SourcePolicy::Nu(_) => SourceType::Nu,
            SourcePolicy::Fs => SourceType::Fs,
        }
    }
}
