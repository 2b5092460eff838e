use serde::{Deserialize, Serialize};

use crate::types::TelescopeFamily;

/// Physical telescope with its geodetic location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telescope {
    /// E.g. MWA_VCS, MWA_correlate or ATCA.
    pub name: String,
    /// Longitude in degrees (east positive).
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Height above sea level in meters.
    pub height: f64,
}

impl Telescope {
    pub fn mwa_vcs() -> Self {
        Self {
            name: "MWA_VCS".into(),
            lon: 116.671,
            lat: -26.7033,
            height: 377.827,
        }
    }

    pub fn mwa_correlate() -> Self {
        Self {
            name: "MWA_correlate".into(),
            lon: 116.671,
            lat: -26.7033,
            height: 377.827,
        }
    }

    pub fn atca() -> Self {
        Self {
            name: "ATCA".into(),
            lon: 149.550278,
            lat: -30.312778,
            height: 237.0,
        }
    }

    /// Voltage capture mode is encoded in the telescope name.
    pub fn is_vcs(&self) -> bool {
        self.name.ends_with("VCS")
    }
}

/// Horizontal pointing in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltAz {
    pub alt: f64,
    pub az: f64,
}

/// Default alt/az of the four MWA sub-arrays, used when no skymap is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultSubArrays {
    pub ne: AltAz,
    pub nw: AltAz,
    pub se: AltAz,
    pub sw: AltAz,
}

impl Default for DefaultSubArrays {
    fn default() -> Self {
        Self {
            ne: AltAz { alt: 90.0, az: 0.0 },
            nw: AltAz { alt: 66.85, az: 270.0 },
            se: AltAz { alt: 59.35, az: 219.88 },
            sw: AltAz { alt: 43.97, az: 270.0 },
        }
    }
}

impl DefaultSubArrays {
    /// Ordered as the scheduler's `subarray_list`: NE, NW, SE, SW.
    pub fn ordered(&self) -> [AltAz; 4] {
        [self.ne, self.nw, self.se, self.sw]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MwaSettings {
    pub start_observation_at_high_sensitivity: bool,
    pub sub_arrays: DefaultSubArrays,
    /// Coarse channel spec, e.g. "144,24".
    pub freqspecs: String,
    /// Seconds per observation.
    pub exptime: u32,
    pub calexptime: f64,
    /// Frequency resolution in kHz.
    pub freqres: f64,
    /// Integration time in seconds.
    pub inttime: f64,
    /// Minimum altitude in degrees.
    pub horizon_limit: f64,
    pub nobs: u32,
}

impl Default for MwaSettings {
    fn default() -> Self {
        Self {
            start_observation_at_high_sensitivity: false,
            sub_arrays: DefaultSubArrays::default(),
            freqspecs: "144,24".into(),
            exptime: 896,
            calexptime: 120.0,
            freqres: 10.0,
            inttime: 0.5,
            horizon_limit: 10.0,
            nobs: 1,
        }
    }
}

/// One ATCA receiver band. Exposure is in minutes, frequencies in MHz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtcaBand {
    #[serde(rename = "use")]
    pub enabled: bool,
    pub exptime: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq1: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq2: Option<u32>,
}

impl Default for AtcaBand {
    fn default() -> Self {
        Self {
            enabled: false,
            exptime: 60,
            freq1: None,
            freq2: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtcaSettings {
    pub band_3mm: AtcaBand,
    pub band_7mm: AtcaBand,
    pub band_15mm: AtcaBand,
    pub band_4cm: AtcaBand,
    pub band_16cm: AtcaBand,
    /// Minutes.
    pub max_exptime: u32,
    /// Minutes.
    pub min_exptime: u32,
    pub prioritise_source: bool,
    pub dec_min_1: f64,
    pub dec_max_1: f64,
    pub dec_min_2: f64,
    pub dec_max_2: f64,
}

impl Default for AtcaSettings {
    fn default() -> Self {
        Self {
            band_3mm: AtcaBand::default(),
            band_7mm: AtcaBand::default(),
            band_15mm: AtcaBand::default(),
            band_4cm: AtcaBand::default(),
            band_16cm: AtcaBand::default(),
            max_exptime: 720,
            min_exptime: 30,
            prioritise_source: false,
            dec_min_1: -90.0,
            dec_max_1: -5.0,
            dec_min_2: 5.0,
            dec_max_2: 20.0,
        }
    }
}

impl AtcaSettings {
    /// Strict containment in either declination band.
    pub fn declination_observable(&self, dec: f64) -> bool {
        (self.dec_min_1 < dec && dec < self.dec_max_1)
            || (self.dec_min_2 < dec && dec < self.dec_max_2)
    }
}

/// Scheduler-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum Instrument {
    Mwa(MwaSettings),
    Atca(AtcaSettings),
}

impl Instrument {
    pub fn family(&self) -> TelescopeFamily {
        match self {
            Instrument::Mwa(_) => TelescopeFamily::Mwa,
            Instrument::Atca(_) => TelescopeFamily::Atca,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeSettings {
    pub telescope: Telescope,
    /// Degrees a new position may move before a repoint is sent.
    pub repointing_limit: f64,
    pub maximum_observation_time_seconds: u64,
    pub instrument: Instrument,
}

impl TelescopeSettings {
    pub fn mwa(telescope: Telescope, settings: MwaSettings) -> Self {
        Self {
            telescope,
            repointing_limit: 10.0,
            maximum_observation_time_seconds: 0,
            instrument: Instrument::Mwa(settings),
        }
    }

    pub fn atca(settings: AtcaSettings) -> Self {
        Self {
            telescope: Telescope::atca(),
            repointing_limit: 10.0,
            maximum_observation_time_seconds: 0,
            instrument: Instrument::Atca(settings),
        }
    }

    pub fn family(&self) -> TelescopeFamily {
        self.instrument.family()
    }

    pub fn as_mwa(&self) -> Option<&MwaSettings> {
        match &self.instrument {
            Instrument::Mwa(mwa) => Some(mwa),
            Instrument::Atca(_) => None,
        }
    }

    pub fn as_atca(&self) -> Option<&AtcaSettings> {
        match &self.instrument {
            Instrument::Atca(atca) => Some(atca),
            Instrument::Mwa(_) => None,
        }
    }
}
