//! Built-in observing proposals.
//!
//! The catalog is a static registry; project passwords and the ATCA contact
//! email are not part of it and are applied from configuration with
//! [`with_secrets`].

use std::collections::{HashMap, HashSet};

use tracet_core::errors::CatalogError;
use tracet_core::proposal::source::{GrbParams, GwParams, NuParams, SourcePolicy};
use tracet_core::proposal::telescope::{
    AtcaBand, AtcaSettings, MwaSettings, Telescope, TelescopeSettings,
};
use tracet_core::proposal::{Project, Proposal};
use tracet_core::types::TriggerOn;

pub const DEFAULT_PRIORITY: i32 = 1;

const SWIFT_STREAMS: &[&str] = &[
    "SWIFT_BAT_GRB_POS",
    "SWIFT_BAT_GRB_TEST_POS",
    "SWIFT_BAT_LIGHTCURVE",
    "SWIFT_BAT_QUICKLOOK_POS",
    "SWIFT_BAT_SCALEDMAP",
    "SWIFT_BAT_TRANS_POS",
    "SWIFT_FOM_OBS",
    "SWIFT_SC_SLEW",
    "SWIFT_UVOT_NACK_POS",
    "SWIFT_UVOT_POS",
];

const FERMI_STREAMS: &[&str] = &[
    "FERMI_GBM_ALERT",
    "FERMI_GBM_FIN_POS",
    "FERMI_GBM_FLT_POS",
    "FERMI_GBM_GND_POS",
    "FERMI_GBM_SUBTHRESH",
    "FERMI_GBM_TEST_POS",
    "FERMI_LAT_MONITOR",
    "FERMI_LAT_OFFLINE_POS",
    "FERMI_LAT_TEST_POS",
    "FERMI_POINT_DIR",
];

const LVC_STREAMS: &[&str] = &[
    "LVC_INITIAL",
    "LVC_M",
    "LVC_PRELIMINARY",
    "LVC_RETRACTION",
    "LVC_UPDATE",
];

fn streams(groups: &[&[&str]]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|g| g.iter().map(|s| s.to_string()))
        .collect()
}

fn project(id: &str, description: &str) -> Project {
    Project {
        id: id.into(),
        password: String::new(),
        description: description.into(),
        atca_email: None,
    }
}

fn atca_4cm() -> AtcaSettings {
    AtcaSettings {
        band_4cm: AtcaBand {
            enabled: true,
            exptime: 120,
            freq1: Some(5500),
            freq2: Some(9000),
        },
        min_exptime: 120,
        ..Default::default()
    }
}

fn atca_hess_grbs() -> Proposal {
    let mut settings = TelescopeSettings::atca(atca_4cm());
    settings.repointing_limit = 5.0;
    Proposal {
        id: 11,
        proposal_id: "ATCA_HESS_GRBs".into(),
        version: "1.0.0".into(),
        description: "ATCA triggers on HESS GRBs".into(),
        priority: 2,
        event_telescope: Some("HESS".into()),
        streams: streams(&[&["HESS_GRB_TO"]]),
        testing: TriggerOn::RealOnly,
        project: project("C3204", "Token for Short GRB ATCA triggering 2024APR"),
        telescope_settings: settings,
        source: SourcePolicy::Grb(GrbParams {
            event_min_duration: 0.0,
            event_max_duration: 10000.0,
            pending_min_duration_1: 0.0,
            pending_max_duration_1: 1000.0,
            pending_min_duration_2: 0.0,
            pending_max_duration_2: 0.0,
            maximum_position_uncertainty: 0.07,
            fermi_prob: 50.0,
            swift_rate_signif: 5.0,
            ..Default::default()
        }),
        active: true,
    }
}

fn atca_short_grb() -> Proposal {
    let mut settings = TelescopeSettings::atca(atca_4cm());
    settings.repointing_limit = 0.02;
    Proposal {
        id: 6,
        proposal_id: "ATCA_short_GRB".into(),
        version: "1.0.0".into(),
        description: "ATCA triggers on Swift short GRBs".into(),
        priority: 4,
        event_telescope: Some("SWIFT".into()),
        streams: streams(&[
            FERMI_STREAMS,
            &["HESS_GRB_TO", "MAXI_KNOWN_SOURCE_POS"],
            SWIFT_STREAMS,
        ]),
        testing: TriggerOn::RealOnly,
        project: project("C3204", "Token for Short GRB ATCA triggering 2024APR"),
        telescope_settings: settings,
        source: SourcePolicy::Grb(GrbParams {
            maximum_position_uncertainty: 0.07,
            fermi_prob: 50.0,
            ..Default::default()
        }),
        active: true,
    }
}

fn mwa_gw_nsbh() -> Proposal {
    let mut settings = TelescopeSettings::mwa(
        Telescope::mwa_vcs(),
        MwaSettings {
            freqspecs: "144,24".into(),
            exptime: 7200,
            calexptime: 200.0,
            freqres: 20.0,
            inttime: 1.0,
            horizon_limit: 20.0,
            ..Default::default()
        },
    );
    settings.repointing_limit = 5.0;
    settings.maximum_observation_time_seconds = 18000;
    Proposal {
        id: 14,
        proposal_id: "MWA_GW_NSBH".into(),
        version: "1.0.0".into(),
        description: "MWA triggering on LIGO-Virgo-KAGRA BNS GW events detected during O4 using a multi-beam approach and the VCS".into(),
        priority: 3,
        event_telescope: Some("LVC".into()),
        streams: streams(&[LVC_STREAMS]),
        testing: TriggerOn::RealOnly,
        project: project("G0094", "Password for MWA LVK GW triggering"),
        telescope_settings: settings,
        source: SourcePolicy::Gw(GwParams {
            observe_significant: true,
            ..Default::default()
        }),
        active: true,
    }
}

fn mwa_vcs_grb_swif() -> Proposal {
    let settings = TelescopeSettings::mwa(
        Telescope::mwa_vcs(),
        MwaSettings {
            exptime: 900,
            ..Default::default()
        },
    );
    Proposal {
        id: 7,
        proposal_id: "MWA_VCS_GRB_swif".into(),
        version: "1.0.0".into(),
        description: "MWA VCS triggering on Swift GRBs".into(),
        priority: 3,
        event_telescope: Some("SWIFT".into()),
        streams: streams(&[SWIFT_STREAMS]),
        testing: TriggerOn::RealOnly,
        project: project("G0055", "MWA GRB password for G0055"),
        telescope_settings: settings,
        source: SourcePolicy::Grb(GrbParams {
            event_min_duration: 0.0,
            event_max_duration: 2.1,
            pending_min_duration_1: 0.0,
            pending_max_duration_1: 0.0,
            pending_min_duration_2: 0.0,
            pending_max_duration_2: 0.0,
            fermi_prob: 50.0,
            swift_rate_signif: 0.0,
            ..Default::default()
        }),
        active: true,
    }
}

fn test2_neutrino() -> Proposal {
    let mut settings = TelescopeSettings::mwa(
        Telescope::mwa_vcs(),
        MwaSettings {
            exptime: 7200,
            calexptime: 200.0,
            freqres: 20.0,
            inttime: 1.0,
            horizon_limit: 20.0,
            ..Default::default()
        },
    );
    settings.repointing_limit = 5.0;
    settings.maximum_observation_time_seconds = 18000;
    Proposal {
        id: 10,
        proposal_id: "test2_neutrino".into(),
        version: "1.0.1".into(),
        description: "Test proposal for neutrino events".into(),
        priority: DEFAULT_PRIORITY,
        event_telescope: Some("Antares".into()),
        streams: streams(&[&["AMON_ICECUBE_BRONZE_EVENT", "AMON_ICECUBE_GOLD_EVENT"]]),
        testing: TriggerOn::PretendReal,
        project: project(
            "C002",
            "MWA triggering proposal that doesn't have permission to delete any existing observations",
        ),
        telescope_settings: settings,
        source: SourcePolicy::Nu(NuParams::default()),
        active: true,
    }
}

/// All built-in proposals, ordered by priority then id.
pub fn builtin() -> Vec<Proposal> {
    let mut proposals = vec![
        atca_hess_grbs(),
        atca_short_grb(),
        mwa_gw_nsbh(),
        mwa_vcs_grb_swif(),
        test2_neutrino(),
    ];
    sort_by_priority(&mut proposals);
    proposals
}

pub fn sort_by_priority(proposals: &mut [Proposal]) {
    proposals.sort_by_key(|p| (p.priority, p.id));
}

pub fn find<'a>(proposals: &'a [Proposal], proposal_id: &str) -> Result<&'a Proposal, CatalogError> {
    proposals
        .iter()
        .find(|p| p.proposal_id == proposal_id)
        .ok_or_else(|| CatalogError::UnknownProposal(proposal_id.to_string()))
}

/// Reject catalogs where two proposals share a numeric id.
pub fn validate(proposals: &[Proposal]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for p in proposals {
        if !seen.insert(p.id) {
            return Err(CatalogError::DuplicateId(p.id));
        }
    }
    Ok(())
}

/// Attach project passwords (and the ATCA contact email) to every proposal.
///
/// Every project referenced by the catalog must have a password.
pub fn with_secrets(
    mut proposals: Vec<Proposal>,
    passwords: &HashMap<String, String>,
    atca_email: Option<&str>,
) -> Result<Vec<Proposal>, CatalogError> {
    validate(&proposals)?;
    for p in &mut proposals {
        let password = passwords
            .get(&p.project.id)
            .ok_or_else(|| CatalogError::MissingPassword(p.project.id.clone()))?;
        p.project.password = password.clone();
        if p.telescope_settings.as_atca().is_some() {
            p.project.atca_email = atca_email.map(str::to_string);
        }
    }
    Ok(proposals)
}
