use chrono::{DateTime, Duration, Utc};

use tracet_core::decision::ProposalDecision;
use tracet_core::proposal::telescope::AltAz;
use tracet_core::proposal::Proposal;

use crate::skymap::coords::radec_to_altaz;

/// Source altitude over one MWA observation.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonCheck {
    /// Position at the start of the observation.
    pub start: AltAz,
    pub alt_end: f64,
    pub limit: f64,
    /// Reasoning-log messages, in order.
    pub messages: Vec<String>,
}

impl HorizonCheck {
    /// Both ends of the observation are below the limit.
    pub fn is_below(&self) -> bool {
        self.start.alt < self.limit && self.alt_end < self.limit
    }
}

/// Altitude of the decision's position at `now` and after one MWA exposure.
///
/// Returns `None` for non-MWA proposals and for decisions with no position;
/// those are never horizon-gated.
pub fn check_horizon(
    proposal: &Proposal,
    decision: &ProposalDecision,
    now: DateTime<Utc>,
) -> Option<HorizonCheck> {
    let telescope = &proposal.telescope_settings.telescope;
    if !telescope.name.starts_with("MWA") {
        return None;
    }
    let mwa = proposal.telescope_settings.as_mwa()?;
    let (ra, dec) = decision.position()?;

    let start = radec_to_altaz(ra, dec, telescope, now);
    let end_time = now + Duration::seconds(i64::from(mwa.exptime));
    let alt_end = radec_to_altaz(ra, dec, telescope, end_time).alt;
    let limit = mwa.horizon_limit;
    let alt_beg = start.alt;

    let mut messages = Vec::new();
    if alt_beg < limit && alt_end < limit {
        messages.push(format!(
            "Not triggering due to horizon limit: alt_beg {alt_beg:.4} < {limit:.4} and alt_end {alt_end:.4} < {limit:.4}."
        ));
    } else {
        if alt_beg < limit {
            messages.push(format!(
                "Warning: The source is below the horizon limit at the start of the observation alt_beg {alt_beg:.4}."
            ));
        } else if alt_end < limit {
            messages.push(format!(
                "Warning: The source will set below the horizon limit by the end of the observation alt_end {alt_end:.4}."
            ));
        }
        messages.push(format!(
            "Above horizon so attempting to observe with {}.",
            telescope.name
        ));
    }

    Some(HorizonCheck {
        start,
        alt_end,
        limit,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::skymap::coords::{altaz_to_radec, mwa_site};
    use chrono::TimeZone;
    use tracet_core::event::EventGroup;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap()
    }

    fn decision_at(proposal: &Proposal, ra: Option<f64>, dec: Option<f64>) -> ProposalDecision {
        let group = EventGroup {
            id: 1,
            trig_id: "T".into(),
            ra,
            dec,
            ..Default::default()
        };
        ProposalDecision::pending(1, proposal, &group, now())
    }

    fn mwa() -> Proposal {
        catalog::find(&catalog::builtin(), "MWA_VCS_GRB_swif")
            .unwrap()
            .clone()
    }

    #[test]
    fn zenith_source_is_above() {
        let p = mwa();
        let (ra, dec) = altaz_to_radec(90.0, 0.0, &mwa_site(), now());
        let check = check_horizon(&p, &decision_at(&p, Some(ra), Some(dec)), now()).unwrap();
        assert!(!check.is_below());
        assert!(check.start.alt > 85.0);
        assert_eq!(
            check.messages.last().unwrap(),
            "Above horizon so attempting to observe with MWA_VCS."
        );
    }

    #[test]
    fn nadir_source_is_below() {
        let p = mwa();
        let (ra, dec) = altaz_to_radec(-80.0, 0.0, &mwa_site(), now());
        let check = check_horizon(&p, &decision_at(&p, Some(ra), Some(dec)), now()).unwrap();
        assert!(check.is_below());
        assert_eq!(check.messages.len(), 1);
        assert!(check.messages[0].starts_with("Not triggering due to horizon limit: alt_beg "));
    }

    #[test]
    fn rising_source_warns_at_start() {
        let p = mwa();
        // Low in the east: below the 10 degree limit now, above it 15 minutes later.
        let (ra, dec) = altaz_to_radec(8.0, 90.0, &mwa_site(), now());
        let check = check_horizon(&p, &decision_at(&p, Some(ra), Some(dec)), now()).unwrap();
        assert!(!check.is_below());
        assert!(check.messages[0].starts_with("Warning: The source is below the horizon limit"));
    }

    #[test]
    fn atca_and_unpositioned_decisions_are_not_gated() {
        let catalog = catalog::builtin();
        let atca = catalog::find(&catalog, "ATCA_HESS_GRBs").unwrap();
        assert!(check_horizon(atca, &decision_at(atca, Some(1.0), Some(-30.0)), now()).is_none());
        let p = mwa();
        assert!(check_horizon(&p, &decision_at(&p, None, Some(-30.0)), now()).is_none());
    }
}
