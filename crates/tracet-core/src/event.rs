use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SourceType;

/// One alert as reported by an event telescope.
///
/// Source-specific measurements are optional; a missing measurement means
/// the corresponding policy check is skipped rather than failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub id: u64,
    pub trig_id: String,
    pub telescope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_num: Option<i64>,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ra: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ra_hms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec_dms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_observed: Option<DateTime<Utc>>,
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,

    // GRB measurements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fermi_most_likely_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fermi_detection_prob: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swift_rate_signif: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hess_significance: Option<f64>,

    // Neutrino measurements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antares_ranking: Option<i64>,

    // GW measurements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_false_alarm_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_significant: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_binary_neutron_star_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_neutron_star_black_hole_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_binary_black_hole_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_terrestial_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_includes_neutron_star_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_retraction_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_skymap_fits: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvc_instruments: Option<String>,
}

impl Event {
    /// Stream label used for proposal matching: `TELESCOPE_EVENTTYPE`,
    /// upper-cased, with a trailing `_-` removed.
    pub fn stream(&self) -> String {
        let stream = format!("{}_{}", self.telescope, self.event_type).to_uppercase();
        match stream.strip_suffix("_-") {
            Some(stripped) => stripped.to_string(),
            None => stream,
        }
    }

    pub fn is_test(&self) -> bool {
        self.role.as_deref() == Some("test")
    }

    pub fn is_retraction(&self) -> bool {
        self.event_type == "Retraction"
    }

    pub fn is_early_warning(&self) -> bool {
        self.telescope == "LVC" && self.event_type == "EarlyWarning"
    }

    /// Sky position when both coordinates are known.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.ra?, self.dec?))
    }

    /// Same notice delivered twice: same trigger and either the same
    /// assigned id or identical content apart from the id.
    pub fn is_replay_of(&self, other: &Event) -> bool {
        if self.trig_id != other.trig_id {
            return false;
        }
        if self.id != 0 && self.id == other.id {
            return true;
        }
        let mut a = self.clone();
        a.id = other.id;
        a == *other
    }
}

/// All events sharing one trigger identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventGroup {
    pub id: u64,
    pub trig_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_event_observed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_event_observed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ra: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ra_hms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec_dms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    pub ignored: bool,
}

impl EventGroup {
    /// Seed a group from the first event of a trigger.
    pub fn from_event(id: u64, event: &Event) -> Self {
        Self {
            id,
            trig_id: event.trig_id.clone(),
            earliest_event_observed: event.event_observed,
            latest_event_observed: event.event_observed,
            ra: event.ra,
            dec: event.dec,
            ra_hms: event.ra_hms.clone(),
            dec_dms: event.dec_dms.clone(),
            pos_error: event.pos_error,
            source_type: event.source_type,
            source_name: event.source_name.clone(),
            ignored: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_uppercases_and_strips_dash_suffix() {
        let event = Event {
            telescope: "LVC".into(),
            event_type: "Preliminary".into(),
            ..Default::default()
        };
        assert_eq!(event.stream(), "LVC_PRELIMINARY");

        let event = Event {
            telescope: "Antares".into(),
            event_type: "-".into(),
            ..Default::default()
        };
        assert_eq!(event.stream(), "ANTARES");
    }

    #[test]
    fn event_deserializes_with_missing_fields() {
        let event: Event = serde_json::from_str(
            r#"{"id": 3, "trig_id": "S1", "telescope": "LVC", "event_type": "EarlyWarning"}"#,
        )
        .unwrap();
        assert!(event.is_early_warning());
        assert!(event.position().is_none());
        assert!(event.lvc_false_alarm_rate.is_none());
    }

    #[test]
    fn group_seeds_from_event() {
        let event = Event {
            trig_id: "T1".into(),
            ra: Some(10.0),
            dec: Some(-20.0),
            pos_error: Some(0.1),
            source_type: Some(SourceType::Grb),
            ..Default::default()
        };
        let group = EventGroup::from_event(7, &event);
        assert_eq!(group.trig_id, "T1");
        assert_eq!(group.ra, Some(10.0));
        assert!(group.ignored);
    }

    #[test]
    fn replay_matches_on_id_or_content() {
        let stored = Event {
            id: 5,
            trig_id: "S1".into(),
            event_type: "Update".into(),
            ..Default::default()
        };
        let unassigned = Event {
            id: 0,
            ..stored.clone()
        };
        assert!(unassigned.is_replay_of(&stored));

        let next_update = Event {
            sequence_num: Some(2),
            ..unassigned.clone()
        };
        assert!(!next_update.is_replay_of(&stored));

        let other_trigger = Event {
            trig_id: "S2".into(),
            ..stored.clone()
        };
        assert!(!other_trigger.is_replay_of(&stored));
    }
}
