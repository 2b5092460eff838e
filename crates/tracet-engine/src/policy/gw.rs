use chrono::Duration;
use tracing::debug;

use tracet_core::errors::PolicyError;
use tracet_core::proposal::source::GwParams;

use super::context::{EvaluationContext, Step};

type Ctx<'a> = EvaluationContext<'a, GwParams>;

/// Events observed longer ago than this are stale.
pub const STALE_AFTER_HOURS: i64 = 2;

/// Gravitational-wave chain.
///
/// Algorithm:
/// 1. Parse event and proposal false alarm rates (parse error rejects)
/// 2. Early warning triggers immediately on synthetic BNS probabilities
/// 3. Reject stale events, single-detector events and retractions
/// 4. LVC events only: reject FAR above the proposal maximum
/// 5. LVC events only: reject any present classification probability
///    outside its band
/// 6. LVC events only: reject significant events unless the proposal
///    observes them
/// 7. Otherwise trigger
pub const GW_STEPS: &[Step<GwParams>] = &[
    false_alarm_rate,
    early_warning,
    staleness,
    instruments,
    retraction,
    far_threshold,
    neutron_star,
    binary_neutron_star,
    neutron_star_black_hole,
    binary_black_hole,
    terrestrial,
    significance,
    default_accept,
];

fn false_alarm_rate(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Some(event_far) = c.event.lvc_false_alarm_rate.clone() else {
        return;
    };
    let proposal_far = c.params.maximum_false_alarm_rate.clone();
    if event_far.trim().is_empty() || proposal_far.trim().is_empty() {
        return;
    }
    match (
        event_far.trim().parse::<f64>(),
        proposal_far.trim().parse::<f64>(),
    ) {
        (Ok(far), Ok(threshold)) => c.far = Some((far, threshold)),
        _ => {
            let err = PolicyError::InvalidFalseAlarmRate(event_far.clone());
            debug!(event_id = c.event.id, error = %err, "FAR processing failed");
            c.reject(&format!(
                "The event FAR ({event_far}) or proposal FAR ({proposal_far}) could not be processed so not triggering."
            ));
        }
    }
}

fn early_warning(c: &mut Ctx<'_>) {
    if c.stop || !c.event.is_early_warning() {
        return;
    }
    c.event.lvc_binary_neutron_star_probability = Some(0.97);
    c.event.lvc_neutron_star_black_hole_probability = Some(0.01);
    c.event.lvc_binary_black_hole_probability = Some(0.01);
    c.event.lvc_terrestial_probability = Some(0.01);
    c.accept("Early warning event so triggering.");
}

fn staleness(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Some(observed) = c.event.event_observed else {
        return;
    };
    let cutoff = c.now - Duration::hours(STALE_AFTER_HOURS);
    if observed < cutoff {
        c.reject(&format!(
            "The event time {} is more than 2 hours ago {} so not triggering.",
            observed.format("%Y-%m-%dT%H:%M:%S+0000"),
            cutoff.format("%Y-%m-%dT%H:%M:%S+0000")
        ));
    }
}

fn instruments(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Some(list) = c.event.lvc_instruments.clone() else {
        return;
    };
    if !list.is_empty() && list.split(',').count() < 2 {
        c.reject(&format!("The event has only {list} so not triggering."));
    }
}

fn retraction(c: &mut Ctx<'_>) {
    if c.stop || !c.event.is_retraction() {
        return;
    }
    c.reject("Retraction, scheduling no capture observation.");
}

/// FAR, probability and significance checks apply to LVC notices only.
fn lvc_checks_apply(c: &Ctx<'_>) -> bool {
    !c.stop && c.event.telescope == "LVC"
}

fn far_threshold(c: &mut Ctx<'_>) {
    if !lvc_checks_apply(c) {
        return;
    }
    if let Some((far, threshold)) = c.far {
        if far > threshold {
            c.reject(&format!(
                "The FAR is {far} which is greater than the threshold {threshold} so not triggering."
            ));
        }
    }
}

/// Shared inclusive band check for one classification probability.
fn probability_band(c: &mut Ctx<'_>, label: &str, value: Option<f64>, min: f64, max: f64) {
    if !lvc_checks_apply(c) {
        return;
    }
    let Some(p) = value else {
        return;
    };
    if p > max {
        c.reject(&format!(
            "The {label} probability ({p}) is greater than {max} so not triggering."
        ));
    } else if p < min {
        c.reject(&format!(
            "The {label} probability ({p}) is less than {min} so not triggering."
        ));
    }
}

fn neutron_star(c: &mut Ctx<'_>) {
    let value = c.event.lvc_includes_neutron_star_probability;
    let (min, max) = (
        c.params.minimum_neutron_star_probability,
        c.params.maximum_neutron_star_probability,
    );
    probability_band(c, "PROB_NS", value, min, max);
}

fn binary_neutron_star(c: &mut Ctx<'_>) {
    let value = c.event.lvc_binary_neutron_star_probability;
    let (min, max) = (
        c.params.minimum_binary_neutron_star_probability,
        c.params.maximum_binary_neutron_star_probability,
    );
    probability_band(c, "PROB_BNS", value, min, max);
}

fn neutron_star_black_hole(c: &mut Ctx<'_>) {
    let value = c.event.lvc_neutron_star_black_hole_probability;
    let (min, max) = (
        c.params.minimum_neutron_star_black_hole_probability,
        c.params.maximum_neutron_star_black_hole_probability,
    );
    probability_band(c, "PROB_NSBH", value, min, max);
}

fn binary_black_hole(c: &mut Ctx<'_>) {
    let value = c.event.lvc_binary_black_hole_probability;
    let (min, max) = (
        c.params.minimum_binary_black_hole_probability,
        c.params.maximum_binary_black_hole_probability,
    );
    probability_band(c, "PROB_BBH", value, min, max);
}

fn terrestrial(c: &mut Ctx<'_>) {
    let value = c.event.lvc_terrestial_probability;
    let (min, max) = (
        c.params.minimum_terrestial_probability,
        c.params.maximum_terrestial_probability,
    );
    probability_band(c, "PROB_Terre", value, min, max);
}

fn significance(c: &mut Ctx<'_>) {
    if !lvc_checks_apply(c) {
        return;
    }
    let observe = c.params.observe_significant;
    if c.event.lvc_significant == Some(true) && !observe {
        c.reject(&format!(
            "The GW significance (true) is not observed because observe_significant is {observe}."
        ));
    }
}

fn default_accept(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    c.accept("The probability looks good so triggering.");
}
