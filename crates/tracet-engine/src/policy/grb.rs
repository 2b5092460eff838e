use tracet_core::proposal::source::GrbParams;
use tracet_core::proposal::telescope::Instrument;

use super::context::{EvaluationContext, Step};

type Ctx<'a> = EvaluationContext<'a, GrbParams>;

/// Gamma-ray burst chain.
///
/// Algorithm:
/// 1. Reject sensor-error positions (uncertainty exactly 0)
/// 2. Reject positions less precise than the proposal ceiling
/// 3. ATCA only: reject declinations outside both observable bands
/// 4. Likelihood: Fermi index/probability, else Swift significance, else
///    HESS significance, else assume a GRB
/// 5. Duration: any-duration, missing duration, trigger band, two pending
///    bands, else reject
pub const GRB_STEPS: &[Step<GrbParams>] = &[
    position_error_zero,
    position_error_ceiling,
    declination_bands,
    resume,
    fermi_likelihood,
    swift_significance,
    hess_significance,
    no_likelihood_metric,
    resume,
    any_duration,
    missing_duration,
    duration_bands,
];

/// Re-open a chain stopped by a likelihood step that did not reach a verdict.
fn resume(c: &mut Ctx<'_>) {
    if c.stop && !c.trigger && !c.debug && !c.pending {
        c.stop = false;
    }
}

fn position_error_zero(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    if c.event.pos_error == Some(0.0) {
        c.reject(
            "The event's position uncertainty is 0.0, which is likely an error, so not observing.",
        );
    }
}

fn position_error_ceiling(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let ceiling = c.params.maximum_position_uncertainty;
    if let Some(err) = c.event.pos_error {
        if ceiling != 0.0 && err > ceiling {
            c.reject(&format!(
                "The event's position uncertainty ({err:.4} deg) is greater than {ceiling:.4} so not observing."
            ));
        }
    }
}

fn declination_bands(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Instrument::Atca(atca) = &c.settings.instrument else {
        return;
    };
    let Some(dec) = c.dec else {
        return;
    };
    if !atca.declination_observable(dec) {
        let message = format!(
            "The event's declination ({dec}) is outside limit 1 ({} < dec < {}) or limit 2 ({} < dec < {}).",
            atca.dec_min_1, atca.dec_max_1, atca.dec_min_2, atca.dec_max_2
        );
        c.reject(&message);
    }
}

fn fermi_likelihood(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Some(index) = c.event.fermi_most_likely_index else {
        return;
    };
    c.stop = true;
    let threshold = c.params.fermi_prob;
    if index != 4.0 {
        c.debug = true;
        c.note("Fermi GRB likely index not 4.");
        return;
    }
    if c.event.fermi_detection_prob.unwrap_or(0.0) >= threshold {
        c.likely = true;
        c.note(&format!("Fermi GRB probability greater than {threshold}."));
    } else {
        c.debug = true;
        c.note(&format!(
            "Fermi GRB probability less than {threshold} so not triggering."
        ));
    }
}

fn swift_significance(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Some(signif) = c.event.swift_rate_signif else {
        return;
    };
    c.stop = true;
    let min = c.params.swift_rate_signif;
    if signif >= min {
        c.likely = true;
        c.note(&format!(
            "SWIFT rate significance ({signif}) >= swift_min_rate ({min:.3}) sigma."
        ));
    } else {
        c.debug = true;
        c.note(&format!(
            "SWIFT rate significance ({signif}) < swift_min_rate ({min:.3}) sigma so not triggering."
        ));
    }
}

fn hess_significance(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    let Some(signif) = c.event.hess_significance else {
        return;
    };
    c.stop = true;
    let (min, max) = (
        c.params.minimum_hess_significance,
        c.params.maximum_hess_significance,
    );
    if (min..=max).contains(&signif) {
        c.likely = true;
        c.note(&format!(
            "HESS rate significance is {min} <= ({signif:.3}) <= {max} sigma."
        ));
    } else {
        c.debug = true;
        c.note(&format!(
            "HESS rate significance is not {min} <= ({signif:.3}) <= {max} so not triggering."
        ));
    }
}

fn no_likelihood_metric(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    c.likely = true;
    c.note("No probability metric given so assume it is a GRB.");
}

fn any_duration(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    if c.params.event_any_duration && c.likely && !c.debug {
        c.accept("Accepting any event duration so triggering.");
    }
}

fn missing_duration(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    if !c.params.event_any_duration && c.event.duration.is_none() && !c.debug {
        c.reject("No event duration (None) so not triggering.");
    }
}

fn duration_bands(c: &mut Ctx<'_>) {
    if c.stop || !c.likely || c.debug {
        return;
    }
    let Some(duration) = c.event.duration else {
        return;
    };
    let p = c.params;
    let bands = [
        (p.pending_min_duration_1, p.pending_max_duration_1),
        (p.pending_min_duration_2, p.pending_max_duration_2),
    ];
    if (p.event_min_duration..=p.event_max_duration).contains(&duration) {
        let message = format!(
            "Event duration between {} and {} s so triggering.",
            p.event_min_duration, p.event_max_duration
        );
        c.accept(&message);
    } else if let Some((min, max)) = bands
        .into_iter()
        .find(|(min, max)| (*min..=*max).contains(&duration))
    {
        c.hold(&format!(
            "Event duration between {min} and {max} s so waiting for a human's decision."
        ));
    } else {
        c.reject("Event duration outside of all time ranges so not triggering.");
    }
}
