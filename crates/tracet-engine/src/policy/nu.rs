use tracet_core::proposal::source::NuParams;

use super::context::{EvaluationContext, Step};

type Ctx<'a> = EvaluationContext<'a, NuParams>;

/// Neutrino chain: only Antares alerts carry a usable ranking.
pub const NU_STEPS: &[Step<NuParams>] = &[antares_ranking, other_telescopes];

fn antares_ranking(c: &mut Ctx<'_>) {
    if c.stop || c.event.telescope != "Antares" {
        return;
    }
    let min = c.params.antares_min_ranking;
    match c.event.antares_ranking {
        Some(ranking) if ranking <= min => c.accept(&format!(
            "The Antares ranking ({ranking}) is less than or equal to {min} so triggering."
        )),
        Some(ranking) => c.reject(&format!(
            "The Antares ranking ({ranking}) is greater than {min} so not triggering."
        )),
        None => c.accept("No Antares ranking given so triggering."),
    }
}

fn other_telescopes(c: &mut Ctx<'_>) {
    if c.stop {
        return;
    }
    c.accept("No thresholds for non Antares telescopes so triggering.");
}
