use chrono::{DateTime, Utc};
use serde::Serialize;

use tracet_core::decision::reason_line;
use tracet_core::errors::Verdict;
use tracet_core::event::Event;
use tracet_core::proposal::telescope::TelescopeSettings;

/// Ephemeral state threaded through one evaluation chain.
///
/// `event` is a working copy: the early-warning step overwrites its
/// probabilities without touching the stored event.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'a, P> {
    /// Source-policy thresholds of the proposal.
    pub params: &'a P,
    pub settings: &'a TelescopeSettings,
    pub event: Event,
    /// Best-known declination of the decision, used by ATCA band checks.
    pub dec: Option<f64>,
    pub now: DateTime<Utc>,
    pub stop: bool,
    pub likely: bool,
    pub trigger: bool,
    pub debug: bool,
    pub pending: bool,
    /// Parsed event and proposal false alarm rates.
    pub far: Option<(f64, f64)>,
    pub log: String,
}

/// A single chain link.
pub type Step<P> = fn(&mut EvaluationContext<'_, P>);

impl<'a, P> EvaluationContext<'a, P> {
    pub fn new(
        params: &'a P,
        settings: &'a TelescopeSettings,
        event: &Event,
        dec: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            params,
            settings,
            event: event.clone(),
            dec,
            now,
            stop: false,
            likely: false,
            trigger: false,
            debug: false,
            pending: false,
            far: None,
            log: String::new(),
        }
    }

    pub fn note(&mut self, message: &str) {
        self.log.push_str(&reason_line(self.now, self.event.id, message));
    }

    pub fn accept(&mut self, message: &str) {
        self.stop = true;
        self.trigger = true;
        self.note(message);
    }

    pub fn reject(&mut self, message: &str) {
        self.stop = true;
        self.debug = true;
        self.note(message);
    }

    pub fn hold(&mut self, message: &str) {
        self.stop = true;
        self.pending = true;
        self.note(message);
    }

    /// Call every step in order. Steps read `stop` themselves and return
    /// early once it is set; a step may also clear it to resume the chain.
    pub fn run(&mut self, steps: &[Step<P>]) {
        for step in steps {
            step(self);
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        verdict_of(self.trigger, self.pending, self.debug)
    }

    pub fn into_outcome(self) -> PolicyOutcome {
        PolicyOutcome {
            trigger: self.trigger,
            debug: self.debug,
            pending: self.pending,
            log: self.log,
        }
    }
}

/// Result of evaluating one event against one proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyOutcome {
    pub trigger: bool,
    pub debug: bool,
    pub pending: bool,
    pub log: String,
}

impl PolicyOutcome {
    pub fn verdict(&self) -> Option<Verdict> {
        verdict_of(self.trigger, self.pending, self.debug)
    }
}

fn verdict_of(trigger: bool, pending: bool, debug: bool) -> Option<Verdict> {
    if trigger {
        Some(Verdict::Trigger)
    } else if pending {
        Some(Verdict::Pending)
    } else if debug {
        Some(Verdict::Debug)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tracet_core::proposal::telescope::AtcaSettings;

    fn with_ctx(f: impl FnOnce(EvaluationContext<'_, ()>)) {
        let settings = TelescopeSettings::atca(AtcaSettings::default());
        let event = Event {
            id: 7,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        f(EvaluationContext::new(&(), &settings, &event, None, now));
    }

    #[test]
    fn helpers_set_exactly_one_flag() {
        with_ctx(|mut c| {
            c.hold("wait.");
            assert!(c.stop && c.pending && !c.trigger && !c.debug);
            assert_eq!(c.verdict(), Some(Verdict::Pending));
            assert!(c.log.contains("Event ID 7: wait."));
        });
    }

    #[test]
    fn steps_run_in_order() {
        fn first(c: &mut EvaluationContext<'_, ()>) {
            if !c.stop {
                c.reject("first.");
            }
        }
        fn second(c: &mut EvaluationContext<'_, ()>) {
            if !c.stop {
                c.accept("second.");
            }
        }
        with_ctx(|mut c| {
            c.run(&[first, second]);
            let outcome = c.into_outcome();
            assert!(outcome.debug && !outcome.trigger);
            assert_eq!(outcome.log.lines().count(), 1);
        });
    }

    #[test]
    fn stopped_context_still_reaches_every_step() {
        fn stop_here(c: &mut EvaluationContext<'_, ()>) {
            c.stop = true;
        }
        fn reopen(c: &mut EvaluationContext<'_, ()>) {
            c.stop = false;
        }
        fn accept(c: &mut EvaluationContext<'_, ()>) {
            if !c.stop {
                c.accept("reopened.");
            }
        }
        with_ctx(|mut c| {
            c.run(&[stop_here, reopen, accept]);
            assert_eq!(c.verdict(), Some(Verdict::Trigger));
        });
    }
}
