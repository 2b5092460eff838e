#![no_main]
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use tracet_core::decision::ProposalDecision;
use tracet_core::event::{Event, EventGroup};

fuzz_target!(|data: &[u8]| {
    let Ok(event) = serde_json::from_slice::<Event>(data) else {
        return;
    };
    let Some(now) = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single() else {
        return;
    };
    let group = EventGroup::from_event(1, &event);
    for proposal in tracet_engine::catalog::builtin() {
        let decision = ProposalDecision::pending(1, &proposal, &group, now);
        let first = tracet_engine::policy::worth_observing(&event, &group, &proposal, &decision, now);
        let again = tracet_engine::policy::worth_observing(&event, &group, &proposal, &decision, now);
        assert_eq!(first, again);
        assert!(!(first.trigger && first.pending));
    }
});
