use metrics::{counter, gauge};

use crate::state_machine::LeadershipState;

pub struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub const COUNTERS: [Metric; 3] = [
    LEADERSHIP_TRANSITIONS_TOTAL,
    DUTY_FAILURES_TOTAL,
    WATCH_INSTALLS_TOTAL,
];
pub const GAUGES: [Metric; 1] = [LEADERSHIP_STATE];

pub const LEADERSHIP_STATE: Metric = Metric {
    name: "steward_leadership_state",
    description: "Leadership state of this contender (0=standby,1=leading,2=suspended,3=reinitializing)",
};

pub const LEADERSHIP_TRANSITIONS_TOTAL: Metric = Metric {
    name: "steward_leadership_transitions_total",
    description: "Total number of published leadership state changes",
};

pub const DUTY_FAILURES_TOTAL: Metric = Metric {
    name: "steward_duty_failures_total",
    description: "Total number of duties-start callbacks that failed",
};

pub const WATCH_INSTALLS_TOTAL: Metric = Metric {
    name: "steward_watch_installs_total",
    description: "Total number of predecessor watches installed",
};

/// Describe every leadership metric to the installed recorder.
///
/// Series are labelled with the contender identity, so several contenders sharing a
/// process export one series each.
pub fn register_metrics() {
    for metric in COUNTERS {
        metrics::describe_counter!(metric.name, metric.description);
    }
    for metric in GAUGES {
        metrics::describe_gauge!(metric.name, metric.description);
    }
}

pub(crate) fn record_state(contender: &str, state: LeadershipState) {
    let value = match state {
        LeadershipState::Standby => 0.0,
        LeadershipState::Leading => 1.0,
        LeadershipState::Suspended => 2.0,
        LeadershipState::Reinitializing => 3.0,
    };
    gauge!(LEADERSHIP_STATE.name, "contender" => contender.to_owned()).set(value);
    counter!(LEADERSHIP_TRANSITIONS_TOTAL.name, "contender" => contender.to_owned()).increment(1);
}

pub(crate) fn record_duty_failure(contender: &str) {
    counter!(DUTY_FAILURES_TOTAL.name, "contender" => contender.to_owned()).increment(1);
}

pub(crate) fn record_watch_install(contender: &str) {
    counter!(WATCH_INSTALLS_TOTAL.name, "contender" => contender.to_owned()).increment(1);
}
