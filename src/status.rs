//! Touch status decisions. Each logical detection channel runs a small
//! hierarchical state machine: a difference count above
//! `threshold + hysteresis` arms the machine, the detection is raised on
//! the configured consecutive qualifying scan, and it holds until the
//! difference falls to `threshold - hysteresis` or below.

use statig::{blocking::IntoStateMachineExt as _, prelude::*};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DetectThresholds {
    pub threshold: u16,
    pub hysteresis: u16,
    pub on_debounce: u8,
}

impl DetectThresholds {
    fn arm_level(&self) -> u16 {
        self.threshold.saturating_add(self.hysteresis)
    }

    fn release_level(&self) -> u16 {
        self.threshold.saturating_sub(self.hysteresis)
    }
}

#[derive(Clone, Copy, Debug)]
enum DetectEvent {
    Scan { diff: u16 },
}

#[derive(Clone, Copy, Debug, Default)]
struct DetectContext {
    thresholds: DetectThresholds,
    active: bool,
}

struct DetectHsm {
    debounce_left: u8,
}

impl DetectHsm {
    fn new() -> Self {
        DetectHsm { debounce_left: 0 }
    }
}

#[state_machine(initial = "State::idle()")]
impl DetectHsm {
    #[state]
    fn idle(&mut self, context: &mut DetectContext, event: &DetectEvent) -> Outcome<State> {
        match event {
            DetectEvent::Scan { diff } => {
                if *diff > context.thresholds.arm_level() {
                    self.debounce_left = context.thresholds.on_debounce.saturating_sub(1);
                    if self.debounce_left == 0 {
                        context.active = true;
                        return Transition(State::active());
                    }
                    return Transition(State::debouncing());
                }
                Handled
            }
        }
    }

    #[state]
    fn debouncing(&mut self, context: &mut DetectContext, event: &DetectEvent) -> Outcome<State> {
        match event {
            DetectEvent::Scan { diff } => {
                if *diff > context.thresholds.arm_level() {
                    self.debounce_left = self.debounce_left.saturating_sub(1);
                    if self.debounce_left == 0 {
                        context.active = true;
                        return Transition(State::active());
                    }
                    return Handled;
                }
                Transition(State::idle())
            }
        }
    }

    #[state]
    fn active(&mut self, context: &mut DetectContext, event: &DetectEvent) -> Outcome<State> {
        match event {
            DetectEvent::Scan { diff } => {
                if *diff > context.thresholds.release_level() {
                    context.active = true;
                    return Handled;
                }
                Transition(State::idle())
            }
        }
    }
}

/// One detection channel.
pub(crate) struct StatusMachine {
    machine: statig::blocking::StateMachine<DetectHsm>,
}

impl StatusMachine {
    pub fn new() -> Self {
        StatusMachine {
            machine: DetectHsm::new().state_machine(),
        }
    }

    pub fn step(&mut self, diff: u16, thresholds: DetectThresholds) -> bool {
        let mut context = DetectContext { thresholds, active: false };
        self.machine
            .handle_with_context(&DetectEvent::Scan { diff }, &mut context);
        context.active
    }

    pub fn reset(&mut self) {
        *self = StatusMachine::new();
    }
}
