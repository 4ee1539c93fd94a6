//! Pomodoro phase sequencing, independent of any clock.
//!
//! Every mutation here is synchronous. The application layer decides when a
//! tick happens; this module only decides what a tick means.

use crate::domain::models::{TimerConfig, TimerPhase, TimerState};
use serde::Serialize;

/// Read-only view of the timer handed to the shell.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub session_index: u32,
    pub sessions_per_cycle: u32,
    pub running: bool,
    pub progress: f64,
}

impl TimerState {
    /// Moves to the phase that follows the current one and refills the
    /// countdown. The running flag is left as is.
    pub fn advance_phase(&mut self, config: &TimerConfig) {
        match self.phase {
            TimerPhase::Focus => {
                self.phase = if self.session_index < config.sessions_per_cycle {
                    TimerPhase::SmallBreak
                } else {
                    TimerPhase::BigBreak
                };
            }
            TimerPhase::SmallBreak => {
                self.session_index = (self.session_index + 1).min(config.sessions_per_cycle);
                self.phase = TimerPhase::Focus;
            }
            TimerPhase::BigBreak => {
                self.session_index = 1;
                self.phase = TimerPhase::Focus;
            }
        }
        self.remaining_seconds = config.duration_for(self.phase);
    }

    /// One elapsed second. Returns `true` when the tick completed the phase.
    pub fn tick(&mut self, config: &TimerConfig) -> bool {
        if self.remaining_seconds == 0 {
            self.advance_phase(config);
            return true;
        }
        self.remaining_seconds -= 1;
        if self.remaining_seconds == 0 {
            self.advance_phase(config);
            return true;
        }
        false
    }

    pub fn skip_phase(&mut self, config: &TimerConfig) {
        self.remaining_seconds = 0;
        self.advance_phase(config);
    }

    pub fn reset(&mut self, config: &TimerConfig) {
        *self = Self::initial(config);
    }

    /// Reconciles the state with a replaced configuration.
    ///
    /// A paused countdown whose phase duration changed restarts from the new
    /// full duration. A running countdown is never touched.
    pub fn apply_config(&mut self, previous: &TimerConfig, next: &TimerConfig) {
        self.session_index = self.session_index.clamp(1, next.sessions_per_cycle);
        if !self.running && previous.duration_for(self.phase) != next.duration_for(self.phase) {
            self.remaining_seconds = next.duration_for(self.phase);
        }
    }

    pub fn snapshot(&self, config: &TimerConfig) -> TimerSnapshot {
        let total_seconds = config.duration_for(self.phase);
        let progress = if total_seconds == 0 {
            0.0
        } else {
            let elapsed = total_seconds.saturating_sub(self.remaining_seconds);
            f64::from(elapsed) / f64::from(total_seconds)
        };
        TimerSnapshot {
            phase: self.phase,
            remaining_seconds: self.remaining_seconds,
            total_seconds,
            session_index: self.session_index,
            sessions_per_cycle: config.sessions_per_cycle,
            running: self.running,
            progress,
        }
    }
}

/// Formats a second count as `MM:SS`.
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(focus: u32, small: u32, big: u32, sessions: u32) -> TimerConfig {
        TimerConfig {
            focus_seconds: focus,
            small_break_seconds: small,
            big_break_seconds: big,
            sessions_per_cycle: sessions,
        }
    }

    fn arb_config() -> impl Strategy<Value = TimerConfig> {
        (300u32..=7200u32, 60u32..=1800u32, 300u32..=3600u32, 1u32..=12u32)
            .prop_map(|(focus, small, big, sessions)| config(focus, small, big, sessions))
    }

    fn arb_phase() -> impl Strategy<Value = TimerPhase> {
        prop_oneof![
            Just(TimerPhase::Focus),
            Just(TimerPhase::SmallBreak),
            Just(TimerPhase::BigBreak),
        ]
    }

    /// A reachable state: small breaks only occur before the last session.
    fn arb_config_and_state() -> impl Strategy<Value = (TimerConfig, TimerState)> {
        (arb_config(), arb_phase(), any::<bool>(), any::<u32>()).prop_map(
            |(config, phase, running, seed)| {
                let session_index = match phase {
                    TimerPhase::SmallBreak if config.sessions_per_cycle == 1 => 1,
                    TimerPhase::SmallBreak => 1 + seed % (config.sessions_per_cycle - 1),
                    _ => 1 + seed % config.sessions_per_cycle,
                };
                let phase = if phase == TimerPhase::SmallBreak && config.sessions_per_cycle == 1 {
                    TimerPhase::Focus
                } else {
                    phase
                };
                let state = TimerState {
                    phase,
                    remaining_seconds: config.duration_for(phase),
                    session_index,
                    running,
                };
                (config, state)
            },
        )
    }

    #[test]
    fn focus_before_last_session_goes_to_small_break() {
        let config = config(1500, 300, 900, 4);
        let mut state = TimerState {
            phase: TimerPhase::Focus,
            remaining_seconds: 1000,
            session_index: 2,
            running: false,
        };
        state.skip_phase(&config);
        assert_eq!(state.phase, TimerPhase::SmallBreak);
        assert_eq!(state.session_index, 2);
        assert_eq!(state.remaining_seconds, 300);
    }

    #[test]
    fn focus_on_last_session_goes_to_big_break() {
        let config = config(1500, 300, 900, 4);
        let mut state = TimerState {
            phase: TimerPhase::Focus,
            remaining_seconds: 1500,
            session_index: 4,
            running: true,
        };
        state.skip_phase(&config);
        assert_eq!(state.phase, TimerPhase::BigBreak);
        assert_eq!(state.session_index, 4);
        assert_eq!(state.remaining_seconds, 900);
        assert!(state.running);
    }

    #[test]
    fn small_break_advances_session_and_big_break_restarts_cycle() {
        let config = config(1500, 300, 900, 4);
        let mut state = TimerState {
            phase: TimerPhase::SmallBreak,
            remaining_seconds: 10,
            session_index: 3,
            running: false,
        };
        state.skip_phase(&config);
        assert_eq!(
            state,
            TimerState {
                phase: TimerPhase::Focus,
                remaining_seconds: 1500,
                session_index: 4,
                running: false,
            }
        );

        state.phase = TimerPhase::BigBreak;
        state.skip_phase(&config);
        assert_eq!(state.phase, TimerPhase::Focus);
        assert_eq!(state.session_index, 1);
        assert_eq!(state.remaining_seconds, 1500);
    }

    #[test]
    fn full_focus_countdown_lands_on_small_break() {
        let config = config(1500, 300, 900, 4);
        let mut state = TimerState::initial(&config);
        state.running = true;

        let transitions = (0..1500).filter(|_| state.tick(&config)).count();

        assert_eq!(transitions, 1);
        assert_eq!(
            state,
            TimerState {
                phase: TimerPhase::SmallBreak,
                remaining_seconds: 300,
                session_index: 1,
                running: true,
            }
        );
    }

    #[test]
    fn tick_at_zero_transitions_instead_of_underflowing() {
        let config = config(300, 60, 300, 1);
        let mut state = TimerState {
            phase: TimerPhase::Focus,
            remaining_seconds: 0,
            session_index: 1,
            running: true,
        };
        assert!(state.tick(&config));
        assert_eq!(state.phase, TimerPhase::BigBreak);
        assert_eq!(state.remaining_seconds, 300);
    }

    #[test]
    fn paused_duration_change_resyncs_to_full_new_duration() {
        let previous = config(1500, 300, 900, 4);
        let next = config(600, 300, 900, 4);
        let mut state = TimerState {
            phase: TimerPhase::Focus,
            remaining_seconds: 200,
            session_index: 1,
            running: false,
        };
        state.apply_config(&previous, &next);
        assert_eq!(state.remaining_seconds, 600);
    }

    #[test]
    fn running_countdown_ignores_config_change() {
        let previous = config(1500, 300, 900, 4);
        let next = config(600, 300, 900, 4);
        let mut state = TimerState {
            phase: TimerPhase::Focus,
            remaining_seconds: 1200,
            session_index: 1,
            running: true,
        };
        state.apply_config(&previous, &next);
        assert_eq!(state.remaining_seconds, 1200);
    }

    #[test]
    fn unrelated_duration_change_keeps_paused_countdown() {
        let previous = config(1500, 300, 900, 4);
        let next = config(1500, 600, 900, 4);
        let mut state = TimerState {
            phase: TimerPhase::Focus,
            remaining_seconds: 700,
            session_index: 2,
            running: false,
        };
        state.apply_config(&previous, &next);
        assert_eq!(state.remaining_seconds, 700);
    }

    #[test]
    fn shrinking_cycle_clamps_session_index() {
        let previous = config(1500, 300, 900, 6);
        let next = config(1500, 300, 900, 2);
        let mut state = TimerState {
            phase: TimerPhase::SmallBreak,
            remaining_seconds: 100,
            session_index: 5,
            running: false,
        };
        state.apply_config(&previous, &next);
        assert_eq!(state.session_index, 2);

        state.advance_phase(&next);
        assert_eq!(state.phase, TimerPhase::Focus);
        assert_eq!(state.session_index, 2);
    }

    #[test]
    fn snapshot_reports_progress() {
        let config = config(1500, 300, 900, 4);
        let mut state = TimerState::initial(&config);
        assert_eq!(state.snapshot(&config).progress, 0.0);

        state.remaining_seconds = 750;
        let snapshot = state.snapshot(&config);
        assert_eq!(snapshot.total_seconds, 1500);
        assert_eq!(snapshot.sessions_per_cycle, 4);
        assert!((snapshot.progress - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn format_clock_pads_minutes_and_seconds() {
        assert_eq!(format_clock(1500), "25:00");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(7200), "120:00");
    }

    proptest! {
        #[test]
        fn reset_always_returns_to_first_focus(
            (config, mut state) in arb_config_and_state(),
            ticks in 0usize..5000usize
        ) {
            for _ in 0..ticks {
                state.tick(&config);
            }
            state.reset(&config);
            prop_assert_eq!(state, TimerState {
                phase: TimerPhase::Focus,
                remaining_seconds: config.focus_seconds,
                session_index: 1,
                running: false,
            });
        }
    }

    proptest! {
        #[test]
        fn natural_completion_matches_skip((config, state) in arb_config_and_state()) {
            let mut skipped = state;
            skipped.skip_phase(&config);

            let mut ticked = state;
            let full = ticked.remaining_seconds;
            for _ in 1..full {
                prop_assert!(!ticked.tick(&config));
            }
            prop_assert!(ticked.tick(&config));

            prop_assert_eq!(ticked, skipped);
        }
    }

    proptest! {
        #[test]
        fn session_index_stays_within_cycle(
            (config, mut state) in arb_config_and_state(),
            skips in 0usize..64usize
        ) {
            for _ in 0..skips {
                state.skip_phase(&config);
                prop_assert!(state.session_index >= 1);
                prop_assert!(state.session_index <= config.sessions_per_cycle);
                prop_assert_eq!(state.remaining_seconds, config.duration_for(state.phase));
            }
        }
    }
}
