use crate::domain::models::{TimerConfig, TimerState};
use crate::domain::timer::TimerSnapshot;
use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at};

const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct EngineCore {
    config: TimerConfig,
    state: TimerState,
    /// Bumped whenever the tick source is replaced; stale ticks compare unequal.
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    core: Mutex<EngineCore>,
    snapshot_tx: watch::Sender<TimerSnapshot>,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &EngineCore) -> TimerSnapshot {
        let snapshot = core.state.snapshot(&core.config);
        self.snapshot_tx.send_replace(snapshot);
        snapshot
    }

    /// Applies a scheduled tick. Returns `false` once the schedule is stale.
    fn scheduled_tick(&self, generation: u64) -> bool {
        let mut core = self.core();
        if core.generation != generation || !core.state.running {
            return false;
        }
        let EngineCore { config, state, .. } = &mut *core;
        if state.tick(config) {
            tracing::debug!(
                phase = state.phase.as_str(),
                session = state.session_index,
                "timer phase completed"
            );
        }
        self.publish(&core);
        true
    }
}

/// Owns the Pomodoro timer state and its one-second tick source.
///
/// All operations are synchronous and serialized through one lock, so a tick
/// is never applied halfway through another mutation. Must be used inside a
/// Tokio runtime for the countdown to run.
#[derive(Debug)]
pub struct TimerEngine {
    shared: Arc<Shared>,
    tick_period: Duration,
}

impl TimerEngine {
    pub fn new(config: TimerConfig) -> Result<Self, InfraError> {
        config.validate().map_err(InfraError::InvalidConfig)?;
        let state = TimerState::initial(&config);
        let (snapshot_tx, _) = watch::channel(state.snapshot(&config));
        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(EngineCore {
                    config,
                    state,
                    generation: 0,
                    ticker: None,
                }),
                snapshot_tx,
            }),
            tick_period: DEFAULT_TICK_PERIOD,
        })
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let core = self.shared.core();
        core.state.snapshot(&core.config)
    }

    pub fn state(&self) -> TimerState {
        self.shared.core().state
    }

    pub fn config(&self) -> TimerConfig {
        self.shared.core().config
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn start(&self) -> TimerSnapshot {
        let mut core = self.shared.core();
        if core.state.running {
            return core.state.snapshot(&core.config);
        }
        if core.state.remaining_seconds == 0 {
            let EngineCore { config, state, .. } = &mut *core;
            state.advance_phase(config);
        }
        if self.restart_ticker(&mut core) {
            core.state.running = true;
            tracing::info!(
                phase = core.state.phase.as_str(),
                remaining_seconds = core.state.remaining_seconds,
                "timer started"
            );
        }
        self.shared.publish(&core)
    }

    pub fn pause(&self) -> TimerSnapshot {
        let mut core = self.shared.core();
        if !core.state.running {
            return core.state.snapshot(&core.config);
        }
        core.state.running = false;
        stop_ticker(&mut core);
        tracing::info!(
            remaining_seconds = core.state.remaining_seconds,
            "timer paused"
        );
        self.shared.publish(&core)
    }

    pub fn toggle(&self) -> TimerSnapshot {
        if self.state().running {
            self.pause()
        } else {
            self.start()
        }
    }

    /// Applies one elapsed second by hand, outside the scheduled tick source.
    pub fn tick(&self) -> TimerSnapshot {
        let mut core = self.shared.core();
        let EngineCore { config, state, .. } = &mut *core;
        state.tick(config);
        self.shared.publish(&core)
    }

    pub fn skip_phase(&self) -> TimerSnapshot {
        let mut core = self.shared.core();
        {
            let EngineCore { config, state, .. } = &mut *core;
            state.skip_phase(config);
        }
        if core.state.running {
            // The new phase gets a full first second.
            self.restart_ticker(&mut core);
        }
        tracing::info!(
            phase = core.state.phase.as_str(),
            session = core.state.session_index,
            "timer phase skipped"
        );
        self.shared.publish(&core)
    }

    pub fn reset_all(&self) -> TimerSnapshot {
        let mut core = self.shared.core();
        stop_ticker(&mut core);
        let EngineCore { config, state, .. } = &mut *core;
        state.reset(config);
        tracing::info!("timer reset");
        self.shared.publish(&core)
    }

    pub fn update_config(&self, config: TimerConfig) -> Result<TimerSnapshot, InfraError> {
        config.validate().map_err(InfraError::InvalidConfig)?;
        let mut core = self.shared.core();
        let previous = core.config;
        core.config = config;
        core.state.apply_config(&previous, &config);
        tracing::info!(
            focus_seconds = config.focus_seconds,
            small_break_seconds = config.small_break_seconds,
            big_break_seconds = config.big_break_seconds,
            sessions_per_cycle = config.sessions_per_cycle,
            "timer config updated"
        );
        Ok(self.shared.publish(&core))
    }

    /// Replaces the tick source. Returns `false` when no runtime is available.
    fn restart_ticker(&self, core: &mut EngineCore) -> bool {
        stop_ticker(core);
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(error = %error, "cannot schedule timer ticks outside a Tokio runtime");
                return false;
            }
        };
        core.ticker = Some(spawn_ticker(
            &handle,
            Arc::downgrade(&self.shared),
            core.generation,
            self.tick_period,
        ));
        true
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        stop_ticker(&mut self.shared.core());
    }
}

fn stop_ticker(core: &mut EngineCore) {
    core.generation = core.generation.wrapping_add(1);
    if let Some(ticker) = core.ticker.take() {
        ticker.abort();
    }
}

fn spawn_ticker(
    handle: &Handle,
    shared: Weak<Shared>,
    generation: u64,
    period: Duration,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if !shared.scheduled_tick(generation) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TimerPhase;
    use tokio::time::sleep;

    fn pomodoro_config() -> TimerConfig {
        TimerConfig {
            focus_seconds: 1500,
            small_break_seconds: 300,
            big_break_seconds: 900,
            sessions_per_cycle: 4,
        }
    }

    fn short_config() -> TimerConfig {
        TimerConfig {
            focus_seconds: 300,
            small_break_seconds: 60,
            big_break_seconds: 300,
            sessions_per_cycle: 2,
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = pomodoro_config();
        config.sessions_per_cycle = 0;
        assert!(matches!(
            TimerEngine::new(config),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn initial_state_is_first_focus_session() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        assert_eq!(
            engine.state(),
            TimerState {
                phase: TimerPhase::Focus,
                remaining_seconds: 1500,
                session_index: 1,
                running: false,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_through_full_focus_reaches_small_break() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        engine.start();

        sleep(Duration::from_millis(1_500_500)).await;

        assert_eq!(
            engine.state(),
            TimerState {
                phase: TimerPhase::SmallBreak,
                remaining_seconds: 300,
                session_index: 1,
                running: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_pause_are_idempotent() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        let first = engine.start();
        let second = engine.start();
        assert_eq!(first, second);

        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(engine.state().remaining_seconds, 1490);

        let paused = engine.pause();
        assert_eq!(engine.pause(), paused);
        assert!(!paused.running);

        sleep(Duration::from_secs(100)).await;
        assert_eq!(engine.state().remaining_seconds, 1490);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_switches_between_running_and_paused() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        assert!(engine.toggle().running);
        assert!(!engine.toggle().running);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_countdown() {
        let engine = TimerEngine::new(short_config()).expect("engine");
        engine.start();
        sleep(Duration::from_millis(42_500)).await;
        engine.skip_phase();

        let reset = engine.reset_all();
        assert_eq!(reset.phase, TimerPhase::Focus);
        assert_eq!(reset.remaining_seconds, 300);
        assert_eq!(reset.session_index, 1);
        assert!(!reset.running);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(engine.state().remaining_seconds, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_while_running_keeps_running_and_restarts_the_second() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        engine.start();
        sleep(Duration::from_millis(500)).await;

        let skipped = engine.skip_phase();
        assert_eq!(skipped.phase, TimerPhase::SmallBreak);
        assert_eq!(skipped.remaining_seconds, 300);
        assert!(skipped.running);

        sleep(Duration::from_millis(700)).await;
        assert_eq!(engine.state().remaining_seconds, 300);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.state().remaining_seconds, 299);
    }

    #[test]
    fn skip_while_paused_keeps_paused() {
        let engine = TimerEngine::new(short_config()).expect("engine");
        let skipped = engine.skip_phase();
        assert_eq!(skipped.phase, TimerPhase::SmallBreak);
        assert!(!skipped.running);
    }

    #[test]
    fn manual_ticks_complete_a_phase_like_skip() {
        let ticked = TimerEngine::new(short_config()).expect("engine");
        for _ in 0..300 {
            ticked.tick();
        }

        let skipped = TimerEngine::new(short_config()).expect("engine");
        skipped.skip_phase();

        assert_eq!(ticked.state(), skipped.state());
    }

    #[test]
    fn paused_config_change_resyncs_current_phase() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        for _ in 0..1000 {
            engine.tick();
        }

        let mut config = pomodoro_config();
        config.focus_seconds = 600;
        let snapshot = engine.update_config(config).expect("update config");
        assert_eq!(snapshot.remaining_seconds, 600);
        assert_eq!(snapshot.total_seconds, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn running_config_change_leaves_countdown_alone() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        engine.start();
        sleep(Duration::from_millis(5_500)).await;

        let mut config = pomodoro_config();
        config.focus_seconds = 600;
        let snapshot = engine.update_config(config).expect("update config");
        assert_eq!(snapshot.remaining_seconds, 1495);
        assert_eq!(engine.config().focus_seconds, 600);
    }

    #[test]
    fn invalid_config_update_is_rejected_and_ignored() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        let mut config = pomodoro_config();
        config.big_break_seconds = 10;
        assert!(engine.update_config(config).is_err());
        assert_eq!(engine.config(), pomodoro_config());
    }

    #[test]
    fn start_without_runtime_does_not_claim_to_run() {
        let engine = TimerEngine::new(pomodoro_config()).expect("engine");
        assert!(!engine.start().running);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_phase_changes() {
        let engine = TimerEngine::new(short_config()).expect("engine");
        let mut receiver = engine.subscribe();
        engine.start();
        sleep(Duration::from_millis(300_500)).await;

        receiver.changed().await.expect("engine alive");
        let latest = *receiver.borrow_and_update();
        assert_eq!(latest.phase, TimerPhase::SmallBreak);
        assert_eq!(latest.remaining_seconds, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_engine_stops_its_ticker() {
        let engine = TimerEngine::new(short_config()).expect("engine");
        let receiver = engine.subscribe();
        engine.start();
        drop(engine);

        sleep(Duration::from_secs(5)).await;
        assert!(receiver.has_changed().is_err());
    }
}
