use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::{
    error::{ShutdownError, SimulationError, ValidationError},
    shutdown::ShutdownExecutor,
    simulator::ActivitySimulator,
    status::{StatusSnapshot, SNAPSHOT_LOG_TAIL},
};

use super::{
    state::{ActivityLog, LogLevel, Session, SessionState, TimerChoice},
    workers::{activity_loop, countdown_loop, grace_loop},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Time between the countdown reaching zero and the shutdown command.
pub const SHUTDOWN_GRACE_SECS: u64 = 60;

pub const DEFAULT_ACTIVITY_INTERVAL: Duration = Duration::from_secs(6);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub activity_interval: Duration,
    pub log_capacity: usize,
    pub log_trim_to: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            activity_interval: DEFAULT_ACTIVITY_INTERVAL,
            log_capacity: super::state::DEFAULT_LOG_CAPACITY,
            log_trim_to: super::state::DEFAULT_LOG_TRIM_TO,
        }
    }
}

/// Result of a successful `cancel_shutdown`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    /// The executor confirmed the OS-level abort. When `false` the local
    /// state is reset but an already-issued OS shutdown may still happen.
    pub abort_confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    Finished,
}

struct Inner {
    session: Mutex<Session>,
    simulator: Arc<dyn ActivitySimulator>,
    executor: Arc<dyn ShutdownExecutor>,
    activity_interval: Duration,
    tasks: TaskTracker,
    updates: watch::Sender<StatusSnapshot>,
}

/// Owns the session and is its only writer.
///
/// Background loops never touch the session directly; they report through
/// `perform_activity` and the `on_*` entry points, which re-check the session and
/// countdown ids under the lock and drop anything from a stale generation.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

fn record(session: &mut Session, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    match level {
        LogLevel::Info => log_info!("{message}"),
        LogLevel::Warning => log_warn!("{message}"),
        LogLevel::Error => log_error!("{message}"),
    }
    session.log.push(level, message);
}

impl SessionController {
    pub fn new(
        simulator: Arc<dyn ActivitySimulator>,
        executor: Arc<dyn ShutdownExecutor>,
        config: ControllerConfig,
    ) -> Self {
        let session = Session::new(ActivityLog::new(config.log_capacity, config.log_trim_to));
        let (updates, _) = watch::channel(StatusSnapshot::capture(&session, SNAPSHOT_LOG_TAIL));

        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                simulator,
                executor,
                activity_interval: config.activity_interval,
                tasks: TaskTracker::new(),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.updates.subscribe()
    }

    pub async fn status(&self, tail: usize) -> StatusSnapshot {
        let session = self.inner.session.lock().await;
        StatusSnapshot::capture(&session, tail)
    }

    pub async fn start(&self) -> Result<(), ValidationError> {
        let mut session = self.inner.session.lock().await;
        match session.state {
            SessionState::Idle => {}
            // The executor failed earlier; a fresh start clears it without
            // re-arming the timer that led there.
            SessionState::ShuttingDown
                if !session.shutdown_pending && !session.shutdown_dispatched =>
            {
                session.timer_choice = TimerChoice::Never;
            }
            SessionState::ShuttingDown => {
                log_warn!("start ignored: shutdown in progress");
                return Err(ValidationError::ShutdownInProgress);
            }
            SessionState::Active | SessionState::Armed => {
                log_warn!("start ignored: already active");
                return Err(ValidationError::AlreadyActive);
            }
        }

        let (session_id, token) = session.begin();
        record(&mut session, LogLevel::Info, "Keep awake started");

        self.inner.tasks.spawn(activity_loop(
            self.clone(),
            session_id,
            token,
            self.inner.activity_interval,
        ));

        if session.timer_choice != TimerChoice::Never {
            self.apply_timer(&mut session, session_id);
        }

        self.publish(&session);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ValidationError> {
        let mut session = self.inner.session.lock().await;
        if session.state == SessionState::Idle {
            log_warn!("stop ignored: not active");
            return Err(ValidationError::NotActive);
        }

        let had_timer = session.timer_choice != TimerChoice::Never;
        session.reset();
        record(&mut session, LogLevel::Info, "Keep awake stopped");
        if had_timer {
            record(&mut session, LogLevel::Info, "Timer reset");
        }

        self.publish(&session);
        Ok(())
    }

    pub async fn set_timer(&self, choice: TimerChoice) -> Result<(), ValidationError> {
        let mut session = self.inner.session.lock().await;
        match (session.state, session.session_id) {
            (SessionState::ShuttingDown, _) => Err(ValidationError::ShutdownInProgress),
            (SessionState::Active | SessionState::Armed, Some(session_id)) => {
                let was_armed = session.state == SessionState::Armed;
                session.timer_choice = choice;
                self.apply_timer(&mut session, session_id);
                if was_armed && choice == TimerChoice::Never {
                    record(&mut session, LogLevel::Info, "Shutdown timer cleared");
                }
                self.publish(&session);
                Ok(())
            }
            _ => {
                session.timer_choice = choice;
                record(
                    &mut session,
                    LogLevel::Info,
                    format!("Timer set to {choice}; applies on next start"),
                );
                self.publish(&session);
                Ok(())
            }
        }
    }

    /// Skip the countdown and enter the shutdown grace period now.
    pub async fn shutdown_now(&self) -> Result<(), ValidationError> {
        let mut session = self.inner.session.lock().await;
        let session_id = match (session.state, session.session_id) {
            (SessionState::Active | SessionState::Armed, Some(id)) => id,
            (SessionState::ShuttingDown, _) => return Err(ValidationError::ShutdownInProgress),
            _ => return Err(ValidationError::NotActive),
        };

        record(&mut session, LogLevel::Info, "Immediate shutdown requested");
        self.begin_grace(&mut session, session_id);
        self.publish(&session);
        Ok(())
    }

    pub async fn cancel_shutdown(&self) -> Result<CancelOutcome, ValidationError> {
        let session_id = {
            let mut session = self.inner.session.lock().await;
            let session_id = match (session.state, session.session_id) {
                (SessionState::ShuttingDown, Some(id)) if session.shutdown_pending => id,
                _ => return Err(ValidationError::NoShutdownPending),
            };

            session.shutdown_pending = false;
            session.cancel_countdown();
            session.timer_choice = TimerChoice::Never;
            session.state = SessionState::Active;
            record(&mut session, LogLevel::Info, "Shutdown cancelled");
            self.publish(&session);
            session_id
        };

        let result = self.run_executor(|executor| executor.abort()).await;
        let abort_confirmed = result.is_ok();

        let mut session = self.inner.session.lock().await;
        match result {
            Ok(()) => {}
            Err(ShutdownError::AbortUnsupported) => record(
                &mut session,
                LogLevel::Warning,
                "OS-level shutdown abort is not supported; an already issued shutdown may still occur",
            ),
            Err(err) => record(
                &mut session,
                LogLevel::Warning,
                format!("Failed to abort OS shutdown: {err}"),
            ),
        }
        // A new grace period may have started while the abort ran.
        if session.is_current(session_id) && session.state != SessionState::ShuttingDown {
            session.abort_unconfirmed = !abort_confirmed;
        }

        self.publish(&session);
        Ok(CancelOutcome { abort_confirmed })
    }

    /// Stop any session and wait for every background task to exit.
    pub async fn close(&self) {
        {
            let mut session = self.inner.session.lock().await;
            if session.state != SessionState::Idle {
                session.reset();
                record(&mut session, LogLevel::Info, "Keep awake stopped");
                self.publish(&session);
            }
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Produce one simulated input for `session_id`. The simulator runs under
    /// the session lock, so nothing is simulated once `stop` has returned.
    /// Returns `false` when the activity loop should exit.
    pub(crate) async fn perform_activity(&self, session_id: Uuid) -> bool {
        let mut session = self.inner.session.lock().await;
        if !session.is_current(session_id) {
            return false;
        }

        match self.inner.simulator.perform_one() {
            Ok(action) => {
                record(&mut session, LogLevel::Info, action);
                self.publish(&session);
                true
            }
            Err(err) => {
                self.on_activity_error(&mut session, err);
                self.publish(&session);
                false
            }
        }
    }

    fn on_activity_error(&self, session: &mut Session, err: SimulationError) {
        session.reset();
        record(session, LogLevel::Error, format!("{err}; keep awake stopped"));
        session.last_error = Some(err.to_string());
    }

    pub(crate) async fn on_countdown_tick(&self, session_id: Uuid, countdown_id: u64) -> TickOutcome {
        let mut session = self.inner.session.lock().await;
        if session.state != SessionState::Armed
            || !session.is_current_countdown(session_id, countdown_id)
        {
            return TickOutcome::Finished;
        }

        session.remaining_seconds = session.remaining_seconds.saturating_sub(1);
        if session.remaining_seconds > 0 {
            self.publish(&session);
            return TickOutcome::Continue;
        }

        record(&mut session, LogLevel::Info, "Timer expired");
        self.begin_grace(&mut session, session_id);
        self.publish(&session);
        TickOutcome::Finished
    }

    pub(crate) async fn on_grace_tick(&self, session_id: Uuid, countdown_id: u64) -> TickOutcome {
        let mut session = self.inner.session.lock().await;
        if session.state != SessionState::ShuttingDown
            || !session.shutdown_pending
            || !session.is_current_countdown(session_id, countdown_id)
        {
            return TickOutcome::Finished;
        }

        session.grace_remaining_seconds = session.grace_remaining_seconds.saturating_sub(1);
        if session.grace_remaining_seconds > 0 {
            self.publish(&session);
            return TickOutcome::Continue;
        }

        if !self.begin_dispatch(&mut session) {
            return TickOutcome::Finished;
        }
        self.publish(&session);
        drop(session);

        let result = self.run_executor(|executor| executor.execute()).await;
        self.on_shutdown_result(session_id, result).await;
        TickOutcome::Finished
    }

    /// Executor outcome for a dispatch made by `session_id`. The log always
    /// records it; session state only changes if that session is still live.
    pub(crate) async fn on_shutdown_result(
        &self,
        session_id: Uuid,
        result: Result<(), ShutdownError>,
    ) {
        let mut session = self.inner.session.lock().await;
        let current = session.is_current(session_id) && session.shutdown_dispatched;
        if current {
            session.shutdown_dispatched = false;
        }

        match result {
            Ok(()) => {
                record(&mut session, LogLevel::Info, "Shutdown executed");
                if current {
                    session.reset();
                }
            }
            Err(err) if current => {
                record(
                    &mut session,
                    LogLevel::Error,
                    format!("Shutdown failed: {err}; stop or restart to recover"),
                );
                session.last_error = Some(err.to_string());
            }
            Err(err) => {
                record(
                    &mut session,
                    LogLevel::Error,
                    format!("Shutdown failed after the session ended: {err}"),
                );
            }
        }
        self.publish(&session);
    }

    /// (Re)arm or disarm the countdown from `timer_choice`. Any previous
    /// countdown is cancelled first.
    fn apply_timer(&self, session: &mut Session, session_id: Uuid) {
        session.cancel_countdown();
        let Some(seconds) = session.timer_choice.seconds() else {
            session.state = SessionState::Active;
            return;
        };

        let countdown = session.new_countdown();
        session.remaining_seconds = seconds;
        session.state = SessionState::Armed;
        let label = session.timer_choice.label();
        record(session, LogLevel::Info, format!("Shutdown timer set: {label}"));

        self.inner
            .tasks
            .spawn(countdown_loop(self.clone(), session_id, countdown));
    }

    fn begin_grace(&self, session: &mut Session, session_id: Uuid) {
        let countdown = session.new_countdown();
        session.state = SessionState::ShuttingDown;
        session.shutdown_pending = true;
        session.abort_unconfirmed = false;
        session.grace_remaining_seconds = SHUTDOWN_GRACE_SECS;
        record(
            session,
            LogLevel::Warning,
            format!("Shutdown scheduled in {SHUTDOWN_GRACE_SECS} seconds; cancel to abort"),
        );

        self.inner
            .tasks
            .spawn(grace_loop(self.clone(), session_id, countdown));
    }

    /// Single-flight: the pending flag is checked and cleared under the same
    /// lock that `cancel_shutdown` takes, so at most one of them wins. The
    /// executor itself runs after the lock is released.
    fn begin_dispatch(&self, session: &mut Session) -> bool {
        if !std::mem::take(&mut session.shutdown_pending) {
            return false;
        }
        session.cancel_countdown();
        session.shutdown_dispatched = true;
        record(session, LogLevel::Info, "Issuing shutdown command");
        true
    }

    /// Executor calls may block on an OS command, so they run on the blocking
    /// pool with no lock held.
    async fn run_executor<F>(&self, call: F) -> Result<(), ShutdownError>
    where
        F: FnOnce(&dyn ShutdownExecutor) -> Result<(), ShutdownError> + Send + 'static,
    {
        let executor = Arc::clone(&self.inner.executor);
        tokio::task::spawn_blocking(move || call(executor.as_ref()))
            .await
            .unwrap_or_else(|err| Err(ShutdownError::Execution(format!("executor task failed: {err}"))))
    }

    fn publish(&self, session: &Session) {
        self.inner
            .updates
            .send_replace(StatusSnapshot::capture(session, SNAPSHOT_LOG_TAIL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc as std_mpsc,
    };
    use tokio::{sync::mpsc, time::sleep};

    #[derive(Default)]
    struct CountingSimulator {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl ActivitySimulator for CountingSimulator {
        fn perform_one(&self) -> Result<String, SimulationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_call == Some(call) {
                return Err(SimulationError::new("input device unavailable"));
            }
            Ok(format!("simulated action {call}"))
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        executes: AtomicUsize,
        aborts: AtomicUsize,
        fail_execute: bool,
        abort_supported: bool,
    }

    impl ShutdownExecutor for RecordingExecutor {
        fn execute(&self) -> Result<(), ShutdownError> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            if self.fail_execute {
                Err(ShutdownError::Execution("permission denied".into()))
            } else {
                Ok(())
            }
        }

        fn abort(&self) -> Result<(), ShutdownError> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            if self.abort_supported {
                Ok(())
            } else {
                Err(ShutdownError::AbortUnsupported)
            }
        }
    }

    /// Blocks every executor call until the test releases it.
    struct GatedExecutor {
        entered: mpsc::UnboundedSender<&'static str>,
        release: std::sync::Mutex<std_mpsc::Receiver<()>>,
    }

    impl GatedExecutor {
        fn new() -> (Self, mpsc::UnboundedReceiver<&'static str>, std_mpsc::Sender<()>) {
            let (entered, entered_rx) = mpsc::unbounded_channel();
            let (release_tx, release) = std_mpsc::channel();
            let executor = Self {
                entered,
                release: std::sync::Mutex::new(release),
            };
            (executor, entered_rx, release_tx)
        }

        fn hold(&self, call: &'static str) {
            let _ = self.entered.send(call);
            let release = self.release.lock().unwrap_or_else(|p| p.into_inner());
            let _ = release.recv();
        }
    }

    impl ShutdownExecutor for GatedExecutor {
        fn execute(&self) -> Result<(), ShutdownError> {
            self.hold("execute");
            Ok(())
        }

        fn abort(&self) -> Result<(), ShutdownError> {
            self.hold("abort");
            Ok(())
        }
    }

    /// Counts inputs simulated after the test has seen `stop` return.
    #[derive(Default)]
    struct WatchedSimulator {
        stopped: AtomicBool,
        late_calls: AtomicUsize,
    }

    impl ActivitySimulator for WatchedSimulator {
        fn perform_one(&self) -> Result<String, SimulationError> {
            if self.stopped.load(Ordering::SeqCst) {
                self.late_calls.fetch_add(1, Ordering::SeqCst);
            }
            Ok("Pressed 'Shift' key".to_string())
        }
    }

    fn controller_with(
        simulator: CountingSimulator,
        executor: RecordingExecutor,
    ) -> (SessionController, Arc<CountingSimulator>, Arc<RecordingExecutor>) {
        let simulator = Arc::new(simulator);
        let executor = Arc::new(executor);
        let controller = SessionController::new(
            simulator.clone(),
            executor.clone(),
            ControllerConfig::default(),
        );
        (controller, simulator, executor)
    }

    fn controller() -> (SessionController, Arc<CountingSimulator>, Arc<RecordingExecutor>) {
        controller_with(CountingSimulator::default(), RecordingExecutor::default())
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let (controller, _, _) = controller();

        assert_eq!(controller.stop().await, Err(ValidationError::NotActive));
        assert_eq!(controller.start().await, Ok(()));
        assert_eq!(controller.start().await, Err(ValidationError::AlreadyActive));
        assert_eq!(controller.status(0).await.state, SessionState::Active);

        assert_eq!(controller.stop().await, Ok(()));
        assert_eq!(controller.stop().await, Err(ValidationError::NotActive));
        assert_eq!(controller.status(0).await.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_runs_on_a_fixed_interval() {
        let (controller, simulator, _) = controller();
        controller.start().await.expect("start");

        // Immediately, then at 6s and 12s.
        sleep(secs(12.5)).await;
        assert_eq!(simulator.calls.load(Ordering::SeqCst), 3);

        controller.stop().await.expect("stop");
        sleep(secs(60.0)).await;
        assert_eq!(simulator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_mid_interval() {
        let (controller, _, _) = controller();
        controller.start().await.expect("start");
        sleep(secs(1.0)).await;

        controller.stop().await.expect("stop");
        let started = tokio::time::Instant::now();
        controller.close().await;
        assert!(started.elapsed() <= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_chosen_while_idle_applies_on_start() {
        let (controller, _, _) = controller();
        controller.set_timer(TimerChoice::TwoHours).await.expect("set timer");
        assert_eq!(controller.status(0).await.state, SessionState::Idle);

        controller.start().await.expect("start");
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Armed);
        assert_eq!(status.remaining_time_seconds, 7200);
        assert_eq!(status.formatted_remaining, "02:00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_decrements_once_per_second() {
        let (controller, _, _) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("set timer");

        // Stay half a tick off the countdown's own boundaries.
        sleep(secs(0.5)).await;
        let mut last = controller.status(0).await.remaining_time_seconds;
        assert_eq!(last, 3600);
        for _ in 0..5 {
            sleep(secs(1.0)).await;
            let now = controller.status(0).await.remaining_time_seconds;
            assert_eq!(now, last - 1);
            last = now;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_countdown() {
        let (controller, _, _) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("set 1h");
        sleep(secs(10.5)).await;

        controller.set_timer(TimerChoice::TwoHours).await.expect("set 2h");
        sleep(secs(2.5)).await;

        // Only the new countdown ticks.
        assert_eq!(controller.status(0).await.remaining_time_seconds, 7198);
    }

    #[tokio::test(start_paused = true)]
    async fn disarming_returns_to_active() {
        let (controller, _, executor) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        controller.set_timer(TimerChoice::Never).await.expect("disarm");

        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.remaining_time_seconds, 0);

        sleep(secs(3700.0)).await;
        assert_eq!(controller.status(0).await.state, SessionState::Active);
        assert_eq!(executor.executes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_enters_grace_then_executes_once() {
        let (controller, _, executor) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");

        sleep(secs(3599.5)).await;
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Armed);
        assert_eq!(status.remaining_time_seconds, 1);

        sleep(secs(1.0)).await;
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::ShuttingDown);
        assert_eq!(status.grace_remaining_seconds, Some(SHUTDOWN_GRACE_SECS));
        assert_eq!(executor.executes.load(Ordering::SeqCst), 0);

        sleep(secs(59.0)).await;
        assert_eq!(executor.executes.load(Ordering::SeqCst), 0);
        assert_eq!(controller.status(0).await.grace_remaining_seconds, Some(1));

        sleep(secs(1.0)).await;
        assert_eq!(executor.executes.load(Ordering::SeqCst), 1);
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.timer_choice, TimerChoice::Never);

        sleep(secs(600.0)).await;
        assert_eq!(executor.executes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_expiry_prevents_shutdown() {
        let (controller, _, executor) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        sleep(secs(3599.5)).await;

        controller.stop().await.expect("stop");
        sleep(secs(3600.0)).await;

        assert_eq!(executor.executes.load(Ordering::SeqCst), 0);
        assert_eq!(controller.status(0).await.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_does_not_revive_old_countdown() {
        let (controller, _, executor) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        sleep(secs(3000.5)).await;

        controller.stop().await.expect("stop");
        controller.start().await.expect("restart");
        sleep(secs(1200.0)).await;

        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(executor.executes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_grace_prevents_execution() {
        let (controller, _, executor) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        sleep(secs(3659.5)).await;

        let outcome = controller.cancel_shutdown().await.expect("cancel");
        assert!(!outcome.abort_confirmed);
        assert_eq!(executor.aborts.load(Ordering::SeqCst), 1);

        let status = controller.status(10).await;
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.timer_choice, TimerChoice::Never);
        assert!(status.abort_unconfirmed);
        assert!(status
            .recent_log_entries
            .iter()
            .any(|e| e.level == LogLevel::Warning && e.message.contains("not supported")));

        sleep(secs(120.0)).await;
        assert_eq!(executor.executes.load(Ordering::SeqCst), 0);
        assert_eq!(
            controller.cancel_shutdown().await,
            Err(ValidationError::NoShutdownPending)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_abort_clears_uncertainty() {
        let (controller, _, _) = controller_with(
            CountingSimulator::default(),
            RecordingExecutor {
                abort_supported: true,
                ..Default::default()
            },
        );
        controller.start().await.expect("start");
        controller.shutdown_now().await.expect("shutdown now");

        let outcome = controller.cancel_shutdown().await.expect("cancel");
        assert!(outcome.abort_confirmed);
        assert!(!controller.status(0).await.abort_unconfirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_requires_pending_shutdown() {
        let (controller, _, _) = controller();
        assert_eq!(
            controller.cancel_shutdown().await,
            Err(ValidationError::NoShutdownPending)
        );

        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        assert_eq!(
            controller.cancel_shutdown().await,
            Err(ValidationError::NoShutdownPending)
        );
        assert_eq!(controller.status(0).await.state, SessionState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_execution_stays_shutting_down_until_stop() {
        let (controller, _, executor) = controller_with(
            CountingSimulator::default(),
            RecordingExecutor {
                fail_execute: true,
                ..Default::default()
            },
        );
        controller.start().await.expect("start");
        controller.shutdown_now().await.expect("shutdown now");
        sleep(secs(60.5)).await;

        let status = controller.status(5).await;
        assert_eq!(status.state, SessionState::ShuttingDown);
        assert!(!status.shutdown_pending);
        assert_eq!(status.grace_remaining_seconds, None);
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("permission denied")));

        // No retry, and nothing left to cancel.
        sleep(secs(600.0)).await;
        assert_eq!(executor.executes.load(Ordering::SeqCst), 1);
        assert_eq!(
            controller.cancel_shutdown().await,
            Err(ValidationError::NoShutdownPending)
        );

        controller.stop().await.expect("stop");
        assert_eq!(controller.status(0).await.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_recovers_from_failed_execution() {
        let (controller, _, _) = controller_with(
            CountingSimulator::default(),
            RecordingExecutor {
                fail_execute: true,
                ..Default::default()
            },
        );
        controller.start().await.expect("start");
        controller.shutdown_now().await.expect("shutdown now");
        assert_eq!(
            controller.start().await,
            Err(ValidationError::ShutdownInProgress)
        );

        sleep(secs(60.5)).await;
        controller.start().await.expect("restart after failure");
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_timer_rejected_while_shutting_down() {
        let (controller, _, _) = controller();
        controller.start().await.expect("start");
        controller.shutdown_now().await.expect("shutdown now");

        assert_eq!(
            controller.set_timer(TimerChoice::OneHour).await,
            Err(ValidationError::ShutdownInProgress)
        );
        assert_eq!(
            controller.shutdown_now().await,
            Err(ValidationError::ShutdownInProgress)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_error_stops_the_session() {
        let (controller, simulator, _) = controller_with(
            CountingSimulator {
                fail_on_call: Some(2),
                ..Default::default()
            },
            RecordingExecutor::default(),
        );
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        sleep(secs(6.5)).await;

        let status = controller.status(5).await;
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.timer_choice, TimerChoice::Never);
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("input device unavailable")));

        sleep(secs(60.0)).await;
        assert_eq!(simulator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_state_changes() {
        let (controller, _, _) = controller();
        let mut updates = controller.subscribe();

        controller.start().await.expect("start");
        updates.changed().await.expect("update");
        assert_eq!(updates.borrow_and_update().state, SessionState::Active);

        controller.stop().await.expect("stop");
        updates.changed().await.expect("update");
        assert_eq!(updates.borrow_and_update().state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_background_tasks() {
        let (controller, _, _) = controller();
        controller.start().await.expect("start");
        controller.set_timer(TimerChoice::OneHour).await.expect("arm");
        sleep(secs(2.0)).await;

        controller.close().await;
        assert!(controller.inner.tasks.is_empty());
        assert_eq!(controller.status(0).await.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_abort_does_not_hold_the_session() {
        let (executor, mut entered, release) = GatedExecutor::new();
        let controller = SessionController::new(
            Arc::new(CountingSimulator::default()),
            Arc::new(executor),
            ControllerConfig::default(),
        );
        controller.start().await.expect("start");
        controller.shutdown_now().await.expect("shutdown now");

        let cancelling = tokio::spawn({
            let controller = controller.clone();
            async move { controller.cancel_shutdown().await }
        });
        assert_eq!(entered.recv().await, Some("abort"));

        // The abort is still blocked here.
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::Active);
        assert!(!status.shutdown_pending);
        assert_eq!(controller.set_timer(TimerChoice::OneHour).await, Ok(()));

        release.send(()).expect("release");
        let outcome = cancelling.await.expect("join").expect("cancel");
        assert!(outcome.abort_confirmed);
        assert_eq!(controller.status(0).await.state, SessionState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_execution_does_not_hold_the_session() {
        let (executor, mut entered, release) = GatedExecutor::new();
        let controller = SessionController::new(
            Arc::new(CountingSimulator::default()),
            Arc::new(executor),
            ControllerConfig::default(),
        );
        controller.start().await.expect("start");
        controller.shutdown_now().await.expect("shutdown now");
        assert_eq!(entered.recv().await, Some("execute"));

        // The command is in flight: readable, but not restartable or cancellable.
        let status = controller.status(0).await;
        assert_eq!(status.state, SessionState::ShuttingDown);
        assert!(!status.shutdown_pending);
        assert_eq!(
            controller.start().await,
            Err(ValidationError::ShutdownInProgress)
        );
        assert_eq!(
            controller.cancel_shutdown().await,
            Err(ValidationError::NoShutdownPending)
        );

        let mut updates = controller.subscribe();
        release.send(()).expect("release");
        updates
            .wait_for(|status| status.state == SessionState::Idle)
            .await
            .expect("idle after execution");
        assert!(controller
            .status(10)
            .await
            .recent_log_entries
            .iter()
            .any(|e| e.message == "Shutdown executed"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_shutdown_result_leaves_a_new_session_alone() {
        let (controller, _, _) = controller();
        controller.start().await.expect("start");
        let old_id = controller.status(0).await.session_id.expect("session id");
        controller.stop().await.expect("stop");
        controller.start().await.expect("restart");

        controller
            .on_shutdown_result(old_id, Err(ShutdownError::Execution("exit status 1".into())))
            .await;

        let status = controller.status(5).await;
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.last_error, None);
        assert!(status
            .recent_log_entries
            .iter()
            .any(|e| e.message.contains("after the session ended")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_input_is_simulated_after_stop_returns() {
        let simulator = Arc::new(WatchedSimulator::default());
        let controller = SessionController::new(
            simulator.clone(),
            Arc::new(RecordingExecutor::default()),
            ControllerConfig {
                activity_interval: Duration::from_millis(1),
                ..Default::default()
            },
        );

        for _ in 0..50 {
            simulator.stopped.store(false, Ordering::SeqCst);
            controller.start().await.expect("start");
            sleep(Duration::from_millis(3)).await;
            controller.stop().await.expect("stop");
            simulator.stopped.store(true, Ordering::SeqCst);
            sleep(Duration::from_millis(2)).await;
        }

        controller.close().await;
        assert_eq!(simulator.late_calls.load(Ordering::SeqCst), 0);
    }
}
