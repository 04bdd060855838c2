//! Session engine: the guided-workout state machine.
//!
//! ## Phases
//!
//! ```text
//! idle -> running <-> paused
//!         running -> resting -> running
//!         (running | paused | resting) -> ended -> idle (after a grace delay)
//! ```
//!
//! The engine is driven from a single serialized context: clock ticks,
//! remote commands and direct calls all arrive through `&mut self`.
//! Operations that don't apply to the current phase return `false` and
//! change nothing, because the timer, a paired device and the user can all
//! race to request the same transition.
//!
//! Every observable mutation bumps [`SessionState::version`] exactly once
//! and publishes a snapshot to the broadcast gateway.

use crate::broadcast::{DeviceBroadcastGateway, NullGateway, SessionSnapshot, StepDisplay};
use crate::clock::{Clock, TimerToken};
use crate::commands::{Acknowledgment, RemoteCommand, NO_ACTIVE_SESSION, UNKNOWN_COMMAND};
use crate::config::{Config, SessionConfig, SimulationConfig};
use crate::cues::{CountdownCue, NoCues};
use crate::execution_log::{ExecutionLogAccumulator, ExecutionRecord, SetRecord, Stamp, StepStatus};
use crate::health::{HealthMetricsSource, NoHealthData, SyntheticHealthSource};
use crate::plan::WorkoutPlan;
use crate::progress::{MemoryProgressStore, ProgressStore, SavedProgress};
use crate::report::{CompletionReport, ReportSink, SetLog, SubmitOutcome};
use crate::sequencer::flatten;
use crate::types::{EndReason, FlattenedStep, Phase, RestAfter, SessionState};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// One logical second of session time
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of handing the completion report to the sink
pub type SubmissionResult = std::result::Result<SubmitOutcome, String>;

/// Timing and simulation settings for the engine
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub simulation: SimulationConfig,
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            session: config.session.clone(),
            simulation: config.simulation.clone(),
        }
    }
}

/// External collaborators the engine talks to
pub struct Collaborators {
    pub clock: Box<dyn Clock>,
    pub reports: Box<dyn ReportSink>,
    pub gateway: Box<dyn DeviceBroadcastGateway>,
    pub health: Box<dyn HealthMetricsSource>,
    pub cues: Box<dyn CountdownCue>,
    pub progress: Box<dyn ProgressStore>,
}

impl Collaborators {
    /// Clock and report sink are required; everything else starts silent
    pub fn new(clock: impl Clock + 'static, reports: impl ReportSink + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            reports: Box::new(reports),
            gateway: Box::new(NullGateway),
            health: Box::new(NoHealthData),
            cues: Box::new(NoCues),
            progress: Box::new(MemoryProgressStore::new()),
        }
    }

    pub fn with_gateway(mut self, gateway: impl DeviceBroadcastGateway + 'static) -> Self {
        self.gateway = Box::new(gateway);
        self
    }

    pub fn with_health(mut self, health: impl HealthMetricsSource + 'static) -> Self {
        self.health = Box::new(health);
        self
    }

    pub fn with_cues(mut self, cues: impl CountdownCue + 'static) -> Self {
        self.cues = Box::new(cues);
        self
    }

    pub fn with_progress_store(mut self, progress: impl ProgressStore + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }
}

#[derive(Clone, Debug)]
struct ActiveSession {
    id: Uuid,
    name: String,
    plan: WorkoutPlan,
    started_at: DateTime<Utc>,
    simulated: bool,
}

/// Values the user reports after finishing a set
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetEntry {
    pub reps_completed: Option<u32>,
    pub weight: Option<f64>,
    pub rpe: Option<u8>,
}

pub struct SessionEngine {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    reports: Box<dyn ReportSink>,
    gateway: Box<dyn DeviceBroadcastGateway>,
    health: Box<dyn HealthMetricsSource>,
    synthetic_health: SyntheticHealthSource,
    cues: Box<dyn CountdownCue>,
    progress: Box<dyn ProgressStore>,

    state: SessionState,
    steps: Vec<FlattenedStep>,
    session: Option<ActiveSession>,
    /// The only timer the engine will accept ticks from
    timer: Option<TimerToken>,
    /// Ticks left before a countdown that reached zero advances
    advance_in: Option<u32>,
    log: ExecutionLogAccumulator,
    set_logs: Vec<SetLog>,
    last_submission: Option<SubmissionResult>,
}

impl SessionEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            clock: collaborators.clock,
            reports: collaborators.reports,
            gateway: collaborators.gateway,
            health: collaborators.health,
            synthetic_health: SyntheticHealthSource,
            cues: collaborators.cues,
            progress: collaborators.progress,
            state: SessionState::default(),
            steps: Vec::new(),
            session: None,
            timer: None,
            advance_in: None,
            log: ExecutionLogAccumulator::new(),
            set_logs: Vec::new(),
            last_submission: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn steps(&self) -> &[FlattenedStep] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&FlattenedStep> {
        self.steps.get(self.state.current_step_index)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn is_simulated(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.simulated)
    }

    /// Records accumulated so far in the running session
    pub fn execution_records(&self) -> &[ExecutionRecord] {
        self.log.records()
    }

    /// What happened to the most recent completion report
    pub fn last_submission(&self) -> Option<&SubmissionResult> {
        self.last_submission.as_ref()
    }

    /// Turn the accelerated, unattended mode on or off for later sessions
    pub fn set_simulation(&mut self, enabled: bool) {
        self.config.simulation.enabled = enabled;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id(),
            state: self.state.clone(),
            total_steps: self.steps.len(),
            step: self.current_step().map(StepDisplay::from),
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Start a fresh session, ending any active one first
    pub fn start(&mut self, plan: WorkoutPlan) {
        self.begin(plan, None);
    }

    /// Start a session seeded from saved progress
    ///
    /// The step index is clamped to the plan's bounds.
    pub fn resume_from(&mut self, plan: WorkoutPlan, saved: &SavedProgress) {
        self.begin(plan, Some(saved));
    }

    fn begin(&mut self, plan: WorkoutPlan, saved: Option<&SavedProgress>) {
        if !self.state.phase.accepts_start() {
            tracing::info!("Starting a new session while one is active, ending it first");
            self.end(EndReason::UserEnded);
        }
        self.cancel_timer();

        if let Err(e) = self.progress.clear() {
            tracing::warn!("Failed to clear saved progress: {}", e);
        }

        let simulated = self.config.simulation.enabled;
        self.clock.set_speed_multiplier(if simulated {
            self.config.simulation.speed_multiplier
        } else {
            1.0
        });

        let now = Utc::now();
        self.steps = flatten(&plan);
        self.session = Some(ActiveSession {
            id: saved.map(|s| s.session_id).unwrap_or_else(Uuid::new_v4),
            name: plan.name.clone(),
            plan,
            started_at: now,
            simulated,
        });
        self.log.reset();
        self.log.plan(&self.steps);
        self.set_logs.clear();
        self.last_submission = None;
        self.advance_in = None;

        let last_index = self.steps.len().saturating_sub(1);
        let (index, elapsed) = match saved {
            Some(s) => (s.current_step_index.min(last_index), s.elapsed_seconds),
            None => (0, 0),
        };
        self.state = SessionState {
            phase: Phase::Running,
            elapsed_seconds: elapsed,
            version: self.state.version,
            ..SessionState::default()
        };

        if simulated {
            self.synthetic_health.session_started(now);
        } else {
            self.health.session_started(now);
        }

        tracing::info!(
            "Session {:?} started with {} steps (simulated: {})",
            self.session.as_ref().map(|s| s.name.as_str()).unwrap_or_default(),
            self.steps.len(),
            simulated
        );

        if self.steps.is_empty() {
            tracing::warn!("Plan has no steps, ending session immediately");
            self.end(EndReason::Discarded);
            return;
        }

        self.enter_step(index);
        self.commit();
    }

    /// End the session
    ///
    /// Completed, user-ended and errored sessions hand a report to the sink;
    /// saved-for-later sessions persist a resumable record instead;
    /// discarded sessions leave nothing behind.
    pub fn end(&mut self, reason: EndReason) -> bool {
        if !self.state.phase.is_active() {
            return false;
        }
        // Cancel before touching the phase so no late tick sees post-end state.
        self.cancel_timer();

        let stamp = self.stamp();
        if reason != EndReason::Completed {
            self.log.end_step_skipped("session_ended", stamp);
        }

        self.state.phase = Phase::Ended;
        self.state.end_reason = Some(reason);
        self.state.remaining_seconds = None;
        self.state.rest_remaining_seconds = None;
        self.state.is_manual_rest = false;
        self.advance_in = None;

        tracing::info!(
            "Session ended ({:?}) after {}s",
            reason,
            self.state.elapsed_seconds
        );

        match reason {
            r if r.submits_report() => self.submit_report(reason, stamp),
            EndReason::SavedForLater => self.save_progress(),
            _ => {}
        }
        if matches!(reason, EndReason::Discarded | EndReason::SavedForLater) {
            self.log.reset();
            self.set_logs.clear();
        }

        self.commit();
        self.arm_idle_grace();
        true
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn pause(&mut self) -> bool {
        if self.state.phase != Phase::Running {
            return false;
        }
        self.cancel_timer();
        self.state.phase = Phase::Paused;
        self.commit();
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state.phase != Phase::Paused {
            return false;
        }
        self.state.phase = Phase::Running;
        self.arm_timer();
        self.commit();
        true
    }

    /// Finish the current step
    ///
    /// A step with a trailing rest goes to `resting` first; the final step
    /// ends the session as completed. While paused the rest is skipped and
    /// the session stays paused on the next step.
    pub fn next_step(&mut self) -> bool {
        if !self.state.phase.is_active() {
            return false;
        }
        let rest = match self.current_step() {
            Some(step) => step.rest_after,
            None => return false,
        };

        if self.state.phase == Phase::Running && rest.is_declared() && !self.is_last_step() {
            let stamp = self.stamp();
            self.log.end_step(StepStatus::Completed, stamp);
            self.enter_rest_phase(rest);
        } else {
            self.advance();
        }
        true
    }

    /// User confirms they are ready after resting
    pub fn complete_rest(&mut self) -> bool {
        if self.state.phase != Phase::Resting {
            return false;
        }
        tracing::debug!("Rest completed");
        self.advance();
        true
    }

    pub fn skip_rest(&mut self) -> bool {
        if self.state.phase != Phase::Resting {
            return false;
        }
        tracing::debug!(
            "Rest skipped with {:?}s remaining",
            self.state.rest_remaining_seconds
        );
        self.advance();
        true
    }

    pub fn previous_step(&mut self) -> bool {
        if !self.state.phase.is_active() || self.state.current_step_index == 0 {
            return false;
        }
        self.move_to(self.state.current_step_index - 1, "navigated_back");
        true
    }

    /// Jump to a zero-based step index; out-of-range indices are ignored
    pub fn skip_to_step(&mut self, index: usize) -> bool {
        if !self.state.phase.is_active()
            || index >= self.steps.len()
            || index == self.state.current_step_index
        {
            return false;
        }
        self.move_to(index, "jumped");
        true
    }

    /// Flag the current step as performed differently than planned
    pub fn mark_modified(&mut self) -> bool {
        if !self.state.phase.is_active() {
            return false;
        }
        match self.current_step() {
            Some(step) => {
                let index = step.index;
                self.log.mark_modified(index)
            }
            None => false,
        }
    }

    /// Record a finished set against the current step
    pub fn log_set(&mut self, entry: SetEntry) -> bool {
        if !self.state.phase.is_active() {
            return false;
        }
        let Some(step) = self.steps.get(self.state.current_step_index) else {
            return false;
        };

        let set_number = step.set_number.unwrap_or(1);
        let record = SetRecord {
            set_number,
            status: StepStatus::Completed,
            reps_planned: step.planned_reps(),
            reps_completed: entry.reps_completed,
            weight: entry.weight,
            duration_seconds: None,
            rpe: entry.rpe,
        };
        if !self.log.log_set(step.index, record) {
            return false;
        }

        self.set_logs.push(SetLog {
            step_index: step.index,
            exercise: step.display_label.clone(),
            set_number: step.set_number,
            reps_completed: entry.reps_completed,
            weight: entry.weight,
            rpe: entry.rpe,
            logged_at: Utc::now(),
        });
        true
    }

    /// Map a remote command string onto the operations above
    pub fn dispatch_remote(&mut self, raw: &str, correlation_id: &str) -> Acknowledgment {
        let Some(command) = RemoteCommand::parse(raw) else {
            tracing::warn!("Unknown remote command {:?}", raw);
            return Acknowledgment::error(correlation_id, raw.trim(), UNKNOWN_COMMAND);
        };

        if !self.state.phase.is_active() {
            return if command == RemoteCommand::End {
                Acknowledgment::success(correlation_id, command.as_str())
            } else {
                Acknowledgment::error(correlation_id, command.as_str(), NO_ACTIVE_SESSION)
            };
        }

        let changed = match command {
            RemoteCommand::Pause => self.pause(),
            RemoteCommand::Resume => self.resume(),
            RemoteCommand::NextStep => self.next_step(),
            RemoteCommand::PreviousStep => self.previous_step(),
            RemoteCommand::SkipRest => self.skip_rest(),
            RemoteCommand::End => self.end(EndReason::UserEnded),
        };
        tracing::debug!("Remote {} applied (changed: {})", command.as_str(), changed);
        Acknowledgment::success(correlation_id, command.as_str())
    }

    // ── Ticks ────────────────────────────────────────────────────────

    /// Handle one tick from the clock
    ///
    /// Ticks from any timer other than the one currently armed are ignored.
    pub fn on_tick(&mut self, token: TimerToken) {
        if self.timer != Some(token) {
            tracing::trace!("Ignoring tick from stale timer {}", token.id());
            return;
        }

        match self.state.phase {
            Phase::Running => self.tick_running(),
            Phase::Resting => self.tick_resting(),
            Phase::Ended => self.reset_to_idle(),
            Phase::Idle | Phase::Paused => {}
        }
    }

    fn tick_running(&mut self) {
        self.state.elapsed_seconds += 1;
        if self.advance_due() {
            self.next_step();
            return;
        }

        if let Some(remaining) = self.state.remaining_seconds {
            let remaining = remaining.saturating_sub(1);
            self.state.remaining_seconds = Some(remaining);
            self.countdown_cue(remaining, false);
            if remaining == 0 && self.schedule_advance() {
                self.next_step();
                return;
            }
        }
        self.commit();
    }

    fn tick_resting(&mut self) {
        self.state.elapsed_seconds += 1;
        if self.advance_due() {
            self.complete_rest();
            return;
        }

        if let Some(remaining) = self.state.rest_remaining_seconds {
            let remaining = remaining.saturating_sub(1);
            self.state.rest_remaining_seconds = Some(remaining);
            self.countdown_cue(remaining, true);
            if remaining == 0 && self.schedule_advance() {
                self.complete_rest();
                return;
            }
        }
        self.commit();
    }

    /// Counts down a pending advance; true when it should happen now
    fn advance_due(&mut self) -> bool {
        match self.advance_in {
            Some(n) if n <= 1 => {
                self.advance_in = None;
                true
            }
            Some(n) => {
                self.advance_in = Some(n - 1);
                false
            }
            None => false,
        }
    }

    /// Defers the advance by the configured grace; true if there is none
    fn schedule_advance(&mut self) -> bool {
        if self.advance_in.is_some() {
            return false;
        }
        match self.config.session.advance_grace_ticks {
            0 => true,
            ticks => {
                self.advance_in = Some(ticks);
                false
            }
        }
    }

    fn countdown_cue(&mut self, remaining: u32, resting: bool) {
        if remaining >= 1 && remaining <= self.config.session.countdown_cue_seconds {
            self.cues.countdown(remaining, resting);
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn stamp(&self) -> Stamp {
        Stamp::now(self.state.elapsed_seconds)
    }

    fn is_last_step(&self) -> bool {
        self.state.current_step_index + 1 >= self.steps.len()
    }

    /// Close the current step and move on, ending after the last one
    fn advance(&mut self) {
        let stamp = self.stamp();
        self.log.end_step(StepStatus::Completed, stamp);

        if self.is_last_step() {
            self.end(EndReason::Completed);
            return;
        }

        if self.state.phase == Phase::Resting {
            self.state.phase = Phase::Running;
        }
        self.enter_step(self.state.current_step_index + 1);
        self.commit();
    }

    fn enter_rest_phase(&mut self, rest: RestAfter) {
        let simulated = self.is_simulated();
        let countdown = match rest {
            RestAfter::None | RestAfter::Seconds(0) => {
                self.advance();
                return;
            }
            RestAfter::Seconds(secs) => Some(secs),
            // Unattended runs never block on a human.
            RestAfter::Manual if simulated => Some(self.config.simulation.synthetic_rest_seconds),
            RestAfter::Manual => None,
        };
        if countdown == Some(0) {
            self.advance();
            return;
        }

        self.state.phase = Phase::Resting;
        self.state.remaining_seconds = None;
        self.state.rest_remaining_seconds = countdown;
        self.state.is_manual_rest = countdown.is_none();
        self.advance_in = None;
        self.arm_timer();

        tracing::debug!(
            "Resting after step {} ({})",
            self.state.current_step_index + 1,
            countdown.map_or_else(|| "manual".to_string(), |s| format!("{}s", s))
        );
        self.commit();
    }

    /// Leave the current step for another one chosen by the user
    fn move_to(&mut self, target: usize, reason: &str) {
        let stamp = self.stamp();
        let current = self.state.current_step_index;
        self.log.end_step_skipped(reason, stamp);
        if target > current {
            for step in &self.steps[current + 1..target] {
                self.log.skip_step(step, "jumped_over", stamp);
            }
        }

        if self.state.phase == Phase::Resting {
            self.state.phase = Phase::Running;
        }
        self.enter_step(target);
        self.commit();
    }

    /// Point the session at a step and set up its timer
    fn enter_step(&mut self, index: usize) {
        let Some(step) = self.steps.get(index) else {
            return;
        };

        let synthetic = self
            .is_simulated()
            .then_some(self.config.simulation.synthetic_step_seconds)
            .filter(|secs| *secs > 0);
        let remaining = step.work_seconds().or(synthetic);

        self.log.start_step(step, Stamp::now(self.state.elapsed_seconds));
        tracing::debug!("Step {}: {}", step.index, step.display_label);

        self.state.current_step_index = index;
        self.state.remaining_seconds = remaining;
        self.state.rest_remaining_seconds = None;
        self.state.is_manual_rest = false;
        self.advance_in = None;

        if self.state.phase == Phase::Running {
            self.arm_timer();
        }
    }

    fn arm_timer(&mut self) {
        self.clock.invalidate();
        self.timer = Some(self.clock.schedule_repeating(TICK_INTERVAL));
    }

    fn cancel_timer(&mut self) {
        self.clock.invalidate();
        self.timer = None;
    }

    /// The grace delay is wall-clock time, so the clock's speed-up is
    /// undone for this one timer.
    fn arm_idle_grace(&mut self) {
        let grace = self.config.session.idle_grace_seconds;
        if grace == 0 {
            self.reset_to_idle();
            return;
        }
        let interval =
            Duration::from_secs(u64::from(grace)).mul_f64(self.clock.speed_multiplier());
        self.clock.invalidate();
        self.timer = Some(self.clock.schedule_repeating(interval));
    }

    fn reset_to_idle(&mut self) {
        self.cancel_timer();
        self.steps.clear();
        self.session = None;
        self.log.reset();
        self.set_logs.clear();
        self.advance_in = None;
        self.state = SessionState {
            version: self.state.version,
            ..SessionState::default()
        };
        tracing::debug!("Session state reset to idle");
        self.commit();
    }

    fn submit_report(&mut self, reason: EndReason, stamp: Stamp) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let duration_seconds = self.state.elapsed_seconds;
        let health = if session.simulated {
            self.synthetic_health.collect(session.started_at, duration_seconds)
        } else {
            self.health.collect(session.started_at, duration_seconds)
        };

        let report = CompletionReport {
            session_id: session.id,
            name: session.name.clone(),
            started_at: session.started_at,
            ended_at: stamp.at,
            duration_seconds,
            end_reason: reason,
            health,
            plan_snapshot: session.plan.clone(),
            execution_log: self.log.build(stamp),
            set_logs: self.set_logs.clone(),
            simulated: session.simulated,
        };

        let result = match self.reports.submit(report) {
            Ok(outcome) => {
                tracing::info!("Completion report handed off: {:?}", outcome);
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!("Workout completion couldn't be sent yet: {}", e);
                Err(e.to_string())
            }
        };
        self.last_submission = Some(result);
    }

    fn save_progress(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let progress = SavedProgress {
            session_id: session.id,
            name: session.name.clone(),
            current_step_index: self.state.current_step_index,
            elapsed_seconds: self.state.elapsed_seconds,
            saved_at: Utc::now(),
            plan: session.plan.clone(),
        };
        match self.progress.save(&progress) {
            Ok(()) => tracing::info!(
                "Saved progress at step {} for later",
                progress.current_step_index + 1
            ),
            Err(e) => tracing::warn!("Failed to save progress: {}", e),
        }
    }

    fn commit(&mut self) {
        self.state.version += 1;
        let snapshot = self.snapshot();
        self.gateway.publish(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, ManualClockHandle};
    use crate::plan::IntervalNode;
    use crate::Error;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<CompletionReport>>,
    }

    impl RecordingSink {
        fn reports(&self) -> Vec<CompletionReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl ReportSink for RecordingSink {
        fn submit(&self, report: CompletionReport) -> crate::Result<SubmitOutcome> {
            self.reports.lock().unwrap().push(report);
            Ok(SubmitOutcome::Delivered)
        }
    }

    struct FailingSink;

    impl ReportSink for FailingSink {
        fn submit(&self, _report: CompletionReport) -> crate::Result<SubmitOutcome> {
            Err(Error::Delivery("connection refused".into()))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingGateway(Arc<Mutex<Vec<SessionSnapshot>>>);

    impl DeviceBroadcastGateway for RecordingGateway {
        fn publish(&mut self, snapshot: &SessionSnapshot) {
            self.0.lock().unwrap().push(snapshot.clone());
        }
    }

    #[derive(Clone, Default)]
    struct RecordingCues(Arc<Mutex<Vec<(u32, bool)>>>);

    impl CountdownCue for RecordingCues {
        fn countdown(&mut self, seconds_left: u32, resting: bool) {
            self.0.lock().unwrap().push((seconds_left, resting));
        }
    }

    struct Harness {
        engine: SessionEngine,
        clock: ManualClockHandle,
        sink: Arc<RecordingSink>,
        snapshots: RecordingGateway,
        cues: RecordingCues,
        progress: MemoryProgressStore,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let (clock, handle) = ManualClock::new();
            let sink = Arc::new(RecordingSink::default());
            let snapshots = RecordingGateway::default();
            let cues = RecordingCues::default();
            let progress = MemoryProgressStore::new();

            let collaborators = Collaborators::new(clock, Arc::clone(&sink))
                .with_gateway(snapshots.clone())
                .with_cues(cues.clone())
                .with_progress_store(progress.clone());

            Self {
                engine: SessionEngine::new(config, collaborators),
                clock: handle,
                sink,
                snapshots,
                cues,
                progress,
            }
        }

        fn tick(&mut self, n: u32) {
            for _ in 0..n {
                let token = self.clock.armed().expect("a timer should be armed");
                self.engine.on_tick(token);
            }
        }

        fn versions(&self) -> Vec<u64> {
            self.snapshots
                .0
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.version())
                .collect()
        }
    }

    fn default_harness() -> Harness {
        Harness::new(EngineConfig::default())
    }

    fn simulated_harness() -> Harness {
        let mut config = EngineConfig::default();
        config.simulation.enabled = true;
        Harness::new(config)
    }

    fn reps(name: &str, sets: Option<u32>, rest_seconds: Option<u32>) -> IntervalNode {
        IntervalNode::Reps {
            sets,
            reps: 10,
            name: name.into(),
            load: None,
            rest_seconds,
            media_url: None,
        }
    }

    fn warmup(secs: u32) -> IntervalNode {
        IntervalNode::Warmup {
            duration_seconds: secs,
            target: None,
        }
    }

    fn timed(secs: u32) -> IntervalNode {
        IntervalNode::Timed {
            duration_seconds: secs,
            target: None,
        }
    }

    fn scenario_a_plan() -> WorkoutPlan {
        WorkoutPlan::new("Legs", vec![warmup(30), reps("Squat", Some(3), Some(30))])
    }

    #[test]
    fn test_scenario_a_timer_auto_advances() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());

        assert_eq!(h.engine.steps().len(), 4);
        assert_eq!(h.engine.steps()[1].rest_after_seconds(), Some(30));
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().remaining_seconds, Some(30));

        h.tick(30);
        assert_eq!(h.engine.state().remaining_seconds, Some(0));
        assert_eq!(h.engine.state().current_step_index, 0);

        h.tick(1);
        assert_eq!(h.engine.state().current_step_index, 1);
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.current_step().unwrap().display_label, "Squat");
    }

    #[test]
    fn test_countdown_cues_for_last_three_seconds() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.tick(31);

        let cues = h.cues.0.lock().unwrap().clone();
        assert_eq!(cues, vec![(3, false), (2, false), (1, false)]);
    }

    #[test]
    fn test_scenario_b_next_on_final_step_completes() {
        let mut h = default_harness();
        h.engine
            .start(WorkoutPlan::new("Short", vec![warmup(10), reps("Press", Some(1), Some(30))]));

        h.tick(11);
        assert_eq!(h.engine.state().current_step_index, 1);
        h.tick(7);
        assert_eq!(h.engine.state().elapsed_seconds, 18);

        assert!(h.engine.next_step());
        assert_eq!(h.engine.phase(), Phase::Ended);
        assert_eq!(h.engine.state().end_reason, Some(EndReason::Completed));

        let reports = h.sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].duration_seconds, 18);
        assert_eq!(reports[0].end_reason, EndReason::Completed);
        assert_eq!(reports[0].execution_log.summary.completed, 2);
        assert_eq!(reports[0].execution_log.summary.completion_percentage, 100.0);
        assert!(matches!(
            h.engine.last_submission(),
            Some(Ok(SubmitOutcome::Delivered))
        ));
    }

    #[test]
    fn test_scenario_c_discard_submits_and_saves_nothing() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.tick(3);

        assert!(h.engine.end(EndReason::Discarded));
        assert_eq!(h.engine.phase(), Phase::Ended);
        assert!(h.sink.reports().is_empty());
        assert!(h.progress.load().unwrap().is_none());
    }

    #[test]
    fn test_saved_for_later_persists_snapshot_and_resumes() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.tick(31);
        h.tick(4);

        assert!(h.engine.end(EndReason::SavedForLater));
        assert!(h.sink.reports().is_empty());

        let saved = h.progress.load().unwrap().expect("progress saved");
        assert_eq!(saved.current_step_index, 1);
        assert_eq!(saved.elapsed_seconds, 35);
        assert_eq!(saved.name, "Legs");

        h.engine.resume_from(saved.plan.clone(), &saved);
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().current_step_index, 1);
        assert_eq!(h.engine.state().elapsed_seconds, 35);
        assert_eq!(h.engine.session_id(), Some(saved.session_id));
        // Resuming consumes the snapshot.
        assert!(h.progress.load().unwrap().is_none());
    }

    #[test]
    fn test_resume_clamps_step_index() {
        let mut h = default_harness();
        let plan = scenario_a_plan();
        let saved = SavedProgress {
            session_id: Uuid::new_v4(),
            name: plan.name.clone(),
            current_step_index: 42,
            elapsed_seconds: 10,
            saved_at: Utc::now(),
            plan: plan.clone(),
        };

        h.engine.resume_from(plan, &saved);
        assert_eq!(h.engine.state().current_step_index, 3);
    }

    #[test]
    fn test_start_clears_saved_progress() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.end(EndReason::SavedForLater);
        assert!(h.progress.load().unwrap().is_some());

        h.engine.start(scenario_a_plan());
        assert!(h.progress.load().unwrap().is_none());
    }

    #[test]
    fn test_manual_rest_waits_and_zero_rest_skips_rest() {
        let mut h = default_harness();
        h.engine.start(WorkoutPlan::new(
            "Superset",
            vec![reps("Curl", None, None), reps("Press", None, Some(0)), timed(10)],
        ));

        assert!(h.engine.next_step());
        assert_eq!(h.engine.phase(), Phase::Resting);
        assert!(h.engine.state().is_manual_rest);
        assert_eq!(h.engine.state().rest_remaining_seconds, None);

        h.tick(20);
        assert_eq!(h.engine.phase(), Phase::Resting);
        assert_eq!(h.engine.state().current_step_index, 0);

        assert!(h.engine.complete_rest());
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().current_step_index, 1);

        // Explicit zero rest: straight to the next step, no resting phase.
        let before = h.versions().len();
        assert!(h.engine.next_step());
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().current_step_index, 2);
        let phases: Vec<Phase> = h.snapshots.0.lock().unwrap()[before..]
            .iter()
            .map(|s| s.state.phase)
            .collect();
        assert!(!phases.contains(&Phase::Resting));
    }

    #[test]
    fn test_timed_rest_counts_down_and_advances() {
        let mut h = default_harness();
        h.engine
            .start(WorkoutPlan::new("Rest", vec![reps("Row", None, Some(5)), timed(10)]));

        h.tick(4);
        assert!(h.engine.next_step());
        assert_eq!(h.engine.phase(), Phase::Resting);
        assert_eq!(h.engine.state().rest_remaining_seconds, Some(5));
        assert!(!h.engine.state().is_manual_rest);

        h.tick(5);
        assert_eq!(h.engine.state().rest_remaining_seconds, Some(0));
        h.tick(1);
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().current_step_index, 1);

        let rest_cues: Vec<_> = h
            .cues
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, resting)| *resting)
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(rest_cues, vec![3, 2, 1]);
    }

    #[test]
    fn test_skip_rest_only_while_resting() {
        let mut h = default_harness();
        h.engine
            .start(WorkoutPlan::new("Rest", vec![reps("Row", None, Some(60)), timed(10)]));

        assert!(!h.engine.skip_rest());
        assert!(!h.engine.complete_rest());
        h.engine.next_step();
        assert!(h.engine.skip_rest());
        assert_eq!(h.engine.state().current_step_index, 1);
        assert_eq!(h.engine.state().rest_remaining_seconds, None);
    }

    #[test]
    fn test_reps_step_without_timer_never_auto_advances() {
        let mut h = default_harness();
        h.engine
            .start(WorkoutPlan::new("Reps", vec![reps("Squat", None, Some(30)), timed(5)]));

        h.tick(120);
        assert_eq!(h.engine.state().current_step_index, 0);
        assert_eq!(h.engine.state().elapsed_seconds, 120);
        assert_eq!(h.engine.state().remaining_seconds, None);
    }

    #[test]
    fn test_simulation_runs_unattended_to_completion() {
        let mut h = simulated_harness();
        h.engine.start(WorkoutPlan::new(
            "Sim",
            vec![
                warmup(5),
                reps("Lunge", Some(2), None),
                IntervalNode::Distance {
                    meters: 400,
                    target: None,
                },
            ],
        ));
        assert_eq!(h.clock.speed_multiplier(), 20.0);
        assert!(h.engine.is_simulated());

        let mut guard = 0;
        while h.engine.phase() != Phase::Ended {
            h.tick(1);
            guard += 1;
            assert!(guard < 500, "simulated session never finished");
        }

        assert_eq!(h.engine.state().end_reason, Some(EndReason::Completed));
        let reports = h.sink.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].simulated);
        assert_eq!(reports[0].health.avg_heart_rate, Some(128));
        assert_eq!(reports[0].execution_log.summary.completed, 4);
    }

    #[test]
    fn test_simulated_manual_rest_gets_synthetic_countdown() {
        let mut h = simulated_harness();
        h.engine
            .start(WorkoutPlan::new("Sim", vec![reps("Curl", None, None), timed(5)]));

        h.engine.next_step();
        assert_eq!(h.engine.phase(), Phase::Resting);
        assert!(!h.engine.state().is_manual_rest);
        assert_eq!(h.engine.state().rest_remaining_seconds, Some(3));
    }

    #[test]
    fn test_versions_strictly_increase() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.tick(5);
        h.engine.pause();
        h.engine.resume();
        h.engine.skip_to_step(2);
        h.engine.previous_step();
        h.engine.next_step();
        h.engine.skip_rest();
        h.engine.end(EndReason::UserEnded);
        h.tick(1);

        let versions = h.versions();
        assert!(versions.len() > 10);
        assert!(versions.windows(2).all(|w| w[0] < w[1]), "{:?}", versions);
        assert_eq!(*versions.last().unwrap(), h.engine.state().version);
    }

    #[test]
    fn test_noop_operations_do_not_bump_version() {
        let mut h = default_harness();
        assert!(!h.engine.pause());
        assert!(!h.engine.next_step());
        assert!(!h.engine.end(EndReason::UserEnded));
        assert_eq!(h.engine.state().version, 0);

        h.engine.start(scenario_a_plan());
        let version = h.engine.state().version;
        assert!(!h.engine.resume());
        assert!(!h.engine.previous_step());
        assert!(!h.engine.skip_to_step(99));
        assert!(!h.engine.skip_rest());
        assert_eq!(h.engine.state().version, version);
    }

    #[test]
    fn test_pause_cancels_timer_and_ignores_stale_ticks() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.tick(2);
        let stale = h.clock.armed().unwrap();

        assert!(h.engine.pause());
        assert_eq!(h.clock.armed(), None);
        h.engine.on_tick(stale);
        assert_eq!(h.engine.state().elapsed_seconds, 2);

        assert!(h.engine.resume());
        assert!(h.clock.armed().is_some());
        assert_ne!(h.clock.armed(), Some(stale));
        h.tick(1);
        assert_eq!(h.engine.state().elapsed_seconds, 3);
    }

    #[test]
    fn test_late_tick_after_end_is_ignored() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        let stale = h.clock.armed().unwrap();

        h.engine.end(EndReason::UserEnded);
        let version = h.engine.state().version;
        h.engine.on_tick(stale);

        assert_eq!(h.engine.phase(), Phase::Ended);
        assert_eq!(h.engine.state().version, version);
    }

    #[test]
    fn test_ended_session_returns_to_idle_after_grace() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.end(EndReason::UserEnded);

        assert_eq!(h.clock.armed_interval(), Some(Duration::from_secs(30)));
        h.tick(1);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.engine.steps().is_empty());
        assert_eq!(h.engine.session_id(), None);
        assert_eq!(h.clock.armed(), None);
    }

    #[test]
    fn test_idle_grace_ignores_simulation_speed() {
        let mut h = simulated_harness();
        h.engine.start(scenario_a_plan());
        h.engine.end(EndReason::UserEnded);

        // 30s of wall-clock time at x20 is 600 clock seconds.
        assert_eq!(h.clock.speed_multiplier(), 20.0);
        assert_eq!(h.clock.armed_interval(), Some(Duration::from_secs(600)));
        h.tick(1);
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_new_session_supersedes_grace_period() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.end(EndReason::Completed);
        let grace = h.clock.armed().unwrap();

        h.engine.start(scenario_a_plan());
        h.engine.on_tick(grace);
        assert_eq!(h.engine.phase(), Phase::Running);
    }

    #[test]
    fn test_start_while_active_ends_previous_as_user_ended() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        let first = h.engine.session_id();
        h.tick(3);

        h.engine.start(scenario_a_plan());
        let reports = h.sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].end_reason, EndReason::UserEnded);
        assert_eq!(Some(reports[0].session_id), first);
        assert_ne!(h.engine.session_id(), first);
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().elapsed_seconds, 0);
    }

    #[test]
    fn test_empty_plan_terminates_immediately() {
        let mut h = default_harness();
        h.engine.start(WorkoutPlan::new("Empty", vec![]));

        assert_eq!(h.engine.phase(), Phase::Ended);
        assert_eq!(h.engine.state().end_reason, Some(EndReason::Discarded));
        assert!(h.sink.reports().is_empty());
    }

    #[test]
    fn test_skip_to_and_previous_step() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());

        assert!(h.engine.skip_to_step(3));
        assert_eq!(h.engine.state().current_step_index, 3);
        assert_eq!(h.engine.state().remaining_seconds, None);

        let records = h.engine.execution_records();
        assert_eq!(records[0].status, StepStatus::Skipped);
        assert_eq!(records[0].skip_reason.as_deref(), Some("jumped"));
        assert_eq!(records[1].skip_reason.as_deref(), Some("jumped_over"));
        assert_eq!(records[2].skip_reason.as_deref(), Some("jumped_over"));

        assert!(h.engine.previous_step());
        assert_eq!(h.engine.state().current_step_index, 2);
        assert!(h.engine.skip_to_step(0));
        assert_eq!(h.engine.state().remaining_seconds, Some(30));
        assert!(!h.engine.previous_step());
        assert!(!h.engine.skip_to_step(4));
    }

    #[test]
    fn test_previous_step_leaves_rest() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.skip_to_step(1);
        h.engine.next_step();
        assert_eq!(h.engine.phase(), Phase::Resting);

        assert!(h.engine.previous_step());
        assert_eq!(h.engine.phase(), Phase::Running);
        assert_eq!(h.engine.state().current_step_index, 0);
        assert_eq!(h.engine.state().rest_remaining_seconds, None);
    }

    #[test]
    fn test_navigation_while_paused_stays_paused() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.pause();

        assert!(h.engine.skip_to_step(2));
        assert_eq!(h.engine.phase(), Phase::Paused);
        assert_eq!(h.clock.armed(), None);
    }

    #[test]
    fn test_next_step_while_paused_skips_rest_and_stays_paused() {
        let mut h = default_harness();
        h.engine
            .start(WorkoutPlan::new("Rest", vec![reps("Row", None, Some(30)), timed(10)]));
        assert!(h.engine.pause());

        assert!(h.engine.next_step());
        assert_eq!(h.engine.phase(), Phase::Paused);
        assert_eq!(h.engine.state().current_step_index, 1);
        assert_eq!(h.engine.state().rest_remaining_seconds, None);
        assert_eq!(h.clock.armed(), None);

        assert!(h.engine.resume());
        assert_eq!(h.engine.state().remaining_seconds, Some(10));
        assert!(h.clock.armed().is_some());
    }

    #[test]
    fn test_revisited_step_counts_once_in_summary() {
        let mut h = default_harness();
        h.engine.start(WorkoutPlan::new("Twice", vec![timed(2), timed(2)]));

        h.tick(3);
        assert_eq!(h.engine.state().current_step_index, 1);
        assert!(h.engine.previous_step());
        h.tick(3);
        h.tick(3);
        assert_eq!(h.engine.state().end_reason, Some(EndReason::Completed));

        let summary = &h.sink.reports()[0].execution_log.summary;
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.completion_percentage, 100.0);
    }

    #[test]
    fn test_remote_commands_acknowledge() {
        let mut h = default_harness();

        let ack = h.engine.dispatch_remote("PAUSE", "c-1");
        assert_eq!(ack.error_code(), Some(NO_ACTIVE_SESSION));
        assert!(h.engine.dispatch_remote("END", "c-2").is_success());

        h.engine.start(scenario_a_plan());
        let ack = h.engine.dispatch_remote("DANCE", "c-3");
        assert_eq!(ack.error_code(), Some(UNKNOWN_COMMAND));
        assert_eq!(ack.correlation_id, "c-3");

        assert!(h.engine.dispatch_remote("PAUSE", "c-4").is_success());
        assert_eq!(h.engine.phase(), Phase::Paused);
        assert!(h.engine.dispatch_remote("RESUME", "c-5").is_success());
        assert_eq!(h.engine.phase(), Phase::Running);
        assert!(h.engine.dispatch_remote("NEXT_STEP", "c-6").is_success());
        assert_eq!(h.engine.state().current_step_index, 1);
        assert!(h.engine.dispatch_remote("PREV_STEP", "c-7").is_success());
        assert_eq!(h.engine.state().current_step_index, 0);
        // No rest to skip: still acknowledged.
        assert!(h.engine.dispatch_remote("SKIP_REST", "c-8").is_success());

        assert!(h.engine.dispatch_remote("END", "c-9").is_success());
        assert_eq!(h.engine.state().end_reason, Some(EndReason::UserEnded));
        assert_eq!(h.sink.reports().len(), 1);
    }

    #[test]
    fn test_logged_sets_reach_report() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.skip_to_step(1);

        assert!(h.engine.log_set(SetEntry {
            reps_completed: Some(9),
            weight: Some(80.0),
            rpe: Some(8),
        }));
        assert!(h.engine.mark_modified());
        h.engine.end(EndReason::UserEnded);

        let report = &h.sink.reports()[0];
        assert_eq!(report.set_logs.len(), 1);
        assert_eq!(report.set_logs[0].exercise, "Squat");
        assert_eq!(report.set_logs[0].set_number, Some(1));

        let record = report
            .execution_log
            .records
            .iter()
            .find(|r| r.step_index == 2)
            .unwrap();
        assert_eq!(record.sets[0].reps_planned, Some(10));
        assert_eq!(record.sets[0].reps_completed, Some(9));
        assert_eq!(report.execution_log.summary.not_reached, 2);
    }

    #[test]
    fn test_delivery_failure_does_not_block_ending() {
        let (clock, _handle) = ManualClock::new();
        let mut engine =
            SessionEngine::new(EngineConfig::default(), Collaborators::new(clock, FailingSink));
        engine.start(scenario_a_plan());

        assert!(engine.end(EndReason::UserEnded));
        assert_eq!(engine.phase(), Phase::Ended);
        assert!(matches!(engine.last_submission(), Some(Err(_))));
    }

    #[test]
    fn test_snapshot_carries_step_display() {
        let mut h = default_harness();
        h.engine.start(scenario_a_plan());
        h.engine.skip_to_step(2);

        let snapshot = h.engine.snapshot();
        assert_eq!(snapshot.total_steps, 4);
        let step = snapshot.step.unwrap();
        assert_eq!(step.index, 3);
        assert_eq!(step.set_number, Some(2));
        assert_eq!(snapshot.session_id, h.engine.session_id());
    }
}
