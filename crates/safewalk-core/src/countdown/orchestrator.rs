//! Countdown service task and its handle.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AlertEvent, AlertOutcome, ArmSource, Countdown, CountdownError, CountdownSnapshot,
    CountdownState, FireCause, FiringReport, Tick, TickOutcome, Ticker, TriggerSignal,
    TICK_PERIOD,
};
use crate::alert::AlertDispatcher;
use crate::config::{AfterFirePolicy, CountdownConfig};
use crate::location::LocationResolver;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Arm,
    Disarm,
    Signal(TriggerSignal),
}

#[derive(Debug)]
struct Request {
    command: Command,
    reply: oneshot::Sender<CountdownSnapshot>,
}

/// Location resolution followed by alert dispatch.
#[derive(Clone)]
pub struct FiringPipeline {
    resolver: LocationResolver,
    dispatcher: AlertDispatcher,
}

impl FiringPipeline {
    /// Combine a resolver and a dispatcher.
    #[must_use]
    pub fn new(resolver: LocationResolver, dispatcher: AlertDispatcher) -> Self {
        Self {
            resolver,
            dispatcher,
        }
    }

    /// Run one firing. A failed location lookup does not prevent the send.
    pub async fn run(&self, cause: FireCause) -> FiringReport {
        let fired_at = Utc::now();
        let (location, location_error) = match self.resolver.resolve().await {
            Ok(location) => (Some(location), None),
            Err(error) => {
                warn!(%error, "Sending alert without location");
                (None, Some(error.to_string()))
            }
        };
        let outcome = self
            .dispatcher
            .dispatch(location.map(|resolved| resolved.coordinate))
            .await
            .into();

        FiringReport {
            fired_at,
            cause,
            location,
            location_error,
            outcome,
        }
    }
}

/// Owns the countdown and serializes every transition.
///
/// User commands, peripheral signals and ticks are handled one at a time on a
/// single task. While firing, incoming commands are answered with the current
/// snapshot and otherwise ignored.
pub struct AlertOrchestrator {
    countdown: Countdown,
    ticker: Ticker,
    ticks: mpsc::Receiver<Tick>,
    pipeline: FiringPipeline,
    auto_arm: bool,
    after_fire: AfterFirePolicy,
    last_firing: Option<FiringReport>,
    snapshot_tx: watch::Sender<CountdownSnapshot>,
    events_tx: broadcast::Sender<AlertEvent>,
}

impl AlertOrchestrator {
    /// Create an orchestrator ticking once per second.
    #[must_use]
    pub fn new(config: &CountdownConfig, pipeline: FiringPipeline) -> Self {
        Self::with_tick_period(config, pipeline, TICK_PERIOD)
    }

    /// Create an orchestrator with a custom tick period.
    #[must_use]
    pub fn with_tick_period(
        config: &CountdownConfig,
        pipeline: FiringPipeline,
        period: Duration,
    ) -> Self {
        let countdown = Countdown::new(config.total_seconds);
        let (ticker, ticks) = Ticker::new(period);
        let (snapshot_tx, _) = watch::channel(CountdownSnapshot {
            state: countdown.state(),
            remaining_seconds: countdown.remaining_seconds(),
            total_seconds: countdown.total_seconds(),
            last_firing: None,
        });
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            countdown,
            ticker,
            ticks,
            pipeline,
            auto_arm: config.auto_arm_on_start,
            after_fire: config.after_fire,
            last_firing: None,
            snapshot_tx,
            events_tx,
        }
    }

    /// Spawn the service task.
    ///
    /// The task stops once every [`CountdownHandle`] is dropped; aborting the
    /// returned join handle also cancels the tick source.
    #[must_use]
    pub fn spawn(self) -> (CountdownHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = CountdownHandle {
            commands: commands_tx,
            snapshot: self.snapshot_tx.subscribe(),
            events: self.events_tx.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        info!(
            total_seconds = self.countdown.total_seconds(),
            auto_arm = self.auto_arm,
            "Countdown service started"
        );
        if self.auto_arm {
            self.arm(ArmSource::Startup);
        }

        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(request) = request else { break };
                    let fire = self.apply(request.command);
                    let _ = request.reply.send(self.snapshot());
                    if let Some(cause) = fire {
                        self.fire(cause, &mut commands).await;
                    }
                }
                Some(tick) = self.ticks.recv() => {
                    if self.on_tick(tick) {
                        self.fire(FireCause::CountdownExpired, &mut commands).await;
                    }
                }
            }
        }

        self.ticker.cancel();
        info!("Countdown service stopped");
    }

    fn apply(&mut self, command: Command) -> Option<FireCause> {
        match command {
            Command::Arm => self.arm(ArmSource::User),
            Command::Disarm => self.disarm(),
            Command::Signal(TriggerSignal::Arm) => {
                if self.countdown.state() == CountdownState::Armed {
                    debug!("Peripheral arm ignored, countdown already running");
                } else {
                    self.arm(ArmSource::Peripheral);
                }
            }
            Command::Signal(TriggerSignal::Panic) => {
                if self.countdown.fire_now() {
                    return Some(FireCause::PeripheralPanic);
                }
            }
        }
        None
    }

    fn arm(&mut self, source: ArmSource) {
        if !self.countdown.arm() {
            debug!(?source, "Arm refused while firing");
            return;
        }
        self.ticker.start();
        info!(?source, seconds = self.countdown.total_seconds(), "Countdown armed");
        let _ = self.events_tx.send(AlertEvent::Armed { source });
        self.publish();
    }

    fn disarm(&mut self) {
        if !self.countdown.disarm() {
            debug!(state = ?self.countdown.state(), "Disarm ignored");
            return;
        }
        self.ticker.cancel();
        info!(
            remaining_seconds = self.countdown.remaining_seconds(),
            "Countdown disarmed"
        );
        let _ = self.events_tx.send(AlertEvent::Disarmed);
        self.publish();
    }

    /// Returns `true` when the tick expired the countdown.
    fn on_tick(&mut self, tick: Tick) -> bool {
        if !self.ticker.is_current(tick) {
            debug!(generation = tick.generation, "Dropping stale tick");
            return false;
        }
        match self.countdown.tick() {
            TickOutcome::Ignored => false,
            TickOutcome::Counting(remaining) => {
                debug!(remaining, "Tick");
                self.publish();
                false
            }
            TickOutcome::Expired => true,
        }
    }

    async fn fire(&mut self, cause: FireCause, commands: &mut mpsc::Receiver<Request>) {
        self.ticker.cancel();
        warn!(?cause, "Alert firing");
        let _ = self.events_tx.send(AlertEvent::FiringStarted { cause });
        self.publish();

        let busy = self.snapshot();
        let report = {
            let firing = self.pipeline.run(cause);
            tokio::pin!(firing);
            let mut accepting = true;
            loop {
                tokio::select! {
                    report = &mut firing => break report,
                    request = commands.recv(), if accepting => match request {
                        Some(request) => {
                            info!(command = ?request.command, "Ignoring command while firing");
                            let _ = request.reply.send(busy.clone());
                        }
                        None => accepting = false,
                    },
                }
            }
        };

        match &report.outcome {
            AlertOutcome::Sent { receipt } => info!(
                recipients = receipt.recipients.len(),
                included_location = receipt.included_location,
                "Alert sent"
            ),
            AlertOutcome::NoRecipients => warn!("Alert not sent: no emergency contacts"),
            AlertOutcome::Cancelled => warn!("Alert delivery cancelled"),
            AlertOutcome::Failed { reason } => warn!(%reason, "Alert delivery failed"),
        }

        self.countdown.finish_firing(self.after_fire);
        self.last_firing = Some(report.clone());
        let _ = self.events_tx.send(AlertEvent::FiringCompleted(report));
        if self.countdown.state() == CountdownState::Armed {
            self.ticker.start();
            let _ = self.events_tx.send(AlertEvent::Armed {
                source: ArmSource::Rearm,
            });
        }
        self.publish();
    }

    fn snapshot(&self) -> CountdownSnapshot {
        CountdownSnapshot {
            state: self.countdown.state(),
            remaining_seconds: self.countdown.remaining_seconds(),
            total_seconds: self.countdown.total_seconds(),
            last_firing: self.last_firing.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

/// Cloneable handle to a running countdown service.
#[derive(Clone)]
pub struct CountdownHandle {
    commands: mpsc::Sender<Request>,
    snapshot: watch::Receiver<CountdownSnapshot>,
    events: broadcast::Sender<AlertEvent>,
}

impl CountdownHandle {
    /// Arm, or restart a running countdown from its total.
    ///
    /// Returns the snapshot after the command was applied. While firing the
    /// command is ignored and the snapshot shows [`CountdownState::Firing`].
    ///
    /// # Errors
    ///
    /// Returns [`CountdownError::ServiceStopped`] if the service task has exited.
    pub async fn arm(&self) -> Result<CountdownSnapshot, CountdownError> {
        self.request(Command::Arm).await
    }

    /// Disarm. A no-op unless armed.
    ///
    /// # Errors
    ///
    /// Returns [`CountdownError::ServiceStopped`] if the service task has exited.
    pub async fn disarm(&self) -> Result<CountdownSnapshot, CountdownError> {
        self.request(Command::Disarm).await
    }

    /// Deliver a trigger peripheral signal.
    ///
    /// # Errors
    ///
    /// Returns [`CountdownError::ServiceStopped`] if the service task has exited.
    pub async fn signal(&self, signal: TriggerSignal) -> Result<CountdownSnapshot, CountdownError> {
        self.request(Command::Signal(signal)).await
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CountdownSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CountdownSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to countdown events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    async fn request(&self, command: Command) -> Result<CountdownSnapshot, CountdownError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| CountdownError::ServiceStopped)?;
        response.await.map_err(|_| CountdownError::ServiceStopped)
    }
}
