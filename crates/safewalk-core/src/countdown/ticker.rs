//! One-second tick source for the countdown.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Interval between countdown ticks.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

const TICK_CHANNEL_CAPACITY: usize = 4;

/// A tick, tagged with the generation of the source that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Generation of the tick source.
    pub generation: u64,
}

/// Owns at most one periodic tick task.
///
/// Starting a new source aborts the previous one and bumps the generation, so a
/// tick already queued by an aborted source can be told apart with
/// [`Ticker::is_current`]. The task is aborted when the ticker is dropped.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    tx: mpsc::Sender<Tick>,
    generation: u64,
    active: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Create a ticker and the receiver its ticks arrive on.
    #[must_use]
    pub fn new(period: Duration) -> (Self, mpsc::Receiver<Tick>) {
        let (tx, rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let ticker = Self {
            period,
            tx,
            generation: 0,
            active: None,
        };
        (ticker, rx)
    }

    /// Replace any running source with a new one. The first tick arrives one
    /// period from now. Returns the new generation.
    pub fn start(&mut self) -> u64 {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        let tx = self.tx.clone();
        let period = self.period;
        self.active = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Tick { generation }).await.is_err() {
                    break;
                }
            }
        }));
        tracing::trace!(generation, "Tick source started");
        generation
    }

    /// Stop the running source. Returns `false` if none was running.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                handle.abort();
                tracing::trace!(generation = self.generation, "Tick source cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a source is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Generation of the most recently started source.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `tick` came from the running source.
    #[must_use]
    pub const fn is_current(&self, tick: Tick) -> bool {
        self.active.is_some() && tick.generation == self.generation
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}
