//! Background task keeping the latest rate of one pair warm.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::orchestrator::Orchestrator;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherState {
    Idle,
    Running,
    Stopped,
}

pub struct Refresher {
    orchestrator: Arc<Orchestrator>,
    coin: String,
    fiat: String,
    interval: Duration,
    state: watch::Sender<RefresherState>,
}

impl Refresher {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        coin: impl Into<String>,
        fiat: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(RefresherState::Idle);
        Self {
            orchestrator,
            coin: coin.into(),
            fiat: fiat.into(),
            interval,
            state,
        }
    }

    pub fn state(&self) -> RefresherState {
        *self.state.borrow()
    }

    /// Receiver following state changes after the refresher has been moved
    /// into its task.
    pub fn subscribe(&self) -> watch::Receiver<RefresherState> {
        self.state.subscribe()
    }

    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Refresh now, then once per interval until `shutdown` fires.
    ///
    /// Failed refreshes are logged and never end the loop.
    pub async fn run(self, shutdown: Shutdown) {
        self.state.send_replace(RefresherState::Running);
        info!(
            "[refresher] refreshing {}/{} every {:?}",
            self.coin, self.fiat, self.interval
        );

        self.refresh().await;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.refresh().await,
            }
        }

        self.state.send_replace(RefresherState::Stopped);
        info!("[refresher] stopped");
    }

    async fn refresh(&self) {
        match self.orchestrator.refresh_latest(&self.coin, &self.fiat).await {
            Ok(outcome) if outcome.is_persisted() => {
                debug!("[refresher] latest {}/{} is {}", self.coin, self.fiat, outcome.value.value());
            }
            Ok(_) => warn!("[refresher] fetched latest {}/{} but could not store it", self.coin, self.fiat),
            Err(err) => error!("[refresher] failed to refresh {}/{}: {}", self.coin, self.fiat, err),
        }
    }
}
