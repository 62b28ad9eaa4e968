//! Leader/follower coordination for identical submissions.
//!
//! The first caller to claim a fingerprint becomes its leader and executes.
//! Callers arriving while the leader runs subscribe to its outcome instead of
//! starting a second sandbox run. A leader that gives up without a verdict
//! releases the claim and its followers claim the fingerprint again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{error::Error, fingerprint::Fingerprint, types::ExecutionResult};

#[derive(Debug, Clone)]
enum Outcome {
    Completed(Arc<ExecutionResult>),
    Shed,
    Abandoned,
}

type Slot = watch::Receiver<Option<Outcome>>;

/// Registry of fingerprints currently being executed on this node
#[derive(Default, Clone)]
pub struct InFlight {
    running: Arc<Mutex<HashMap<Fingerprint, Slot>>>,
}

/// Result of [`InFlight::acquire_or_join`]
pub enum Claim {
    Leader(LeaderGuard),
    Follower(Follower),
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically claim the fingerprint, or join the run already in flight.
    pub fn acquire_or_join(&self, fingerprint: &Fingerprint) -> Claim {
        let mut running = self.lock();
        if let Some(rx) = running.get(fingerprint) {
            debug!(fingerprint = fingerprint.short(), "Joining in-flight execution");
            return Claim::Follower(Follower { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(None);
        running.insert(fingerprint.clone(), rx);
        Claim::Leader(LeaderGuard {
            fingerprint: fingerprint.clone(),
            tx: Some(tx),
            inflight: self.clone(),
        })
    }

    /// Number of fingerprints currently claimed
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held by the single caller executing a fingerprint. Dropping it without
/// publishing abandons the claim.
pub struct LeaderGuard {
    fingerprint: Fingerprint,
    tx: Option<watch::Sender<Option<Outcome>>>,
    inflight: InFlight,
}

impl LeaderGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Publish the verdict to every follower and release the claim
    pub fn complete(mut self, result: ExecutionResult) {
        self.publish(Outcome::Completed(Arc::new(result)));
    }

    /// Release the claim after the leader was load-shed; followers are shed too
    pub fn shed(mut self) {
        self.publish(Outcome::Shed);
    }

    /// Release the claim without a verdict; followers claim again
    pub fn abandon(mut self) {
        debug!(fingerprint = self.fingerprint.short(), "Releasing claim without a verdict");
        self.publish(Outcome::Abandoned);
    }

    fn publish(&mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            // Send before removing so that a caller joining in between still
            // observes the outcome.
            tx.send_replace(Some(outcome));
            self.inflight.lock().remove(&self.fingerprint);
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                fingerprint = self.fingerprint.short(),
                "Leader abandoned execution before publishing a result"
            );
            self.publish(Outcome::Abandoned);
        }
    }
}

/// Waits for the leader's verdict
pub struct Follower {
    rx: Slot,
}

impl Follower {
    /// `Ok(None)` means the leader released the claim without a verdict and
    /// the caller should claim again.
    pub async fn wait(mut self) -> Result<Option<ExecutionResult>, Error> {
        let outcome = match self.rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Outcome::Completed(result)) => Ok(Some(result.as_ref().clone())),
            Some(Outcome::Shed) => Err(Error::LoadShed),
            Some(Outcome::Abandoned) | None => Ok(None),
        }
    }
}
