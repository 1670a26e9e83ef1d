//! Optional automatic review: verify a submitted proof after a fixed delay.
//!
//! The scheduled task owns nothing but the proof hash. If a reviewer has
//! already verified or rejected the proof by the time it fires, the
//! verification is refused by the proof's state and the task just logs it.

use std::sync::Arc;
use std::time::Duration;

use earmark_protocol::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::LedgerError;
use crate::service::LedgerService;

#[derive(Clone)]
pub struct Reviewer {
    service: Arc<LedgerService>,
    delay: Duration,
    shutdown: CancellationToken,
}

impl Reviewer {
    pub fn new(service: Arc<LedgerService>, delay: Duration, shutdown: CancellationToken) -> Self {
        Self {
            service,
            delay,
            shutdown,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Spawn the delayed verification of `hash` as a background [`tokio`] task.
    pub fn schedule(&self, hash: String) -> JoinHandle<()> {
        let service = self.service.clone();
        let delay = self.delay;
        let shutdown = self.shutdown.clone();

        debug!("Review of proof {hash} scheduled in {delay:?}");
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Review of proof {hash} cancelled by shutdown");
                }
                _ = tokio::time::sleep(delay) => {
                    match service.verify_proof(&hash).await {
                        Ok(proof) => info!("Automatic review verified proof {}", proof.hash),
                        Err(LedgerError::Protocol(Error::InvalidState { from, .. })) => {
                            debug!("Proof {hash} already {from}; automatic review skipped");
                        }
                        Err(e) => error!("Automatic review of proof {hash} failed: {e}"),
                    }
                }
            }
        })
    }
}
