use crate::breaker;
use crate::client::NodeClient;
use crate::config::Config;
use crate::grace::{self, classify::FeatureBitClassifier};
use crate::htlc_limits;
use crate::registry::ProtectionRegistry;
use crate::scheduler::run_periodic;
use crate::types::short_pubkey;
use anyhow::Context;
use log::{error, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// How the supervisor reacts to a failed pipeline.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Consecutive failures tolerated; 0 means unlimited.
    pub max_restarts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// A generation that ran this long resets the failure count.
    pub stable_after: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_restarts: config.general.max_restarts,
            base_backoff: Duration::from_secs(config.general.restart_backoff_secs),
            max_backoff: Duration::from_secs(10 * 60),
            stable_after: Duration::from_secs(60 * 60),
        }
    }

    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_restarts != 0 && consecutive_failures > self.max_restarts
    }

    /// Exponential backoff with up to 20% random jitter.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1).min(16);
        let delay = self
            .base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.0..=0.2);
        delay + delay.mul_f64(jitter)
    }
}

/// Keep the enabled loops running, rebuilding the whole pipeline after a
/// failure: new client, fresh identity, fresh registry, every loop respawned.
///
/// Returns `Ok` on shutdown, or the last error once the restart budget is spent.
pub async fn supervise<C, F>(
    config: Arc<Config>,
    mut connect: F,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    C: NodeClient + 'static,
    F: FnMut() -> anyhow::Result<Arc<C>>,
{
    let policy = RestartPolicy::from_config(&config);
    let mut consecutive_failures = 0u32;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let started = Instant::now();
        let result = match connect() {
            Ok(client) => run_generation(config.clone(), client, shutdown.clone()).await,
            Err(e) => Err(e.context("Failed to create node client")),
        };

        let err = match result {
            Ok(()) => {
                info!("Supervisor: all loops stopped");
                return Ok(());
            }
            Err(e) => e,
        };

        if started.elapsed() >= policy.stable_after {
            consecutive_failures = 0;
        }
        consecutive_failures += 1;
        error!(
            "Supervisor: pipeline failed ({} consecutive): {:#}",
            consecutive_failures, err
        );

        if policy.exhausted(consecutive_failures) {
            return Err(err.context(format!(
                "giving up after {} consecutive restarts",
                policy.max_restarts
            )));
        }

        let delay = policy.backoff(consecutive_failures);
        warn!("Supervisor: reconnecting in {:.1}s", delay.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

/// One pipeline generation: resolve identity, spawn the enabled loops and
/// wait. The first loop error tears down its siblings and is returned.
pub async fn run_generation<C: NodeClient + 'static>(
    config: Arc<Config>,
    client: Arc<C>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let identity = client
        .get_local_identity()
        .await
        .context("Could not get local node info")?;
    if identity.alias.is_empty() {
        info!("Connected to {}", identity.pubkey);
    } else {
        info!(
            "Connected to {} ({})",
            identity.alias,
            short_pubkey(&identity.pubkey)
        );
    }

    let registry = ProtectionRegistry::new();
    let mut loops = JoinSet::new();

    if config.htlc_limits.enabled {
        let (config, client, pubkey) = (config.clone(), client.clone(), identity.pubkey.clone());
        let interval = Duration::from_secs(config.htlc_limits.interval_secs);
        let shutdown = shutdown.clone();
        loops.spawn(async move {
            run_periodic("HTLC limits", interval, shutdown, || {
                htlc_limits::run_pass(&config, client.as_ref(), &pubkey)
            })
            .await
        });
    }

    if config.circuit_breaker.enabled {
        let (config, client, pubkey) = (config.clone(), client.clone(), identity.pubkey.clone());
        let registry = registry.clone();
        let interval = Duration::from_secs(config.circuit_breaker.interval_secs);
        let shutdown = shutdown.clone();
        loops.spawn(async move {
            run_periodic("Breaker", interval, shutdown, || {
                breaker::run_pass(&config, client.as_ref(), &pubkey, &registry)
            })
            .await
        });
    }

    if config.grace_period.enabled {
        let (config, client) = (config.clone(), client.clone());
        let registry = registry.clone();
        let classifier = FeatureBitClassifier::new(config.grace_period.target_feature_bit);
        let interval = Duration::from_secs(config.grace_period.interval_secs);
        let shutdown = shutdown.clone();
        loops.spawn(async move {
            run_periodic("Grace", interval, shutdown, || {
                grace::run_pass(&config, client.as_ref(), &registry, &classifier)
            })
            .await
        });
    }

    if loops.is_empty() {
        warn!("No loop enabled -- nothing to do");
        return Ok(());
    }

    while let Some(joined) = loops.join_next().await {
        let outcome = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(join_err) => anyhow::anyhow!("loop task died: {}", join_err),
        };
        loops.abort_all();
        return Err(outcome);
    }

    Ok(())
}
