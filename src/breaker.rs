use crate::client::NodeClient;
use crate::config::Config;
use crate::registry::ProtectionRegistry;
use crate::state;
use crate::types::{ChanStatusAction, Channel, ChannelPoint};
use log::{debug, error, info, warn};

/// Observed state of one channel, as far as the breaker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerInput {
    pub local_balance_sat: i64,
    pub chan_reserve_sat: u64,
    pub policy_disabled: bool,
    pub active: bool,
    pub protected: bool,
}

/// Balance a channel needs to stay enabled: twice its reserve.
///
/// Enable and disable share this single threshold, so a balance sitting
/// exactly on it triggers neither.
pub fn liquidity_threshold_sat(chan_reserve_sat: u64) -> i128 {
    chan_reserve_sat as i128 * 2
}

/// Decide whether a channel should be enabled or disabled.
///
/// Returns `None` when the advertised status already matches.
pub fn decide(input: &BreakerInput) -> Option<ChanStatusAction> {
    let balance = input.local_balance_sat as i128;
    let threshold = liquidity_threshold_sat(input.chan_reserve_sat);

    if balance > threshold && input.policy_disabled && input.active && !input.protected {
        Some(ChanStatusAction::Enable)
    } else if (balance < threshold || input.protected) && !input.policy_disabled {
        Some(ChanStatusAction::Disable)
    } else {
        None
    }
}

/// One pass of the liquidity circuit breaker.
///
/// Status update failures are logged and the pass continues. Returns the
/// number of status updates issued.
pub async fn run_pass(
    config: &Config,
    client: &impl NodeClient,
    local_pubkey: &str,
    registry: &ProtectionRegistry,
) -> anyhow::Result<usize> {
    info!("Breaker: evaluating local balances");
    let channels = client.list_channels().await?;
    let protection = registry.snapshot();

    if protection.number == 0 {
        debug!("Breaker: no protector pass published yet");
    }

    let mut issued = 0;
    for channel in &channels {
        let protected = protection.is_protected(channel.chan_id);

        let policy = match state::fetch_local_policy(client, channel.chan_id, local_pubkey).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!("Breaker: failed to get channel {}: {:#}", channel.chan_id, e);
                continue;
            }
        };

        let chan_point: ChannelPoint = channel.channel_point.parse()?;

        let input = BreakerInput {
            local_balance_sat: channel.local_balance_sat,
            chan_reserve_sat: channel.local_constraints.chan_reserve_sat,
            policy_disabled: policy.disabled,
            active: channel.active,
            protected,
        };

        let Some(action) = decide(&input) else {
            continue;
        };

        log_decision(channel, action, protected);
        if config.general.dry_run {
            info!("  (dry-run: not executing)");
            continue;
        }

        issued += 1;
        match client.set_channel_status(&chan_point, action).await {
            Ok(()) => debug!("Breaker: channel {} status {} applied", channel.chan_id, action.as_str()),
            Err(e) => error!(
                "Breaker: error setting channel {} to {}: {:#}",
                channel.chan_id,
                action.as_str(),
                e
            ),
        }
    }

    info!("Breaker: done, {} status updates", issued);
    Ok(issued)
}

fn log_decision(channel: &Channel, action: ChanStatusAction, protected: bool) {
    let reserve = channel.local_constraints.chan_reserve_sat;
    match action {
        ChanStatusAction::Enable => info!(
            "Breaker: enabling channel {} (local balance {}sat > 2x reserve {}sat)",
            channel.chan_id, channel.local_balance_sat, reserve
        ),
        ChanStatusAction::Disable if protected => info!(
            "Breaker: disabling channel {}, HTLC in grace period",
            channel.chan_id
        ),
        ChanStatusAction::Disable => info!(
            "Breaker: disabling channel {}, local balance {}sat below 2x reserve {}sat",
            channel.chan_id, channel.local_balance_sat, reserve
        ),
    }
}
