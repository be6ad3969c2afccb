use crate::client::NodeClient;
use crate::config::Config;
use crate::htlc_limits::limits::{needs_update, HtlcTarget};
use crate::types::{Channel, ChannelPoint, PolicyUpdate, RoutingPolicy};
use log::{debug, info, warn};

/// Push `target` to the channel, but only if it differs from the current policy.
///
/// Returns whether an update was sent. A failed call is returned as an error.
pub async fn apply_if_changed(
    config: &Config,
    client: &impl NodeClient,
    channel: &Channel,
    chan_point: &ChannelPoint,
    current: &RoutingPolicy,
    target: &HtlcTarget,
) -> anyhow::Result<bool> {
    if !needs_update(current, target) {
        debug!(
            "HTLC limits: channel {} unchanged (max={}msat, min={}msat)",
            channel.chan_id, target.max_htlc_msat, target.min_htlc_msat
        );
        return Ok(false);
    }

    info!(
        "HTLC limits: channel {} local balance {}sat -- max: {}->{}sat, min: {}->{}sat, \
         timelock: {}->{}, base fee: {}->{}msat",
        channel.chan_id,
        channel.local_balance_sat,
        current.max_htlc_msat / 1000,
        target.max_htlc_msat / 1000,
        current.min_htlc_msat / 1000,
        target.min_htlc_msat / 1000,
        current.time_lock_delta,
        target.time_lock_delta,
        current.fee_base_msat,
        target.base_fee_msat,
    );

    if config.general.dry_run {
        info!("  (dry-run: not applying)");
        return Ok(false);
    }

    let update = PolicyUpdate {
        chan_point: chan_point.clone(),
        base_fee_msat: target.base_fee_msat,
        // Preserve the fee rate, we don't manage it
        fee_rate_ppm: target.fee_rate_ppm,
        time_lock_delta: target.time_lock_delta,
        max_htlc_msat: target.max_htlc_msat,
        min_htlc_msat: target.min_htlc_msat,
    };

    let failed = client.update_channel_policy(&update).await?;
    for failure in &failed {
        warn!(
            "HTLC limits: node rejected update for {}: {} {}",
            failure.outpoint, failure.reason, failure.update_error
        );
    }

    Ok(true)
}
