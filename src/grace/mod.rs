//! Grace-period protector.
//!
//! When an HTLC on a channel gets within `final_cltv_reject_delta` blocks of
//! its expiry, the channel is marked protected (the breaker keeps it
//! disabled) and the peer is disconnected and reconnected. On reconnect LND
//! peers fail back the incoming HTLC while replaying, which avoids the
//! force close that would otherwise follow the timeout.

pub mod address;
pub mod classify;

use crate::client::NodeClient;
use crate::config::Config;
use crate::registry::{ProtectionRecord, ProtectionRegistry};
use crate::state::NodeState;
use crate::types::{short_pubkey, Channel, PendingHtlc, RemoteNodeInfo};
use classify::PeerClassifier;
use log::{debug, error, info, warn};
use std::collections::HashMap;

/// Whether an HTLC expiring at `expiration_height` is inside the grace period.
pub fn in_grace_period(block_height: u32, expiration_height: u32, reject_delta: u32) -> bool {
    block_height >= expiration_height.saturating_sub(reject_delta)
}

/// First pending HTLC of the channel inside the grace period, if any.
pub fn first_htlc_in_grace<'a>(
    channel: &'a Channel,
    block_height: u32,
    reject_delta: u32,
) -> Option<&'a PendingHtlc> {
    channel
        .pending_htlcs
        .iter()
        .find(|htlc| in_grace_period(block_height, htlc.expiration_height, reject_delta))
}

/// One protector pass. Builds a fresh protection generation and publishes it
/// once every channel has been looked at. Returns the number of channels
/// protected.
pub async fn run_pass(
    config: &Config,
    client: &impl NodeClient,
    registry: &ProtectionRegistry,
    classifier: &impl PeerClassifier,
) -> anyhow::Result<usize> {
    info!("Grace: checking for HTLCs in the grace period");
    let state = NodeState::collect(client).await?;
    let block_height = state.identity.block_height;
    let reject_delta = config.grace_period.final_cltv_reject_delta;

    let mut records: HashMap<u64, ProtectionRecord> = HashMap::new();

    for channel in &state.channels {
        let remote = match client.get_node_info(&channel.remote_pubkey).await {
            Ok(info) => info,
            Err(e) => {
                debug!(
                    "Grace: no node info for {} (channel {}): {:#}",
                    short_pubkey(&channel.remote_pubkey),
                    channel.chan_id,
                    e
                );
                continue;
            }
        };

        if !classifier.is_candidate(&remote) {
            debug!(
                "Grace: peer {} of channel {} not a reconnect candidate",
                short_pubkey(&channel.remote_pubkey),
                channel.chan_id
            );
            continue;
        }

        let Some(htlc) = first_htlc_in_grace(channel, block_height, reject_delta) else {
            continue;
        };

        records.insert(
            channel.chan_id,
            ProtectionRecord {
                protect_against_force_close: true,
            },
        );
        warn!(
            "Grace: channel {} has {} HTLC {} of {}sat in the grace period (height {}, expiry {}), reconnecting {}",
            channel.chan_id,
            htlc.direction(),
            hex::encode(&htlc.hash_lock),
            htlc.amount_sat,
            block_height,
            htlc.expiration_height,
            short_pubkey(&channel.remote_pubkey),
        );

        if config.general.dry_run {
            info!("  (dry-run: not reconnecting)");
            continue;
        }

        reconnect(config, client, channel, &remote).await;
    }

    let protected = records.len();
    let generation = registry.publish(records);
    info!(
        "Grace: done, {} channels protected (generation {})",
        protected, generation
    );
    Ok(protected)
}

/// Disconnect and reconnect the channel's peer. Failures are logged only;
/// the node reconnects persistent peers by itself.
async fn reconnect(
    config: &Config,
    client: &impl NodeClient,
    channel: &Channel,
    remote: &RemoteNodeInfo,
) {
    let pubkey = &channel.remote_pubkey;

    info!("Grace: disconnecting peer {} ({})", short_pubkey(pubkey), remote.alias);
    if let Err(e) = client.disconnect_peer(pubkey).await {
        error!("Grace: unable to disconnect peer {}: {:#}", short_pubkey(pubkey), e);
    }

    let Some(host) = address::pick_reconnect_address(&remote.addresses) else {
        warn!(
            "Grace: peer {} advertises no address, leaving reconnect to the node",
            short_pubkey(pubkey)
        );
        return;
    };

    info!("Grace: connecting peer {} at {}", short_pubkey(pubkey), host);
    if let Err(e) = client
        .connect_peer(pubkey, host, config.grace_period.reconnect_timeout_secs)
        .await
    {
        error!("Grace: unable to connect peer {}: {:#}", short_pubkey(pubkey), e);
    }
}
