use crate::client::NodeClient;
use crate::types::{Channel, LocalIdentity, RoutingPolicy};
use anyhow::Context;
use log::debug;

/// Snapshot of the node collected at the start of a pass.
pub struct NodeState {
    pub identity: LocalIdentity,
    pub channels: Vec<Channel>,
}

impl NodeState {
    /// Collect fresh node state. Nothing is cached across passes.
    pub async fn collect(client: &impl NodeClient) -> anyhow::Result<Self> {
        let identity = client
            .get_local_identity()
            .await
            .context("Could not get local node info")?;
        let channels = client
            .list_channels()
            .await
            .context("Could not list channels")?;

        debug!(
            "Collected state: {} channels at height {}",
            channels.len(),
            identity.block_height
        );

        Ok(Self { identity, channels })
    }

    pub fn active_channel_count(&self) -> usize {
        self.channels.iter().filter(|c| c.active).count()
    }

    /// Sum of our balance over all channels.
    pub fn total_local_balance_sat(&self) -> i64 {
        self.channels.iter().map(|c| c.local_balance_sat).sum()
    }

    pub fn pending_htlc_count(&self) -> usize {
        self.channels.iter().map(|c| c.pending_htlcs.len()).sum()
    }
}

/// Fetch the routing policy we advertise for a channel.
///
/// Errors here are per-channel and transient; callers skip the channel.
pub async fn fetch_local_policy(
    client: &impl NodeClient,
    chan_id: u64,
    local_pubkey: &str,
) -> anyhow::Result<RoutingPolicy> {
    let edge = client.get_channel_edge(chan_id).await?;
    if edge.channel_id != chan_id {
        anyhow::bail!("asked for channel {} but node returned edge {}", chan_id, edge.channel_id);
    }
    edge.local_policy(local_pubkey)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no local policy advertised for channel {}", chan_id))
}
