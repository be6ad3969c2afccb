pub mod limits;
pub mod setter;

use crate::client::NodeClient;
use crate::config::Config;
use crate::state;
use crate::types::ChannelPoint;
use log::{debug, info, warn};

/// One pass of the HTLC size controller over every public channel.
///
/// A channel whose policy cannot be fetched is skipped. A malformed channel
/// point or a failed policy update aborts the pass. Returns the number of
/// channels updated.
pub async fn run_pass(
    config: &Config,
    client: &impl NodeClient,
    local_pubkey: &str,
) -> anyhow::Result<usize> {
    info!("HTLC limits: evaluating channels");
    let channels = client.list_channels().await?;

    if channels.is_empty() {
        debug!("HTLC limits: no channels");
        return Ok(0);
    }

    let mut updated = 0;
    for channel in &channels {
        let current = match state::fetch_local_policy(client, channel.chan_id, local_pubkey).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(
                    "HTLC limits: error fetching channel info for {}: {:#}",
                    channel.chan_id, e
                );
                continue;
            }
        };

        let chan_point: ChannelPoint = channel.channel_point.parse()?;

        let target = limits::compute_target(channel, &current, &config.htlc_limits);
        if setter::apply_if_changed(config, client, channel, &chan_point, &current, &target).await? {
            updated += 1;
        }
    }

    info!(
        "HTLC limits: done, {} of {} channels updated",
        updated,
        channels.len()
    );
    Ok(updated)
}
