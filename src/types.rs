use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Funding outpoint that names a channel on chain (`<txid>:<index>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPoint {
    /// Funding txid in its usual big-endian hex display form.
    pub funding_txid: String,
    pub output_index: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelPointError {
    #[error("bad channel point {0:?}: expected <txid>:<index>")]
    Format(String),
    #[error("bad channel point {point:?}: unable to decode output index: {source}")]
    OutputIndex {
        point: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("bad channel point {0:?}: funding txid is not 32 bytes of hex")]
    FundingTxid(String),
}

impl FromStr for ChannelPoint {
    type Err = ChannelPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (txid, index) = match (parts.next(), parts.next(), parts.next()) {
            (Some(txid), Some(index), None) if !txid.is_empty() && !index.is_empty() => {
                (txid, index)
            }
            _ => return Err(ChannelPointError::Format(s.to_string())),
        };

        let output_index = index
            .parse::<u32>()
            .map_err(|source| ChannelPointError::OutputIndex {
                point: s.to_string(),
                source,
            })?;

        match hex::decode(txid) {
            Ok(bytes) if bytes.len() == 32 => {}
            _ => return Err(ChannelPointError::FundingTxid(s.to_string())),
        }

        Ok(Self {
            funding_txid: txid.to_lowercase(),
            output_index,
        })
    }
}

impl fmt::Display for ChannelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.funding_txid, self.output_index)
    }
}

/// An in-flight HTLC committed on one of our channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingHtlc {
    pub incoming: bool,
    pub amount_sat: i64,
    pub hash_lock: Vec<u8>,
    pub expiration_height: u32,
}

impl PendingHtlc {
    pub fn direction(&self) -> &'static str {
        if self.incoming {
            "incoming"
        } else {
            "outgoing"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConstraints {
    /// Reserve we must keep on our side, in satoshis.
    pub chan_reserve_sat: u64,
    /// Upper bound on the total value of in-flight HTLCs, in msat.
    pub max_pending_amt_msat: u64,
}

/// Snapshot of one of our channels as reported by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub chan_id: u64,
    /// Raw `<txid>:<index>`, parsed on use.
    pub channel_point: String,
    pub remote_pubkey: String,
    pub active: bool,
    pub capacity_sat: i64,
    pub local_balance_sat: i64,
    pub local_constraints: ChannelConstraints,
    pub pending_htlcs: Vec<PendingHtlc>,
}

/// Routing policy advertised by one side of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub time_lock_delta: u32,
    pub min_htlc_msat: u64,
    pub max_htlc_msat: u64,
    pub fee_base_msat: i64,
    pub fee_rate_milli_msat: i64,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelEdge {
    pub channel_id: u64,
    pub node1_pub: String,
    pub node2_pub: String,
    pub node1_policy: Option<RoutingPolicy>,
    pub node2_policy: Option<RoutingPolicy>,
}

impl ChannelEdge {
    /// The policy this node advertises for the channel.
    pub fn local_policy(&self, local_pubkey: &str) -> Option<&RoutingPolicy> {
        if self.node1_pub == local_pubkey {
            self.node1_policy.as_ref()
        } else {
            self.node2_policy.as_ref()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    pub pubkey: String,
    pub alias: String,
    pub block_height: u32,
}

/// Graph view of a remote node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteNodeInfo {
    pub alias: String,
    pub features: BTreeSet<u32>,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub chan_point: ChannelPoint,
    pub base_fee_msat: i64,
    pub fee_rate_ppm: u32,
    pub time_lock_delta: u32,
    pub max_htlc_msat: u64,
    pub min_htlc_msat: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedUpdate {
    pub outpoint: String,
    pub reason: String,
    pub update_error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanStatusAction {
    Enable,
    Disable,
}

impl ChanStatusAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChanStatusAction::Enable => "ENABLE",
            ChanStatusAction::Disable => "DISABLE",
        }
    }
}

/// `0123abcd..6789cdef` form of a pubkey for log lines.
pub fn short_pubkey(pubkey: &str) -> String {
    const EDGE: usize = 4;
    if pubkey.len() > EDGE * 2 && pubkey.is_ascii() {
        format!("{}..{}", &pubkey[..EDGE], &pubkey[pubkey.len() - EDGE..])
    } else {
        pubkey.to_string()
    }
}
