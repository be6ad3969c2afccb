//! JSON shapes of the LND REST gateway and their mapping onto our types.
//!
//! The gateway renders 64-bit integers as strings and byte fields as
//! base64, and omits fields holding their zero value.

use crate::types::{
    Channel, ChannelConstraints, ChannelEdge, ChannelPoint, FailedUpdate, LocalIdentity,
    PendingHtlc, PolicyUpdate, RemoteNodeInfo, RoutingPolicy,
};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};

mod lenient {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num<T> {
        Str(String),
        Num(T),
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Num::<u64>::deserialize(d)? {
            Num::Num(n) => Ok(n),
            Num::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Num::<i64>::deserialize(d)? {
            Num::Num(n) => Ok(n),
            Num::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    pub fn bytes<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize)]
pub struct GetInfoResponse {
    #[serde(default)]
    pub identity_pubkey: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub block_height: u32,
}

impl From<GetInfoResponse> for LocalIdentity {
    fn from(r: GetInfoResponse) -> Self {
        Self {
            pubkey: r.identity_pubkey,
            alias: r.alias,
            block_height: r.block_height,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListChannelsResponse {
    #[serde(default)]
    pub channels: Vec<WireChannel>,
}

#[derive(Debug, Deserialize)]
pub struct WireChannel {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub remote_pubkey: String,
    #[serde(default)]
    pub channel_point: String,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub chan_id: u64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub capacity: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub local_balance: i64,
    #[serde(default)]
    pub pending_htlcs: Vec<WireHtlc>,
    #[serde(default)]
    pub local_constraints: Option<WireConstraints>,
}

#[derive(Debug, Deserialize)]
pub struct WireHtlc {
    #[serde(default)]
    pub incoming: bool,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub amount: i64,
    #[serde(default, deserialize_with = "lenient::bytes")]
    pub hash_lock: Vec<u8>,
    #[serde(default)]
    pub expiration_height: u32,
}

#[derive(Debug, Deserialize)]
pub struct WireConstraints {
    #[serde(default, deserialize_with = "lenient::u64")]
    pub chan_reserve_sat: u64,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub max_pending_amt_msat: u64,
}

impl From<WireChannel> for Channel {
    fn from(c: WireChannel) -> Self {
        let local_constraints = c
            .local_constraints
            .map(|lc| ChannelConstraints {
                chan_reserve_sat: lc.chan_reserve_sat,
                max_pending_amt_msat: lc.max_pending_amt_msat,
            })
            .unwrap_or_default();
        Self {
            chan_id: c.chan_id,
            channel_point: c.channel_point,
            remote_pubkey: c.remote_pubkey,
            active: c.active,
            capacity_sat: c.capacity,
            local_balance_sat: c.local_balance,
            local_constraints,
            pending_htlcs: c
                .pending_htlcs
                .into_iter()
                .map(|h| PendingHtlc {
                    incoming: h.incoming,
                    amount_sat: h.amount,
                    hash_lock: h.hash_lock,
                    expiration_height: h.expiration_height,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireChannelEdge {
    #[serde(default, deserialize_with = "lenient::u64")]
    pub channel_id: u64,
    #[serde(default)]
    pub node1_pub: String,
    #[serde(default)]
    pub node2_pub: String,
    #[serde(default)]
    pub node1_policy: Option<WireRoutingPolicy>,
    #[serde(default)]
    pub node2_policy: Option<WireRoutingPolicy>,
}

#[derive(Debug, Deserialize)]
pub struct WireRoutingPolicy {
    #[serde(default)]
    pub time_lock_delta: u32,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub min_htlc: u64,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub max_htlc_msat: u64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub fee_base_msat: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub fee_rate_milli_msat: i64,
    #[serde(default)]
    pub disabled: bool,
}

impl From<WireRoutingPolicy> for RoutingPolicy {
    fn from(p: WireRoutingPolicy) -> Self {
        Self {
            time_lock_delta: p.time_lock_delta,
            min_htlc_msat: p.min_htlc,
            max_htlc_msat: p.max_htlc_msat,
            fee_base_msat: p.fee_base_msat,
            fee_rate_milli_msat: p.fee_rate_milli_msat,
            disabled: p.disabled,
        }
    }
}

impl From<WireChannelEdge> for ChannelEdge {
    fn from(e: WireChannelEdge) -> Self {
        Self {
            channel_id: e.channel_id,
            node1_pub: e.node1_pub,
            node2_pub: e.node2_pub,
            node1_policy: e.node1_policy.map(Into::into),
            node2_policy: e.node2_policy.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NodeInfoResponse {
    pub node: Option<WireNode>,
}

#[derive(Debug, Deserialize)]
pub struct WireNode {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub addresses: Vec<WireNodeAddress>,
    /// Keyed by feature bit number.
    #[serde(default)]
    pub features: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WireNodeAddress {
    #[serde(default)]
    pub addr: String,
}

impl From<WireNode> for RemoteNodeInfo {
    fn from(n: WireNode) -> Self {
        let features: BTreeSet<u32> = n
            .features
            .keys()
            .filter_map(|bit| bit.parse().ok())
            .collect();
        Self {
            alias: n.alias,
            features,
            addresses: n.addresses.into_iter().map(|a| a.addr).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireChanPoint {
    pub funding_txid_str: String,
    pub output_index: u32,
}

impl From<&ChannelPoint> for WireChanPoint {
    fn from(cp: &ChannelPoint) -> Self {
        Self {
            funding_txid_str: cp.funding_txid.clone(),
            output_index: cp.output_index,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PolicyUpdateRequest {
    pub chan_point: WireChanPoint,
    pub base_fee_msat: String,
    pub fee_rate_ppm: u32,
    pub time_lock_delta: u32,
    pub max_htlc_msat: String,
    pub min_htlc_msat: String,
    pub min_htlc_msat_specified: bool,
}

impl From<&PolicyUpdate> for PolicyUpdateRequest {
    fn from(u: &PolicyUpdate) -> Self {
        Self {
            chan_point: (&u.chan_point).into(),
            base_fee_msat: u.base_fee_msat.to_string(),
            fee_rate_ppm: u.fee_rate_ppm,
            time_lock_delta: u.time_lock_delta,
            max_htlc_msat: u.max_htlc_msat.to_string(),
            min_htlc_msat: u.min_htlc_msat.to_string(),
            min_htlc_msat_specified: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PolicyUpdateResponse {
    #[serde(default)]
    pub failed_updates: Vec<WireFailedUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct WireFailedUpdate {
    #[serde(default)]
    pub outpoint: Option<WireOutPoint>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub update_error: String,
}

#[derive(Debug, Deserialize)]
pub struct WireOutPoint {
    #[serde(default)]
    pub txid_str: String,
    #[serde(default)]
    pub output_index: u32,
}

impl From<WireFailedUpdate> for FailedUpdate {
    fn from(f: WireFailedUpdate) -> Self {
        Self {
            outpoint: f
                .outpoint
                .map(|o| format!("{}:{}", o.txid_str, o.output_index))
                .unwrap_or_default(),
            reason: f.reason,
            update_error: f.update_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateChanStatusRequest {
    pub chan_point: WireChanPoint,
    pub action: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ConnectPeerRequest {
    pub addr: LightningAddress,
    pub perm: bool,
    pub timeout: String,
}

#[derive(Debug, Serialize)]
pub struct LightningAddress {
    pub pubkey: String,
    pub host: String,
}

/// Error body returned by the gateway on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_channel_with_string_integers() {
        let json = r#"{
            "active": true,
            "remote_pubkey": "02abc",
            "channel_point": "aa:1",
            "chan_id": "869059488267894785",
            "capacity": "2000000",
            "local_balance": "50000",
            "pending_htlcs": [
                {"incoming": false, "amount": "1000", "hash_lock": "3q2+7w==", "expiration_height": 820000}
            ],
            "local_constraints": {"chan_reserve_sat": "1000", "max_pending_amt_msat": "1980000000"}
        }"#;
        let wire: WireChannel = serde_json::from_str(json).unwrap();
        let channel: Channel = wire.into();
        assert_eq!(channel.chan_id, 869_059_488_267_894_785);
        assert_eq!(channel.local_balance_sat, 50_000);
        assert_eq!(channel.local_constraints.chan_reserve_sat, 1_000);
        assert_eq!(channel.local_constraints.max_pending_amt_msat, 1_980_000_000);
        assert_eq!(channel.pending_htlcs.len(), 1);
        assert_eq!(channel.pending_htlcs[0].hash_lock, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(channel.pending_htlcs[0].expiration_height, 820_000);
    }

    #[test]
    fn test_decode_channel_omitted_fields() {
        let wire: WireChannel = serde_json::from_str(r#"{"chan_id": 12}"#).unwrap();
        let channel: Channel = wire.into();
        assert_eq!(channel.chan_id, 12);
        assert!(!channel.active);
        assert_eq!(channel.local_constraints, ChannelConstraints::default());
    }

    #[test]
    fn test_decode_edge_policies() {
        let json = r#"{
            "channel_id": "7",
            "node1_pub": "local",
            "node2_pub": "remote",
            "node1_policy": {
                "time_lock_delta": 144,
                "min_htlc": "2500000",
                "fee_base_msat": "0",
                "fee_rate_milli_msat": "250",
                "disabled": true,
                "max_htlc_msat": "33554432"
            },
            "node2_policy": null
        }"#;
        let edge: ChannelEdge = serde_json::from_str::<WireChannelEdge>(json).unwrap().into();
        let policy = edge.local_policy("local").unwrap();
        assert_eq!(policy.min_htlc_msat, 2_500_000);
        assert_eq!(policy.max_htlc_msat, 33_554_432);
        assert_eq!(policy.fee_rate_milli_msat, 250);
        assert!(policy.disabled);
        assert!(edge.local_policy("someone-else").is_none());
    }

    #[test]
    fn test_decode_node_features_and_addresses() {
        let json = r#"{"node": {
            "pub_key": "03def",
            "alias": "peer",
            "addresses": [{"network": "tcp", "addr": "abc.onion:9735"}, {"network": "tcp", "addr": "1.2.3.4:9735"}],
            "features": {"31": {"name": "amp", "is_known": true}, "9": {"name": "tlv-onion"}}
        }}"#;
        let resp: NodeInfoResponse = serde_json::from_str(json).unwrap();
        let info: RemoteNodeInfo = resp.node.unwrap().into();
        assert!(info.features.contains(&31));
        assert!(info.features.contains(&9));
        assert_eq!(info.addresses, vec!["abc.onion:9735", "1.2.3.4:9735"]);
    }

    #[test]
    fn test_encode_policy_update() {
        let update = PolicyUpdate {
            chan_point: ChannelPoint {
                funding_txid: "ab".repeat(32),
                output_index: 3,
            },
            base_fee_msat: 0,
            fee_rate_ppm: 250,
            time_lock_delta: 144,
            max_htlc_msat: 33_554_432,
            min_htlc_msat: 2_500_000,
        };
        let body = serde_json::to_value(PolicyUpdateRequest::from(&update)).unwrap();
        assert_eq!(body["chan_point"]["output_index"], 3);
        assert_eq!(body["max_htlc_msat"], "33554432");
        assert_eq!(body["min_htlc_msat_specified"], true);
        assert_eq!(body["time_lock_delta"], 144);
    }
}
