//! HTLC size limits derived from a channel's spendable liquidity.
//!
//! The maximum HTLC is the usable balance (above the reserve) rounded down to
//! a power of two in msat, so small balance movements between two passes do
//! not produce a new policy. The minimum HTLC is the configured default,
//! lowered to the maximum when the channel cannot carry that much.

use crate::config::HtlcLimitsConfig;
use crate::types::{Channel, RoutingPolicy};

/// Policy we want advertised for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcTarget {
    pub max_htlc_msat: u64,
    pub min_htlc_msat: u64,
    pub time_lock_delta: u32,
    pub base_fee_msat: i64,
    pub fee_rate_ppm: u32,
}

/// Largest power of two `<= v`, 0 for 0.
pub fn floor_power_of_two(v: u64) -> u64 {
    if v == 0 {
        0
    } else {
        1u64 << (63 - v.leading_zeros())
    }
}

/// Balance above the channel reserve, in satoshis. May be negative.
pub fn spendable_sat(channel: &Channel) -> i128 {
    channel.local_balance_sat as i128 - channel.local_constraints.chan_reserve_sat as i128
}

pub fn compute_max_htlc_msat(channel: &Channel, current: &RoutingPolicy) -> u64 {
    let max_pending = channel.local_constraints.max_pending_amt_msat;
    let available = spendable_sat(channel);
    let candidate = if available > 0 {
        let msat = u64::try_from(available)
            .unwrap_or(u64::MAX)
            .saturating_mul(1000);
        floor_power_of_two(msat)
    } else {
        // At or below reserve: only the smallest HTLCs already allowed
        current.min_htlc_msat
    };
    candidate.min(max_pending)
}

pub fn compute_target(
    channel: &Channel,
    current: &RoutingPolicy,
    defaults: &HtlcLimitsConfig,
) -> HtlcTarget {
    let max_htlc_msat = compute_max_htlc_msat(channel, current);
    HtlcTarget {
        max_htlc_msat,
        min_htlc_msat: defaults.min_htlc_msat.min(max_htlc_msat),
        time_lock_delta: defaults.time_lock_delta,
        base_fee_msat: defaults.base_fee_msat,
        fee_rate_ppm: current.fee_rate_milli_msat.clamp(0, u32::MAX as i64) as u32,
    }
}

/// Whether `current` differs from `target` on any field we manage.
///
/// The fee rate is carried over and never triggers an update by itself.
pub fn needs_update(current: &RoutingPolicy, target: &HtlcTarget) -> bool {
    current.max_htlc_msat != target.max_htlc_msat
        || current.time_lock_delta != target.time_lock_delta
        || current.fee_base_msat != target.base_fee_msat
        || current.min_htlc_msat != target.min_htlc_msat
}
