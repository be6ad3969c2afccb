use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Per-channel protection flag set by the grace-period protector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionRecord {
    /// An HTLC on this channel is close to expiry; keep the channel disabled.
    pub protect_against_force_close: bool,
}

/// One complete protector pass worth of protection records.
#[derive(Debug, Default)]
pub struct ProtectionGeneration {
    /// 0 until the first protector pass has been published.
    pub number: u64,
    pub records: HashMap<u64, ProtectionRecord>,
}

impl ProtectionGeneration {
    /// Channels absent from the generation are not protected.
    pub fn is_protected(&self, chan_id: u64) -> bool {
        self.records
            .get(&chan_id)
            .map(|r| r.protect_against_force_close)
            .unwrap_or(false)
    }
}

/// Channel id -> protection map shared by the protector (writer) and the
/// circuit breaker (reader).
///
/// Each publish swaps in a whole new generation; readers hold an `Arc` to
/// the generation they loaded and never see a partially rebuilt map.
#[derive(Clone)]
pub struct ProtectionRegistry {
    tx: Arc<watch::Sender<Arc<ProtectionGeneration>>>,
}

impl ProtectionRegistry {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ProtectionGeneration::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current generation with `records`, dropping every entry of
    /// the previous one. Returns the new generation number.
    pub fn publish(&self, records: HashMap<u64, ProtectionRecord>) -> u64 {
        let number = self.tx.borrow().number + 1;
        self.tx
            .send_replace(Arc::new(ProtectionGeneration { number, records }));
        number
    }

    pub fn snapshot(&self) -> Arc<ProtectionGeneration> {
        self.tx.borrow().clone()
    }
}

impl Default for ProtectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
