use crate::types::RemoteNodeInfo;

/// Decides whether a peer runs an implementation the reconnect trick works on.
pub trait PeerClassifier: Send + Sync {
    fn is_candidate(&self, node: &RemoteNodeInfo) -> bool;
}

/// Classifies peers by a single advertised feature bit.
///
/// The optional AMP bit is only advertised by LND, which fails back incoming
/// HTLCs on reconnect without waiting for the outgoing side to resolve.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBitClassifier {
    pub bit: u32,
}

impl FeatureBitClassifier {
    pub fn new(bit: u32) -> Self {
        Self { bit }
    }
}

impl PeerClassifier for FeatureBitClassifier {
    fn is_candidate(&self, node: &RemoteNodeInfo) -> bool {
        node.features.contains(&self.bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(features: &[u32]) -> RemoteNodeInfo {
        RemoteNodeInfo {
            features: features.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_feature_bit_present() {
        let c = FeatureBitClassifier::new(31);
        assert!(c.is_candidate(&node(&[0, 9, 31])));
    }

    #[test]
    fn test_feature_bit_absent() {
        let c = FeatureBitClassifier::new(31);
        assert!(!c.is_candidate(&node(&[])));
        // The required variant of the bit does not count
        assert!(!c.is_candidate(&node(&[30])));
    }
}
