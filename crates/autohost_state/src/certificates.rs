//! Trusted lobby certificates (`trustedLobbyCertificates.dat`).

use std::collections::{BTreeMap, BTreeSet};

use crate::shared::{decode_binary, encode_binary, Dataset, StorageKind};

/// Certificate hashes trusted for each lobby host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedCertificates(BTreeMap<String, BTreeSet<String>>);

impl TrustedCertificates {
    /// Returns false when the hash was already trusted.
    pub fn trust(&mut self, host: &str, hash: &str) -> bool {
        self.0
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(hash.to_ascii_lowercase())
    }

    /// Returns false when the hash was not trusted.
    pub fn untrust(&mut self, host: &str, hash: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let Some(hashes) = self.0.get_mut(&host) else {
            return false;
        };
        let removed = hashes.remove(&hash.to_ascii_lowercase());
        if hashes.is_empty() {
            self.0.remove(&host);
        }
        removed
    }

    pub fn is_trusted(&self, host: &str, hash: &str) -> bool {
        self.0
            .get(&host.to_ascii_lowercase())
            .is_some_and(|hashes| hashes.contains(&hash.to_ascii_lowercase()))
    }

    pub fn hashes(&self, host: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(&host.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

impl Dataset for TrustedCertificates {
    const NAME: &'static str = "trustedLobbyCertificates";
    const KIND: StorageKind = StorageKind::Binary;

    fn decode(content: &[u8]) -> Result<Self, String> {
        decode_binary(content).map(Self)
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        encode_binary(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_cycle() {
        let mut certs = TrustedCertificates::default();
        assert!(certs.trust("Lobby.Example.org", "ABCDEF"));
        assert!(!certs.trust("lobby.example.org", "abcdef"));
        assert!(certs.is_trusted("lobby.example.org", "AbCdEf"));
        assert!(!certs.is_trusted("other.example.org", "abcdef"));
        assert_eq!(certs.hashes("lobby.example.org").collect::<Vec<_>>(), ["abcdef"]);

        let decoded = TrustedCertificates::decode(&certs.encode().unwrap()).unwrap();
        assert_eq!(decoded, certs);

        assert!(certs.untrust("lobby.example.org", "abcdef"));
        assert!(!certs.untrust("lobby.example.org", "abcdef"));
        assert_eq!(certs, TrustedCertificates::default());
    }
}
