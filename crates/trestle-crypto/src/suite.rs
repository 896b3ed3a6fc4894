//! Cipher-suite negotiation.
//!
//! A sender advertises its supported suites in transfer metadata and the
//! receiver selects the strongest suite both peers support. All suites use
//! AES-256-GCM for bulk encryption; they differ in the planned key-exchange
//! hardening tier.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Cipher suite for a transfer session.
///
/// Priority order for negotiation is Hybrid > PostQuantum > Classic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    /// Hybrid classical + post-quantum key agreement.
    Hybrid,
    /// Post-quantum only key agreement.
    PostQuantum,
    /// Classical key agreement. Fallback for legacy peers.
    Classic,
}

impl CipherSuite {
    /// Negotiate the strongest common suite between local and remote sets.
    ///
    /// Returns `None` if no common suite exists.
    #[must_use]
    pub fn negotiate(local: &[CipherSuite], remote: &[CipherSuite]) -> Option<CipherSuite> {
        let priority = [
            CipherSuite::Hybrid,
            CipherSuite::PostQuantum,
            CipherSuite::Classic,
        ];

        for suite in &priority {
            if local.contains(suite) && remote.contains(suite) {
                return Some(*suite);
            }
        }

        None
    }

    /// The string carried in the metadata `cipher_suite` field.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Hybrid => "hybrid",
            CipherSuite::PostQuantum => "pqc",
            CipherSuite::Classic => "classic",
        }
    }

    /// Parse a suite from its metadata name.
    ///
    /// Returns `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hybrid" => Some(CipherSuite::Hybrid),
            "pqc" => Some(CipherSuite::PostQuantum),
            "classic" => Some(CipherSuite::Classic),
            _ => None,
        }
    }

    /// All suites this build supports, strongest first.
    #[must_use]
    pub fn supported() -> &'static [CipherSuite] {
        &[
            CipherSuite::Hybrid,
            CipherSuite::PostQuantum,
            CipherSuite::Classic,
        ]
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_prefers_hybrid() {
        let local = CipherSuite::supported();
        let remote = [CipherSuite::Classic, CipherSuite::Hybrid];
        assert_eq!(
            CipherSuite::negotiate(local, &remote),
            Some(CipherSuite::Hybrid)
        );
    }

    #[test]
    fn negotiation_falls_back_to_classic() {
        let local = [CipherSuite::Hybrid, CipherSuite::Classic];
        let remote = [CipherSuite::Classic];
        assert_eq!(
            CipherSuite::negotiate(&local, &remote),
            Some(CipherSuite::Classic)
        );
    }

    #[test]
    fn negotiation_fails_with_no_overlap() {
        let local = [CipherSuite::Hybrid];
        let remote = [CipherSuite::Classic];
        assert_eq!(CipherSuite::negotiate(&local, &remote), None);
    }

    #[test]
    fn name_roundtrip() {
        for suite in CipherSuite::supported() {
            assert_eq!(CipherSuite::from_name(suite.name()), Some(*suite));
        }
        assert_eq!(CipherSuite::from_name("aes-cbc"), None);
    }
}
