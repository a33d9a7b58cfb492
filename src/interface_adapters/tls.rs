//! TLS pinning for the lobby connection (§4.B component B).
//!
//! The agent does not merely trust the lobby's CA chain: it additionally
//! accepts a connection whose certificate's SHA-256 fingerprint is in a
//! per-host trusted set, seeded by `--tls-cert-trust` on the command line.
//! `rustls`/`tokio-rustls` and `sha2` are the same combination the pack's
//! own network services use for exactly this kind of long-lived,
//! reconnecting TLS session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use sha2::{Digest, Sha256};

/// The SHA-256 fingerprint of a leaf certificate, hex-encoded lowercase —
/// the form `--tls-cert-trust=host:hash` accepts and `--tls-cert-list`
/// prints.
pub fn fingerprint(der: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(der.as_ref());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Outcome of the pinning decision (§4.B): accepted by pin, accepted by the
/// normal CA chain, or rejected outright (process exits "certificate",
/// §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsDecision {
    AcceptedByPin,
    AcceptedByChain,
    Rejected,
}

/// Per-host sets of trusted fingerprints, mutated atomically by
/// `--tls-cert-trust` and `--tls-cert-revoke` (§6).
#[derive(Debug, Default, Clone)]
pub struct CertTrustStore {
    trusted: HashMap<String, HashSet<String>>,
}

impl CertTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically adds `hash` to `host`'s trusted set, as `--tls-cert-trust`
    /// does while the process is already running against that host.
    pub fn trust(&mut self, host: &str, hash: impl Into<String>) {
        self.trusted.entry(host.to_string()).or_default().insert(normalize(&hash.into()));
    }

    pub fn revoke(&mut self, host: &str, hash: &str) {
        if let Some(set) = self.trusted.get_mut(host) {
            set.remove(&normalize(hash));
        }
    }

    pub fn is_trusted(&self, host: &str, hash: &str) -> bool {
        self.trusted.get(host).map(|set| set.contains(&normalize(hash))).unwrap_or(false)
    }

    pub fn list(&self, host: &str) -> Vec<String> {
        let mut v: Vec<String> = self.trusted.get(host).cloned().unwrap_or_default().into_iter().collect();
        v.sort();
        v
    }

    /// Renders the store as `host hash` lines for the on-disk persistence
    /// `--tls-cert-trust`/`--tls-cert-revoke` rely on across process
    /// restarts (no wire format is specified upstream for this; a flat
    /// line format mirrors the rest of this crate's flat-file state).
    pub fn to_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut hosts: Vec<&String> = self.trusted.keys().collect();
        hosts.sort();
        for host in hosts {
            let mut hashes: Vec<&String> = self.trusted[host].iter().collect();
            hashes.sort();
            for hash in hashes {
                out.push(format!("{host} {hash}"));
            }
        }
        out
    }

    pub fn from_lines(lines: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut store = Self::new();
        for line in lines {
            let line = line.as_ref();
            if let Some((host, hash)) = line.split_once(' ') {
                store.trust(host, hash);
            }
        }
        store
    }
}

fn normalize(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

/// Decides whether to accept the peer certificate presented for `host`:
/// accept iff (a) its fingerprint is pinned, or (b) `chain_verified` (the
/// rustls webpki-roots chain already authenticated it), per §4.B.
pub fn decide(host: &str, leaf: &CertificateDer<'_>, store: &CertTrustStore, chain_verified: bool) -> TlsDecision {
    let hash = fingerprint(leaf);
    if store.is_trusted(host, &hash) {
        TlsDecision::AcceptedByPin
    } else if chain_verified {
        TlsDecision::AcceptedByChain
    } else {
        TlsDecision::Rejected
    }
}

/// A `rustls` `ServerCertVerifier` that first tries the normal webpki-roots
/// chain, falling back to the pin set in `CertTrustStore` (shared with the
/// CLI's `--tls-cert-trust`/`--tls-cert-list` handling) when the chain
/// fails. Built once per `ConnectionManager`, not per connection attempt.
#[derive(Debug)]
pub struct PinningVerifier {
    host: String,
    store: Arc<std::sync::Mutex<CertTrustStore>>,
    chain_verifier: Arc<rustls::client::WebPkiServerVerifier>,
}

impl PinningVerifier {
    pub fn new(host: impl Into<String>, store: Arc<std::sync::Mutex<CertTrustStore>>, roots: Arc<rustls::RootCertStore>) -> Result<Self, rustls::client::VerifierBuilderError> {
        let chain_verifier = rustls::client::WebPkiServerVerifier::builder(roots).build()?;
        Ok(Self { host: host.into(), store, chain_verifier })
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let chain_result = self.chain_verifier.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        let chain_verified = chain_result.is_ok();

        let decision = {
            let store = self.store.lock().expect("trust store mutex poisoned");
            decide(&self.host, end_entity, &store, chain_verified)
        };

        match decision {
            TlsDecision::AcceptedByPin | TlsDecision::AcceptedByChain => Ok(ServerCertVerified::assertion()),
            TlsDecision::Rejected => chain_result,
        }
    }

    fn verify_tls12_signature(&self, message: &[u8], cert: &CertificateDer<'_>, dss: &DigitallySignedStruct) -> Result<HandshakeSignatureValid, TlsError> {
        self.chain_verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(&self, message: &[u8], cert: &CertificateDer<'_>, dss: &DigitallySignedStruct) -> Result<HandshakeSignatureValid, TlsError> {
        self.chain_verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.chain_verifier.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_hash_is_trusted_regardless_of_chain() {
        let mut store = CertTrustStore::new();
        store.trust("lobby.example", "AA:BB".replace(':', ""));
        assert!(store.is_trusted("lobby.example", "aabb"));
    }

    #[test]
    fn revoke_removes_pin() {
        let mut store = CertTrustStore::new();
        store.trust("lobby.example", "aabb");
        store.revoke("lobby.example", "AABB");
        assert!(!store.is_trusted("lobby.example", "aabb"));
    }

    #[test]
    fn decide_rejects_when_neither_pinned_nor_chain_verified() {
        let store = CertTrustStore::new();
        let der = CertificateDer::from(vec![1, 2, 3]);
        assert_eq!(decide("lobby.example", &der, &store, false), TlsDecision::Rejected);
    }

    #[test]
    fn decide_accepts_by_chain_when_not_pinned() {
        let store = CertTrustStore::new();
        let der = CertificateDer::from(vec![1, 2, 3]);
        assert_eq!(decide("lobby.example", &der, &store, true), TlsDecision::AcceptedByChain);
    }

    #[test]
    fn decide_prefers_pin_even_without_chain() {
        let mut store = CertTrustStore::new();
        let der = CertificateDer::from(vec![9, 9, 9]);
        let hash = fingerprint(&der);
        store.trust("lobby.example", hash);
        assert_eq!(decide("lobby.example", &der, &store, false), TlsDecision::AcceptedByPin);
    }
}
