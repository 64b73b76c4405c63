// Pluggable credential verification; the registry never stores raw secrets.
use sha2::{Digest, Sha256};

pub trait CredentialVerifier: Send + Sync {
    /// Digest a secret for storage.
    fn digest(&self, secret: &str) -> String;

    /// Check a presented secret against a stored digest.
    fn verify(&self, secret: &str, digest: &str) -> bool {
        self.digest(secret) == digest
    }
}

/// Default verifier: hex-encoded SHA-256 digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Credentials;

impl CredentialVerifier for Sha256Credentials {
    fn digest(&self, secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }
}
