//! SecureVault Core - Biometric Broker Seam

use secrecy::SecretString;

/// Opaque producer of the cached master secret.
///
/// The platform broker attests "user present" and, on success, hands back
/// the secret it unsealed from wherever it keeps it (OS keystore or
/// similar). How the secret is sealed is the broker's problem; the core
/// only runs the returned secret through the normal unlock path.
pub trait BiometricBroker: Send + Sync {
    /// Attest presence and yield the cached secret, or `None` if the
    /// attestation failed or no secret is cached.
    fn acquire_secret(&self) -> Option<SecretString>;
}

#[cfg(test)]
pub(crate) struct StaticBroker(pub &'static str);

#[cfg(test)]
impl BiometricBroker for StaticBroker {
    fn acquire_secret(&self) -> Option<SecretString> {
        Some(SecretString::new(self.0.to_string()))
    }
}
