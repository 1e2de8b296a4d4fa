//! Node identities and endpoint addresses
//!
//! Nodes are identified by their Ed25519 public key ([`PubKey`]). An
//! endpoint of a logical flow is a public key plus a [`Port`], together an
//! [`Addr`].

use std::fmt::{Debug, Display};
use std::str::FromStr;

use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Length of a public key in bytes
pub const PUBKEY_LEN: usize = 32;

/// Public key identifying a node in the mesh
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PubKey([u8; PUBKEY_LEN]);

impl PubKey {
    /// Create a public key from its raw bytes
    pub fn new(bytes: [u8; PUBKEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a public key from a slice, checking its length
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; PUBKEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyLength {
                    expected: PUBKEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8; PUBKEY_LEN] {
        &self.0
    }

    /// Whether this is the all-zero key
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; PUBKEY_LEN]
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PubKey({})", self.short_id())
    }
}

impl FromStr for PubKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| IdentityError::InvalidFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl From<ed25519_dalek::VerifyingKey> for PubKey {
    fn from(key: ed25519_dalek::VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

/// Ed25519 key pair of a node
///
/// Only the public half takes part in routing; the secret half is handed to
/// the transport layer, which owns link authentication.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Generate `n` key pairs
    pub fn generate_many(n: usize) -> Vec<Self> {
        (0..n).map(|_| Self::generate()).collect()
    }

    /// The public key of this pair
    pub fn public_key(&self) -> PubKey {
        self.signing.verifying_key().into()
    }

    /// The signing key of this pair
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.public_key().short_id())
    }
}

/// Port number of a flow endpoint
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Port(pub u16);

impl Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Port {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

/// A flow endpoint: public key and port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addr {
    pub pk: PubKey,
    pub port: Port,
}

impl Addr {
    pub fn new(pk: PubKey, port: Port) -> Self {
        Self { pk, port }
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.pk, self.port)
    }
}
