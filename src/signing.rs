//! Signature verification boundary.
//!
//! The matcher's own signing key, and the wallet that holds it, are external
//! collaborators: this module only defines the
//! types orders and cancellations are checked against, and the verifier trait
//! the validator calls through. Production code verifies with `secp256k1`;
//! tests use a deterministic fake that never fails closed accidentally.

use secp256k1::ecdsa::Signature as Secp256k1Signature;
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, Secp256k1};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 33]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub [u8; 64]);

/// An address derived from a public key (here: its SHA3-256 digest, truncated).
/// Base58 text encoding is an out-of-scope wire concern; addresses are compared
/// and stored as raw bytes internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_public_key(pk: &PublicKey) -> Self {
        use sha3::{Digest, Sha3_256};
        let digest = Sha3_256::digest(pk.0);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Address(bytes)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Verifies that a message was signed by the holder of a given public key.
///
/// Implementations must be side-effect free and safe to call from within the
/// `OrderValidator` on the hot path of every submission.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool;
}

/// Production verifier: ECDSA over secp256k1, message pre-hashed with SHA3-256.
pub struct Secp256k1Verifier {
    ctx: Secp256k1<secp256k1::VerifyOnly>,
}

impl Default for Secp256k1Verifier {
    fn default() -> Self {
        Self {
            ctx: Secp256k1::verification_only(),
        }
    }
}

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
        use sha3::{Digest, Sha3_256};

        let digest = Sha3_256::digest(message);
        let msg = match Message::from_digest_slice(&digest) {
            Ok(m) => m,
            Err(_) => return false,
        };
        let sig = match Secp256k1Signature::from_compact(&signature.0) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let pk = match Secp256k1PublicKey::from_slice(&public_key.0) {
            Ok(p) => p,
            Err(_) => return false,
        };

        self.ctx.verify_ecdsa(&msg, &sig, &pk).is_ok()
    }
}

/// Produces the matcher's own signature over an outgoing exchange
/// transaction, before it is handed to the settlement layer.
///
/// The matcher's signing key itself stays behind this trait's
/// implementation (an external wallet collaborator); this module only
/// defines the boundary the controller signs through.
pub trait MatcherSigner: Send + Sync {
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Production signer: ECDSA over secp256k1, message pre-hashed with
/// SHA3-256, symmetric with [`Secp256k1Verifier`].
pub struct Secp256k1Signer {
    ctx: Secp256k1<secp256k1::SignOnly>,
    secret: secp256k1::SecretKey,
}

impl Secp256k1Signer {
    pub fn new(secret: secp256k1::SecretKey) -> Self {
        Self {
            ctx: Secp256k1::signing_only(),
            secret,
        }
    }
}

impl MatcherSigner for Secp256k1Signer {
    fn sign(&self, message: &[u8]) -> Signature {
        use sha3::{Digest, Sha3_256};

        let digest = Sha3_256::digest(message);
        let msg = Message::from_digest_slice(&digest).expect("sha3-256 digest is 32 bytes");
        let sig = self.ctx.sign_ecdsa(&msg, &self.secret);
        Signature(sig.serialize_compact())
    }
}
