//! Thin wrappers around the cryptographic primitives the ledger and network
//! layers call into (hashing, ECDSA signing/recovery). The primitives
//! themselves are an external collaborator per the design: this crate does
//! not attempt to be a general-purpose crypto library, only the minimal
//! surface the rest of the workspace needs.

use sha3::{Digest, Keccak256};

pub const HASH_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 65;

/// `sha3()` as used throughout the ledger for block and transaction hashes.
/// FISCO-BCOS (like most Ethereum-family chains) actually uses Keccak-256
/// under the `sha3` name; this implementation keeps that naming.
pub fn sha3(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; HASH_LENGTH];
    buf.copy_from_slice(&out);
    buf
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(#[from] secp256k1::Error),
}

/// A 65-byte recoverable ECDSA signature: `r || s || recovery_id`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Signs a 32-byte message digest with a raw secp256k1 secret key.
pub fn sign(secret_key: &[u8; 32], digest: &[u8; 32]) -> Result<Signature, CryptoError> {
    let secp = secp256k1::Secp256k1::signing_only();
    let sk = secp256k1::SecretKey::from_slice(secret_key)
        .map_err(|_| CryptoError::InvalidSecretKey)?;
    let msg = secp256k1::Message::from_slice(digest)?;
    let (rec_id, sig) = secp.sign_ecdsa_recoverable(&msg, &sk).serialize_compact();
    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&sig);
    out[64] = rec_id.to_i32() as u8;
    Ok(Signature(out))
}

/// Recovers the 64-byte uncompressed public key (without the leading tag
/// byte) that produced `signature` over `digest`.
pub fn recover(digest: &[u8; 32], signature: &Signature) -> Result<[u8; 64], CryptoError> {
    let secp = secp256k1::Secp256k1::verification_only();
    let msg = secp256k1::Message::from_slice(digest)?;
    let rec_id = secp256k1::ecdsa::RecoveryId::from_i32(signature.0[64] as i32)?;
    let rec_sig =
        secp256k1::ecdsa::RecoverableSignature::from_compact(&signature.0[..64], rec_id)?;
    let pubkey = secp.recover_ecdsa(&msg, &rec_sig)?;
    let serialized = pubkey.serialize_uncompressed();
    let mut out = [0u8; 64];
    out.copy_from_slice(&serialized[1..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_is_deterministic() {
        let a = sha3(b"hello");
        let b = sha3(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, sha3(b"world"));
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let secret_key = [7u8; 32];
        let digest = sha3(b"a transaction");
        let signature = sign(&secret_key, &digest).unwrap();
        let recovered = recover(&digest, &signature).unwrap();

        let secp = secp256k1::Secp256k1::signing_only();
        let sk = secp256k1::SecretKey::from_slice(&secret_key).unwrap();
        let pubkey = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let expected = &pubkey.serialize_uncompressed()[1..];
        assert_eq!(&recovered[..], expected);
    }
}
