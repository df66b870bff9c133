use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Debug, thiserror::Error)]
pub enum ParseFixedBytesError {
    #[error("expected {expected} hex-encoded bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        #[derive(
            BorshSerialize, BorshDeserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
        )]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseFixedBytesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                if bytes.len() != $len {
                    return Err(ParseFixedBytesError::WrongLength {
                        expected: $len,
                        got: bytes.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(Hash, 32);
fixed_bytes!(NodeId, 64);
fixed_bytes!(Address, 20);

/// `sha3()` of a borsh-canonical encoding, the hashing convention used for
/// both block headers and transactions.
pub fn hash_of<T: BorshSerialize>(value: &T) -> Hash {
    let bytes = borsh::to_vec(value).expect("in-memory borsh serialization cannot fail");
    Hash(bc_crypto::sha3(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrips_through_display_and_parse() {
        let h = Hash([7u8; 32]);
        let s = h.to_string();
        let parsed: Hash = s.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Hash::from_str("0xabcd").unwrap_err();
        assert!(matches!(err, ParseFixedBytesError::WrongLength { .. }));
    }
}
