use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

pub type ChainId = u64;

/// Token amounts in the token's smallest unit (Solidity `uint256`).
pub type Amount = alloy_primitives::U256;

macro_rules! impl_fixed_bytes_id {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const ZERO: Self = Self([0u8; $len]);

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
                if bytes.len() != Self::LEN {
                    return Err(ValidationError::InvalidLength {
                        kind: stringify!($name),
                        expected: Self::LEN,
                        actual: bytes.len(),
                    });
                }
                let mut out = [0u8; Self::LEN];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }

            /// Parses a `0x`-prefixed (or bare) hex string of exactly `LEN` bytes.
            pub fn parse(value: &str) -> Result<Self, ValidationError> {
                let digits = value
                    .strip_prefix("0x")
                    .or_else(|| value.strip_prefix("0X"))
                    .unwrap_or(value);
                if digits.len() != Self::LEN * 2 {
                    return Err(ValidationError::InvalidLength {
                        kind: stringify!($name),
                        expected: Self::LEN,
                        actual: digits.len() / 2,
                    });
                }
                let bytes =
                    hex::decode(digits).map_err(|err| ValidationError::InvalidHex(err.to_string()))?;
                Self::from_slice(&bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub const fn into_inner(self) -> [u8; $len] {
                self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
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

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(value: [u8; $len]) -> Self {
                Self::new(value)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = ValidationError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                Self::from_slice(value)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        // Hex strings on the wire so ids can key JSON maps.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(de::Error::custom)
            }
        }
    };
}

impl_fixed_bytes_id!(Address, 20);
impl_fixed_bytes_id!(SessionId, 32);
impl_fixed_bytes_id!(CommitmentHash, 32);
impl_fixed_bytes_id!(DomainSeparator, 32);
impl_fixed_bytes_id!(TxHash, 32);

impl From<Address> for alloy_primitives::Address {
    fn from(value: Address) -> Self {
        alloy_primitives::Address::from(value.into_inner())
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(value: alloy_primitives::Address) -> Self {
        Address::new(value.0 .0)
    }
}

macro_rules! impl_b256_conversions {
    ($name:ident) => {
        impl From<$name> for alloy_primitives::B256 {
            fn from(value: $name) -> Self {
                alloy_primitives::B256::from(value.into_inner())
            }
        }

        impl From<alloy_primitives::B256> for $name {
            fn from(value: alloy_primitives::B256) -> Self {
                $name::new(value.0)
            }
        }
    };
}

impl_b256_conversions!(SessionId);
impl_b256_conversions!(CommitmentHash);
impl_b256_conversions!(DomainSeparator);
impl_b256_conversions!(TxHash);

#[cfg(test)]
mod tests {
    use super::{Address, SessionId};
    use crate::ValidationError;

    #[test]
    fn parses_prefixed_and_bare_hex() {
        let a = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let b = Address::parse("00000000000000000000000000000000000000AA").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes()[19], 0xaa);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(matches!(
            Address::parse("0x1234"),
            Err(ValidationError::InvalidLength { kind: "Address", .. })
        ));
        assert!(matches!(
            Address::parse("0xzz000000000000000000000000000000000000aa"),
            Err(ValidationError::InvalidHex(_))
        ));
        assert!("not-an-address".parse::<Address>().is_err());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let id = SessionId::new([0x11; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "11".repeat(32)));
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn converts_to_and_from_alloy() {
        let addr = Address::new([0x42; 20]);
        let alloy: alloy_primitives::Address = addr.into();
        assert_eq!(Address::from(alloy), addr);
        assert!(Address::ZERO.is_zero());
    }
}
