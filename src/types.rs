use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width in bytes of every identifier, seed and commitment exchanged with a stage.
pub const BYTES32_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum HexError {
    #[error("hex value must start with `0x`")]
    MissingPrefix,
    #[error("Failed to decode hex: {0}")]
    Decode(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// A fixed-width binary value. It is `0x`-prefixed hex at every boundary and
/// never interpreted by the pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32(pub [u8; BYTES32_LEN]);

pub type PorepId = Bytes32;
pub type ReplicaId = Bytes32;
pub type Seed = Bytes32;
pub type Commitment = Bytes32;

impl Bytes32 {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; BYTES32_LEN]> for Bytes32 {
    fn from(bytes: [u8; BYTES32_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Bytes32 {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").ok_or(HexError::MissingPrefix)?;
        let bytes = hex::decode(digits)?;
        let array: [u8; BYTES32_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| HexError::WrongLength {
                    expected: BYTES32_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
