use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::Commitment;

/// Values one stage produces and later stages consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CommD,
    CommC,
    CommRLast,
    CommR,
    Challenges,
    SnarkVerdict,
    AggregateVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Commitment,
    Challenges,
    Verdict,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::CommD => "comm_d",
            Field::CommC => "comm_c",
            Field::CommRLast => "comm_r_last",
            Field::CommR => "comm_r",
            Field::Challenges => "challenges",
            Field::SnarkVerdict => "snark_verdict",
            Field::AggregateVerdict => "aggregate_verdict",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::CommD | Field::CommC | Field::CommRLast | Field::CommR => FieldKind::Commitment,
            Field::Challenges => FieldKind::Challenges,
            Field::SnarkVerdict | Field::AggregateVerdict => FieldKind::Verdict,
        }
    }

    /// Checks the shape of a response value. Commitments must be 32 bytes of
    /// `0x` hex; their content is never looked at.
    pub fn parse(self, value: &Value) -> Result<FieldValue, String> {
        match self.kind() {
            FieldKind::Commitment => serde_json::from_value(value.clone())
                .map(FieldValue::Commitment)
                .map_err(|e| format!("`{self}` is not a commitment: {e}")),
            FieldKind::Challenges => serde_json::from_value(value.clone())
                .map(FieldValue::Challenges)
                .map_err(|e| format!("`{self}` is not a list of challenge indices: {e}")),
            FieldKind::Verdict => value
                .as_bool()
                .map(FieldValue::Verdict)
                .ok_or_else(|| format!("`{self}` is not a boolean verdict: `{value}`")),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Commitment(Commitment),
    Challenges(Vec<u64>),
    Verdict(bool),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Commitment(comm) => Value::String(comm.to_hex()),
            FieldValue::Challenges(challenges) => Value::from(challenges.clone()),
            FieldValue::Verdict(verdict) => Value::Bool(*verdict),
        }
    }

    pub fn as_commitment(&self) -> Option<Commitment> {
        match self {
            FieldValue::Commitment(comm) => Some(*comm),
            _ => None,
        }
    }

    pub fn as_challenges(&self) -> Option<&[u64]> {
        match self {
            FieldValue::Challenges(challenges) => Some(challenges),
            _ => None,
        }
    }

    pub fn as_verdict(&self) -> Option<bool> {
        match self {
            FieldValue::Verdict(verdict) => Some(*verdict),
            _ => None,
        }
    }
}
