use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::borrow::Borrow;

/// Brokerage account identifier - the partition key for nearly all daemon
/// state.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct AccountId(pub i64);

impl AccountId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Gateway position identifier.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct PositionId(pub i64);

/// Gateway order identifier.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct OrderId(pub i64);

/// Gateway trade (execution fill) identifier.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct TradeId(pub i64);

/// Opaque contract identifier (eg/ "CON.F.US.MNQ.U25").
///
/// Case-sensitive - stored verbatim as the gateway sends it.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct ContractId(pub SmolStr);

impl ContractId {
    pub fn new<S>(id: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(id.into())
    }
}

impl From<&str> for ContractId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for ContractId {
    fn borrow(&self) -> &str {
        self.0.borrow()
    }
}

impl AsRef<str> for ContractId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Opaque symbol identifier shared by all expiries of one instrument
/// (eg/ "F.US.MNQ").
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct SymbolId(pub SmolStr);

impl SymbolId {
    pub fn new<S>(id: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(id.into())
    }

    /// Short symbol root (final dot-separated segment), used for per-symbol
    /// rule configuration (eg/ "MNQ" from "F.US.MNQ").
    pub fn root(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(self.0.as_str())
    }
}

impl From<&str> for SymbolId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for SymbolId {
    fn borrow(&self) -> &str {
        self.0.borrow()
    }
}

impl AsRef<str> for SymbolId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_root_extracts_final_segment() {
        assert_eq!(SymbolId::new("F.US.MNQ").root(), "MNQ");
        assert_eq!(SymbolId::new("MNQ").root(), "MNQ");
    }
}
