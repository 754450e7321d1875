//! Exchange topology types
//!
//! Exchange names and routing keys are part of the public contract: pin
//! workers bind to them by name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fanout exchange for regular IPFS pins
pub const PIN_EXCHANGE: &str = "ipfs-pin";
/// Routing key used for IPFS pin publications
pub const PIN_EXCHANGE_KEY: &str = "ipfs-pin-key";
/// Fanout exchange for pin removals
pub const PIN_REMOVAL_EXCHANGE: &str = "ipfs-pin-removal";
/// Routing key used for pin removal publications
pub const PIN_REMOVAL_EXCHANGE_KEY: &str = "ipfs-pin-removal-key";

/// Broadcast exchanges owned by the pin ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Pin-triggering events (payment confirmations)
    Pin,
    /// Pin-removal events
    PinRemoval,
}

impl Exchange {
    /// All exchanges declared at startup
    pub const ALL: [Exchange; 2] = [Exchange::Pin, Exchange::PinRemoval];

    /// Exchange name
    pub fn name(&self) -> &'static str {
        match self {
            Exchange::Pin => PIN_EXCHANGE,
            Exchange::PinRemoval => PIN_REMOVAL_EXCHANGE,
        }
    }

    /// Fixed routing key for publications on this exchange
    pub fn routing_key(&self) -> &'static str {
        match self {
            Exchange::Pin => PIN_EXCHANGE_KEY,
            Exchange::PinRemoval => PIN_REMOVAL_EXCHANGE_KEY,
        }
    }

    /// Declaration parameters
    pub fn spec(&self) -> ExchangeSpec {
        ExchangeSpec::fanout(self.name())
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Exchange kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Deliver a copy to every bound subscriber, ignoring routing keys
    Fanout,
    /// Route on exact routing key match
    Direct,
    /// Route on routing key pattern
    Topic,
}

impl ExchangeKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// Exchange declaration parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSpec {
    /// Exchange name
    pub name: String,

    /// Exchange kind
    pub kind: ExchangeKind,

    /// Survives broker restart
    pub durable: bool,

    /// Removed once the last binding goes away
    pub auto_delete: bool,

    /// Not publishable by clients
    pub internal: bool,

    /// Do not wait for the broker to confirm the declaration
    pub no_wait: bool,

    /// Extra broker arguments
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl ExchangeSpec {
    /// Durable, non-auto-deleted, non-internal fanout exchange without arguments
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
            durable: true,
            auto_delete: false,
            internal: false,
            no_wait: false,
            args: BTreeMap::new(),
        }
    }

    /// Whether `other` declares the same exchange name with different
    /// parameters. `no_wait` only affects the declare call itself.
    pub fn conflicts_with(&self, other: &ExchangeSpec) -> bool {
        self.name == other.name && self.fingerprint() != other.fingerprint()
    }

    /// Canonical description of the parameters that define the exchange
    pub fn fingerprint(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "kind={};durable={};auto_delete={};internal={};args=[{}]",
            self.kind.as_str(),
            self.durable,
            self.auto_delete,
            self.internal,
            args
        )
    }
}

/// Sanitize string for use in a NATS subject token
pub(crate) fn sanitize_subject(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_names_and_keys() {
        assert_eq!(Exchange::Pin.name(), "ipfs-pin");
        assert_eq!(Exchange::Pin.routing_key(), "ipfs-pin-key");
        assert_eq!(Exchange::PinRemoval.name(), "ipfs-pin-removal");
        assert_eq!(Exchange::PinRemoval.routing_key(), "ipfs-pin-removal-key");
    }

    #[test]
    fn test_fanout_spec_defaults() {
        let spec = Exchange::Pin.spec();
        assert_eq!(spec.kind, ExchangeKind::Fanout);
        assert!(spec.durable);
        assert!(!spec.auto_delete);
        assert!(!spec.internal);
        assert!(!spec.no_wait);
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_conflicts_with() {
        let spec = ExchangeSpec::fanout("ipfs-pin");

        assert!(!spec.conflicts_with(&spec.clone()));

        let mut no_wait = spec.clone();
        no_wait.no_wait = true;
        assert!(!spec.conflicts_with(&no_wait));

        let mut transient = spec.clone();
        transient.durable = false;
        assert!(spec.conflicts_with(&transient));

        let mut direct = spec.clone();
        direct.kind = ExchangeKind::Direct;
        assert!(spec.conflicts_with(&direct));

        let mut with_args = spec.clone();
        with_args.args.insert("alternate-exchange".to_string(), "dlx".to_string());
        assert!(spec.conflicts_with(&with_args));

        // Different names never conflict
        assert!(!spec.conflicts_with(&ExchangeSpec::fanout("ipfs-pin-removal")));
    }

    #[test]
    fn test_sanitize_subject() {
        assert_eq!(sanitize_subject("ipfs-pin-key"), "ipfs-pin-key");
        assert_eq!(sanitize_subject("a.b*c>"), "a_b_c_");
    }
}
