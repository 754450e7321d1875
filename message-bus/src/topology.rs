//! Startup declaration of the pin exchanges

use crate::{broker::Broker, types::Exchange, Result};
use tracing::{error, info};

/// Declare every ledger exchange.
///
/// Stops at the first failure. A [`TopologyMismatch`](crate::Error::TopologyMismatch)
/// means the broker holds an exchange with different parameters; callers
/// must abort startup instead of retrying.
pub async fn declare_topology(broker: &dyn Broker) -> Result<()> {
    for exchange in Exchange::ALL {
        let spec = exchange.spec();

        if let Err(e) = broker.declare(&spec).await {
            if e.is_fatal() {
                error!(%exchange, error = %e, "Broker topology drift detected");
            } else {
                error!(%exchange, error = %e, "Failed to declare exchange");
            }
            return Err(e);
        }

        info!(%exchange, routing_key = exchange.routing_key(), "Exchange declared");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::InMemoryBroker, types::ExchangeSpec, Error};

    #[tokio::test]
    async fn test_declares_both_exchanges() {
        let broker = InMemoryBroker::new();
        declare_topology(&broker).await.unwrap();

        assert_eq!(broker.declared("ipfs-pin"), Some(Exchange::Pin.spec()));
        assert_eq!(
            broker.declared("ipfs-pin-removal"),
            Some(Exchange::PinRemoval.spec())
        );
    }

    #[tokio::test]
    async fn test_declaring_twice_is_idempotent() {
        let broker = InMemoryBroker::new();
        declare_topology(&broker).await.unwrap();
        declare_topology(&broker).await.unwrap();
    }

    #[tokio::test]
    async fn test_drift_is_fatal() {
        let broker = InMemoryBroker::new();

        let mut drifted = ExchangeSpec::fanout("ipfs-pin-removal");
        drifted.durable = false;
        broker.declare(&drifted).await.unwrap();

        let err = declare_topology(&broker).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            Error::TopologyMismatch { ref exchange, .. } if exchange == "ipfs-pin-removal"
        ));
    }
}
