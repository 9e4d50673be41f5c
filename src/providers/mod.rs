//! Payment providers: the trait, the registry, the shared connector wire
//! contract and the four concrete methods.

mod card;
mod connector;
mod crypto;
mod paypal;
mod qr;
mod registry;
mod types;

pub use card::{CardProvider, CARD};
pub use connector::{ConnectorClient, ConnectorInitReply, ConnectorInitRequest};
pub use crypto::{execution_token, parse_execution_token, CryptoProvider, CRYPTO};
pub use paypal::{PaypalProvider, PAYPAL};
pub use qr::{QrProvider, QR};
pub use registry::ProviderRegistry;
pub use types::{
    InitiateContext, InitiateOutcome, PaymentInstruction, Provider, SettlementExpectation,
};

use std::sync::Arc;

/// Build the full catalogue. The set of methods is closed.
pub fn standard_registry(connector: ConnectorClient, crypto_asset: &str) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(CardProvider::new(connector.clone())));
    registry.register(Arc::new(QrProvider::new(connector.clone())));
    registry.register(Arc::new(PaypalProvider::new(connector.clone())));
    registry.register(Arc::new(CryptoProvider::new(connector, crypto_asset)));
    registry
}
