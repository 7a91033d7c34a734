//! Payment gateway seam: the `create_order` contract, callback signature
//! verification, and a deterministic paper implementation.

pub mod client;
pub mod paper;
pub mod signature;

pub use client::{GatewayClient, GatewayOrder, GatewayOrderRequest};
pub use paper::PaperGateway;
pub use signature::PaymentSigner;
