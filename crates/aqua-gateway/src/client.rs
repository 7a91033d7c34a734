use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Checkout order the gateway is asked to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrderRequest {
    /// Integer minor units (paise for INR).
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_ref: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Contract consumed from the payment gateway. Only order creation is
/// modeled; settlement arrives later as a signed callback.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Short provider name, recorded as the payment method on settled rows.
    fn name(&self) -> &'static str;

    async fn create_order(&self, req: &GatewayOrderRequest) -> anyhow::Result<GatewayOrder>;
}
