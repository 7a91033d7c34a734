//! Deterministic in-memory gateway.
//!
//! - `order_ref` is `"order_"` followed by the first 14 hex digits of a UUIDv5
//!   over the receipt and amount, so the same checkout always gets the same ref.
//! - Every request is recorded for inspection.
//! - No network, no timestamps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;
use uuid::Uuid;

use crate::client::{GatewayClient, GatewayOrder, GatewayOrderRequest};

const PAPER_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_41d3_4c0b_9a57_2e8d_0b3f_7a11);

#[derive(Debug, Default)]
pub struct PaperGateway {
    requests: Mutex<Vec<GatewayOrderRequest>>,
    unavailable: AtomicBool,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create_order` fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<GatewayOrderRequest> {
        match self.requests.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn order_ref_for(req: &GatewayOrderRequest) -> String {
        let seed = format!("{}:{}:{}", req.receipt, req.amount_minor, req.currency);
        let id = Uuid::new_v5(&PAPER_NAMESPACE, seed.as_bytes()).simple().to_string();
        format!("order_{}", &id[..14])
    }
}

#[async_trait]
impl GatewayClient for PaperGateway {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn create_order(&self, req: &GatewayOrderRequest) -> anyhow::Result<GatewayOrder> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("paper gateway set unavailable");
        }
        if req.amount_minor <= 0 {
            bail!("amount must be positive, got {}", req.amount_minor);
        }

        match self.requests.lock() {
            Ok(mut g) => g.push(req.clone()),
            Err(poisoned) => poisoned.into_inner().push(req.clone()),
        }

        tracing::debug!(receipt = %req.receipt, amount = req.amount_minor, "paper gateway order");

        Ok(GatewayOrder {
            order_ref: Self::order_ref_for(req),
            amount_minor: req.amount_minor,
            currency: req.currency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn req(receipt: &str, amount: i64) -> GatewayOrderRequest {
        GatewayOrderRequest {
            amount_minor: amount,
            currency: "INR".into(),
            receipt: receipt.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn refs_are_deterministic_per_checkout() {
        let gw = PaperGateway::new();
        let a = gw.create_order(&req("order_1", 8000)).await.unwrap();
        let b = gw.create_order(&req("order_1", 8000)).await.unwrap();
        let c = gw.create_order(&req("order_2", 8000)).await.unwrap();
        assert_eq!(a.order_ref, b.order_ref);
        assert_ne!(a.order_ref, c.order_ref);
        assert!(a.order_ref.starts_with("order_"));
        assert_eq!(gw.requests().len(), 3);
    }

    #[tokio::test]
    async fn unavailable_gateway_errors() {
        let gw = PaperGateway::new();
        gw.set_unavailable(true);
        assert!(gw.create_order(&req("order_1", 100)).await.is_err());
        gw.set_unavailable(false);
        assert!(gw.create_order(&req("order_1", 100)).await.is_ok());
    }

    #[tokio::test]
    async fn non_positive_amount_is_refused() {
        let gw = PaperGateway::new();
        assert!(gw.create_order(&req("order_1", 0)).await.is_err());
        assert!(gw.requests().is_empty());
    }
}
