//! `RentalCore`: one entry point per rental operation.
//!
//! Holds the pool, the gateway client, the callback signer and the
//! post-commit publisher, and stamps every call with the current time
//! (truncated to the microsecond precision Postgres stores).

use std::sync::Arc;

use aqua_domain::{
    Actor, LifecyclePolicy, OrderRequest, PaymentTarget, RentalResult, ServiceRequestDraft,
    ServiceUpdate,
};
use aqua_gateway::{GatewayClient, PaymentSigner};
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::PgPool;

use crate::notifications::{self, Notification, NotificationPublisher, PgNotificationPublisher};
use crate::orders::{self, Order, OrderStatusChange, PlacedOrder};
use crate::payments::{self, Checkout, GatewayCallback, Payment, Settlement};
use crate::service_requests::{self, ServiceRequest};
use crate::subscriptions::{self, Subscription};

#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub policy: LifecyclePolicy,
    pub currency: String,
    /// Public gateway key id returned with checkouts.
    pub gateway_key_id: Option<String>,
    /// Recorded as `payment_method` on settled payments.
    pub payment_method: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            policy: LifecyclePolicy::default(),
            currency: "INR".to_string(),
            gateway_key_id: None,
            payment_method: aqua_domain::payment::GATEWAY_PAYMENT_METHOD.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct RentalCore {
    pool: PgPool,
    gateway: Arc<dyn GatewayClient>,
    signer: PaymentSigner,
    publisher: Arc<dyn NotificationPublisher>,
    settings: CoreSettings,
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl RentalCore {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn GatewayClient>,
        signer: PaymentSigner,
        settings: CoreSettings,
    ) -> Self {
        let publisher = Arc::new(PgNotificationPublisher::new(pool.clone()));
        Self {
            pool,
            gateway,
            signer,
            publisher,
            settings,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    // -- orders -------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, product_id = req.product_id))]
    pub async fn create_order(&self, actor: &Actor, req: &OrderRequest) -> RentalResult<PlacedOrder> {
        orders::create(&self.pool, actor, req, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, order_id = order_id))]
    pub async fn update_order_status(
        &self,
        actor: &Actor,
        order_id: i64,
        change: &OrderStatusChange,
    ) -> RentalResult<Order> {
        orders::update_status(&self.pool, actor, order_id, change, &self.settings.policy, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, order_id = order_id, franchise_id = franchise_id))]
    pub async fn assign_franchise(
        &self,
        actor: &Actor,
        order_id: i64,
        franchise_id: i64,
    ) -> RentalResult<Order> {
        orders::assign_franchise(&self.pool, actor, order_id, franchise_id, now()).await
    }

    pub async fn order(&self, actor: &Actor, order_id: i64) -> RentalResult<Order> {
        orders::view(&self.pool, actor, order_id).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, order_id = order_id))]
    pub async fn cancel_order(&self, actor: &Actor, order_id: i64) -> RentalResult<Order> {
        orders::cancel(&self.pool, actor, order_id, now()).await
    }

    // -- payments -----------------------------------------------------------

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, order_id = order_id))]
    pub async fn generate_payment_order(&self, actor: &Actor, order_id: i64) -> RentalResult<Checkout> {
        payments::generate_initial(
            &self.pool,
            self.gateway.as_ref(),
            actor,
            order_id,
            &self.settings.currency,
            self.settings.gateway_key_id.as_deref(),
            now(),
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, subscription_id = subscription_id))]
    pub async fn generate_monthly_payment(
        &self,
        actor: &Actor,
        subscription_id: i64,
    ) -> RentalResult<Checkout> {
        payments::generate_monthly(
            &self.pool,
            self.gateway.as_ref(),
            actor,
            subscription_id,
            &self.settings.currency,
            self.settings.gateway_key_id.as_deref(),
            now(),
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, target = ?target))]
    pub async fn verify_payment(
        &self,
        actor: &Actor,
        callback: &GatewayCallback,
        target: PaymentTarget,
    ) -> RentalResult<Settlement> {
        payments::verify(
            &self.pool,
            &self.signer,
            &self.settings.payment_method,
            actor,
            callback,
            target,
            &self.settings.policy,
            now(),
        )
        .await
    }

    pub async fn payment(&self, actor: &Actor, payment_id: i64) -> RentalResult<Payment> {
        payments::view(&self.pool, actor, payment_id).await
    }

    pub async fn payment_history(&self, actor: &Actor, limit: i64) -> RentalResult<Vec<Payment>> {
        payments::history(&self.pool, actor, limit).await
    }

    // -- subscriptions ------------------------------------------------------

    pub async fn subscription(&self, actor: &Actor, subscription_id: i64) -> RentalResult<Subscription> {
        subscriptions::view(&self.pool, actor, subscription_id).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, subscription_id = subscription_id))]
    pub async fn pause_subscription(
        &self,
        actor: &Actor,
        subscription_id: i64,
        pause_end: DateTime<Utc>,
    ) -> RentalResult<Subscription> {
        subscriptions::pause(&self.pool, actor, subscription_id, pause_end, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, subscription_id = subscription_id))]
    pub async fn resume_subscription(
        &self,
        actor: &Actor,
        subscription_id: i64,
    ) -> RentalResult<Subscription> {
        subscriptions::resume(&self.pool, actor, subscription_id, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, subscription_id = subscription_id, enabled = enabled))]
    pub async fn set_auto_renew(
        &self,
        actor: &Actor,
        subscription_id: i64,
        enabled: bool,
    ) -> RentalResult<Subscription> {
        subscriptions::set_auto_renew(&self.pool, actor, subscription_id, enabled, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, subscription_id = subscription_id))]
    pub async fn cancel_subscription(
        &self,
        actor: &Actor,
        subscription_id: i64,
    ) -> RentalResult<Subscription> {
        subscriptions::cancel(&self.pool, self.publisher.as_ref(), actor, subscription_id, now()).await
    }

    // -- service requests ---------------------------------------------------

    pub async fn service_request(&self, actor: &Actor, request_id: i64) -> RentalResult<ServiceRequest> {
        service_requests::view(&self.pool, actor, request_id).await
    }

    pub async fn service_requests(&self, actor: &Actor, limit: i64) -> RentalResult<Vec<ServiceRequest>> {
        service_requests::list_visible(&self.pool, actor, limit).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, subscription_id = draft.subscription_id))]
    pub async fn create_service_request(
        &self,
        actor: &Actor,
        draft: &ServiceRequestDraft,
    ) -> RentalResult<ServiceRequest> {
        service_requests::create(&self.pool, self.publisher.as_ref(), actor, draft, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, request_id = request_id))]
    pub async fn update_service_request(
        &self,
        actor: &Actor,
        request_id: i64,
        update: &ServiceUpdate,
    ) -> RentalResult<ServiceRequest> {
        service_requests::update(&self.pool, actor, request_id, update, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, request_id = request_id))]
    pub async fn cancel_service_request(
        &self,
        actor: &Actor,
        request_id: i64,
    ) -> RentalResult<ServiceRequest> {
        service_requests::cancel(&self.pool, actor, request_id, now()).await
    }

    #[tracing::instrument(skip_all, fields(actor = actor.user_id, request_id = request_id, rating = rating))]
    pub async fn submit_feedback(
        &self,
        actor: &Actor,
        request_id: i64,
        rating: i32,
        feedback: &str,
    ) -> RentalResult<ServiceRequest> {
        service_requests::submit_feedback(&self.pool, actor, request_id, rating, feedback, now())
            .await
    }

    // -- notifications ------------------------------------------------------

    pub async fn notifications_for(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
    ) -> RentalResult<Vec<Notification>> {
        notifications::list_for_user(&self.pool, user_id, unread_only, limit).await
    }
}
