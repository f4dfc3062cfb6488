//! Checkout orchestration: one cart, one payment session, the injected
//! payment gateway and order store.

use std::sync::Arc;
use std::time::Duration;
use crate::checkout::state::{CheckoutEvent, CheckoutState, FailureReason, PaymentSession, ProcessingOutcome};
use crate::config::OrderingConfig;
use crate::domain::aggregates::order::lines_from_cart;
use crate::domain::aggregates::{Cart, OrderRecord, PaymentChannel, PaymentStatus};
use crate::domain::catalog::CatalogSource;
use crate::domain::pricing::{PricingRules, Totals};
use crate::gateway::{ConfirmationOutcome, PaymentGateway, PaymentRequest};
use crate::store::OrderStore;
use crate::{OrderingError, Rejection, Result};

pub struct Checkout {
    cart: Cart,
    session: PaymentSession,
    pricing: PricingRules,
    max_attempts: u32,
    confirmation_timeout: Duration,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderStore>,
    placed: Option<OrderRecord>,
    /// Paid for but not yet stored.
    unsubmitted: Option<OrderRecord>,
    last_failure: Option<String>,
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").field("cart", &self.cart).field("session", &self.session).finish_non_exhaustive()
    }
}

impl Checkout {
    pub fn new(cart: Cart, config: &OrderingConfig, gateway: Arc<dyn PaymentGateway>, store: Arc<dyn OrderStore>) -> Self {
        Self {
            cart,
            session: PaymentSession::new(config.max_payment_attempts),
            pricing: config.pricing(),
            max_attempts: config.max_payment_attempts,
            confirmation_timeout: config.confirmation_timeout,
            gateway,
            store,
            placed: None,
            unsubmitted: None,
            last_failure: None,
        }
    }

    pub fn cart(&self) -> &Cart { &self.cart }
    pub fn session(&self) -> &PaymentSession { &self.session }
    pub fn state(&self) -> CheckoutState { self.session.state() }
    pub fn placed_order(&self) -> Option<&OrderRecord> { self.placed.as_ref() }
    /// Order whose payment was confirmed but which the store has not taken yet.
    pub fn unsubmitted_order(&self) -> Option<&OrderRecord> { self.unsubmitted.as_ref() }
    /// Provider message behind the latest failure, if any.
    pub fn last_failure(&self) -> Option<&str> { self.last_failure.as_deref() }

    /// Recomputed from the cart on every call.
    pub fn totals(&self) -> Totals { self.cart.totals(&self.pricing) }

    // -- cart edits, only while reviewing ------------------------------------

    pub fn add_item(&mut self, item_id: &str, quantity: u32) -> Result<u32, Rejection> {
        self.ensure_reviewing("edit the cart")?;
        self.cart.add(item_id, quantity)
    }

    pub fn set_quantity(&mut self, item_id: &str, quantity: u32) -> Result<(), Rejection> {
        self.ensure_reviewing("edit the cart")?;
        self.cart.set_quantity(item_id, quantity)
    }

    pub fn remove_item(&mut self, item_id: &str) -> Result<(), Rejection> {
        self.ensure_reviewing("edit the cart")?;
        self.cart.remove(item_id);
        Ok(())
    }

    /// Re-fetches the catalog. A failed fetch leaves the cart untouched.
    pub async fn refresh_catalog(&mut self, source: &dyn CatalogSource) -> Result<()> {
        self.ensure_reviewing("refresh the catalog")?;
        let snapshot = source.fetch().await?;
        self.cart.refresh_catalog(snapshot);
        Ok(())
    }

    // -- payment flow --------------------------------------------------------

    pub fn begin(&mut self) -> Result<CheckoutState, Rejection> {
        self.session.apply(CheckoutEvent::Begin { cart_lines: self.cart.line_count() })
    }

    pub fn choose_channel(&mut self, channel: PaymentChannel) -> Result<CheckoutState, Rejection> {
        self.session.apply(CheckoutEvent::ChooseChannel(channel))
    }

    pub fn submit_payee(&mut self, raw: &str) -> Result<CheckoutState, Rejection> {
        self.session.apply(CheckoutEvent::SubmitPayee(raw.to_string()))
    }

    pub fn cancel(&mut self) -> Result<CheckoutState, Rejection> {
        self.session.apply(CheckoutEvent::Cancel)
    }

    /// After a store failure on a confirmed payment, goes straight back to
    /// `Processing` so the next `process` only re-appends the held order.
    pub fn retry(&mut self) -> Result<CheckoutState, Rejection> {
        let event = if self.unsubmitted.is_some() { CheckoutEvent::Resubmit } else { CheckoutEvent::Retry };
        let state = self.session.apply(event)?;
        self.last_failure = None;
        Ok(state)
    }

    /// Discards a finished session so the cart can be checked out again.
    pub fn reset(&mut self) {
        self.session = PaymentSession::new(self.max_attempts);
        self.placed = None;
        self.last_failure = None;
    }

    /// Runs the processing step: asks the gateway to collect remote payments,
    /// then appends exactly one order record. On success the cart is emptied.
    /// On failure the session moves to `Failed` and the cart is kept. A
    /// confirmed payment the store refused is held and re-appended on the
    /// next `process`, without asking the gateway again.
    pub async fn process(&mut self) -> Result<OrderRecord> {
        let (CheckoutState::Processing, Some(channel)) = (self.session.state(), self.session.channel()) else {
            return Err(Rejection::InvalidTransition { state: self.session.state(), action: "process payment" }.into());
        };

        let order = match self.unsubmitted.take() {
            Some(order) => {
                tracing::info!(order_number = %order.order_number, "resubmitting confirmed order");
                order
            }
            None => self.collect_payment(channel).await?,
        };

        match tokio::time::timeout(self.confirmation_timeout, self.store.append(order.clone())).await {
            Ok(Ok(_)) => self.complete(order),
            // An earlier append that timed out may have landed after all.
            Ok(Err(OrderingError::DuplicateOrder(id))) if id == order.order_id => self.complete(order),
            Ok(Err(e)) => Err(self.fail_submission(order, e.to_string())),
            Err(_) => Err(self.fail_submission(order, "order store did not answer in time".to_string())),
        }
    }

    async fn collect_payment(&mut self, channel: PaymentChannel) -> Result<OrderRecord> {
        let totals = self.totals();
        let status = if channel.is_remote() { PaymentStatus::Paid } else { PaymentStatus::Pending };
        let mut order = OrderRecord::create(lines_from_cart(&self.cart), totals.grand_total.clone(), channel, status);

        let Some(payee) = self.session.payee().cloned() else { return Ok(order) };
        order = order.with_payee(payee.as_str());
        if !channel.is_remote() {
            return Ok(order);
        }

        let request = PaymentRequest {
            channel,
            payee,
            amount: totals.grand_total,
            account_reference: order.order_number.clone(),
            description: format!("Payment for order {}", order.order_number),
        };
        match tokio::time::timeout(self.confirmation_timeout, self.gateway.request_payment(&request)).await {
            Ok(Ok(ConfirmationOutcome::Confirmed { reference })) => Ok(order.with_payment_reference(reference)),
            Ok(Ok(ConfirmationOutcome::Declined { reason })) => Err(self.fail(FailureReason::Declined, reason)),
            Ok(Err(e)) => Err(self.fail(FailureReason::Unreachable, e.to_string())),
            Err(_) => {
                let message = format!("no confirmation within {}s", self.confirmation_timeout.as_secs());
                Err(self.fail(FailureReason::TimedOut, message))
            }
        }
    }

    fn complete(&mut self, order: OrderRecord) -> Result<OrderRecord> {
        self.session.apply(CheckoutEvent::Resolve(ProcessingOutcome::Confirmed))?;
        tracing::info!(order_id = %order.order_id, order_number = %order.order_number, channel = %order.payment_channel, total = %order.grand_total, "checkout succeeded");
        self.cart.clear();
        self.placed = Some(order.clone());
        Ok(order)
    }

    fn fail_submission(&mut self, order: OrderRecord, message: String) -> OrderingError {
        if order.payment_channel.is_remote() && order.payment_reference.is_some() {
            tracing::warn!(order_number = %order.order_number, "payment confirmed but order not stored, holding it for resubmission");
            self.unsubmitted = Some(order);
        }
        self.fail(FailureReason::Submission, message)
    }

    fn fail(&mut self, reason: FailureReason, message: String) -> OrderingError {
        let state = match self.session.apply(CheckoutEvent::Resolve(ProcessingOutcome::Failed(reason))) {
            Ok(state) => state,
            Err(rejection) => return rejection.into(),
        };
        tracing::warn!(%reason, %state, attempts = self.session.attempts(), %message, "checkout payment failed");
        self.last_failure = Some(message.clone());
        let reason = match state { CheckoutState::Failed(r) => r, _ => reason };
        OrderingError::PaymentFailed { reason, message }
    }

    fn ensure_reviewing(&self, action: &'static str) -> Result<(), Rejection> {
        match self.session.state() {
            CheckoutState::ReviewingCart => Ok(()),
            state => Err(Rejection::InvalidTransition { state, action }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::MobileMoneyProvider;
    use crate::domain::catalog::{CatalogItem, CatalogSnapshot, StaticCatalog};
    use crate::domain::value_objects::Money;
    use crate::gateway::SimulatedGateway;
    use crate::store::InMemoryOrderStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    const MPESA: PaymentChannel = PaymentChannel::MobileMoney(MobileMoneyProvider::Mpesa);

    fn items() -> Vec<CatalogItem> {
        vec![
            CatalogItem::new("A", "Widget", Money::kes(Decimal::new(10, 0)), 10, "General"),
            CatalogItem::new("B", "Gadget", Money::kes(Decimal::new(5, 0)), 3, "General"),
        ]
    }

    fn checkout(gateway: Arc<SimulatedGateway>, store: Arc<InMemoryOrderStore>) -> Checkout {
        let cart = Cart::new(Arc::new(CatalogSnapshot::new(items())));
        let config = OrderingConfig { confirmation_timeout: Duration::from_secs(5), ..OrderingConfig::default() };
        let mut c = Checkout::new(cart, &config, gateway, store);
        c.add_item("A", 2).unwrap();
        c.add_item("B", 1).unwrap();
        c
    }

    #[tokio::test(start_paused = true)]
    async fn test_cash_checkout_creates_pending_order() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::from_secs(1)));
        let store = Arc::new(InMemoryOrderStore::new());
        let mut c = checkout(gateway.clone(), store.clone());

        c.begin().unwrap();
        c.choose_channel(PaymentChannel::Cash).unwrap();
        let order = c.process().await.unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.grand_total.amount(), Decimal::new(3499, 2));
        assert_eq!(c.state(), CheckoutState::Succeeded);
        assert_eq!(gateway.calls(), 0);
        assert_eq!(store.len().await, 1);
        assert!(c.cart().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mobile_money_checkout_creates_paid_order() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::from_secs(2)));
        let store = Arc::new(InMemoryOrderStore::new());
        let mut c = checkout(gateway.clone(), store.clone());

        c.begin().unwrap();
        c.choose_channel(MPESA).unwrap();
        c.submit_payee("0712345678").unwrap();
        let order = c.process().await.unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.payee_identifier.as_deref(), Some("254712345678"));
        assert_eq!(order.payment_reference.as_deref(), Some("SIM000001"));
        assert_eq!(
            c.session().history(),
            &[CheckoutState::ReviewingCart, CheckoutState::SelectingChannel, CheckoutState::CollectingPayee, CheckoutState::Processing, CheckoutState::Succeeded]
        );
        assert!(c.process().await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decline_keeps_cart_and_allows_retry() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::ZERO));
        gateway.set_decline(true);
        let store = Arc::new(InMemoryOrderStore::new());
        let mut c = checkout(gateway.clone(), store.clone());

        c.begin().unwrap();
        c.choose_channel(MPESA).unwrap();
        c.submit_payee("0712345678").unwrap();
        let err = c.process().await.unwrap_err();
        assert!(matches!(err, OrderingError::PaymentFailed { reason: FailureReason::Declined, .. }));
        assert_eq!(c.state(), CheckoutState::Failed(FailureReason::Declined));
        assert_eq!(c.cart().line_count(), 2);
        assert!(store.is_empty().await);

        gateway.set_decline(false);
        c.retry().unwrap();
        c.choose_channel(MPESA).unwrap();
        c.submit_payee("0712345678").unwrap();
        c.process().await.unwrap();
        assert_eq!(c.session().attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_gateway_times_out() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::from_secs(60)));
        let store = Arc::new(InMemoryOrderStore::new());
        let mut c = checkout(gateway, store.clone());

        c.begin().unwrap();
        c.choose_channel(MPESA).unwrap();
        c.submit_payee("0712345678").unwrap();
        let err = c.process().await.unwrap_err();
        assert!(matches!(err, OrderingError::PaymentFailed { reason: FailureReason::TimedOut, .. }));
        assert_eq!(c.state(), CheckoutState::Failed(FailureReason::TimedOut));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_capped() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::ZERO));
        gateway.set_decline(true);
        let mut c = checkout(gateway.clone(), Arc::new(InMemoryOrderStore::new()));
        c.begin().unwrap();
        for _ in 0..3 {
            if c.state() != CheckoutState::SelectingChannel { c.retry().unwrap(); }
            c.choose_channel(MPESA).unwrap();
            c.submit_payee("0712345678").unwrap();
            let _ = c.process().await;
        }
        assert_eq!(c.state(), CheckoutState::Failed(FailureReason::AttemptsExhausted));
        assert!(c.retry().is_err());
        assert_eq!(gateway.calls(), 3);

        c.reset();
        assert_eq!(c.state(), CheckoutState::ReviewingCart);
    }

    #[tokio::test]
    async fn test_cart_locked_during_checkout() {
        let mut c = checkout(Arc::new(SimulatedGateway::default()), Arc::new(InMemoryOrderStore::new()));
        c.begin().unwrap();
        assert!(matches!(c.add_item("A", 1), Err(Rejection::InvalidTransition { .. })));
        c.cancel().unwrap();
        assert_eq!(c.add_item("A", 1).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_cart_cannot_begin() {
        let cart = Cart::new(Arc::new(CatalogSnapshot::new(items())));
        let mut c = Checkout::new(cart, &OrderingConfig::default(), Arc::new(SimulatedGateway::default()), Arc::new(InMemoryOrderStore::new()));
        assert_eq!(c.begin(), Err(Rejection::EmptyCart));
        assert_eq!(c.state(), CheckoutState::ReviewingCart);
    }

    /// Refuses the first `failures` appends, then delegates.
    struct FlakyStore {
        inner: InMemoryOrderStore,
        failures: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl OrderStore for FlakyStore {
        async fn append(&self, order: OrderRecord) -> Result<uuid::Uuid> {
            use std::sync::atomic::Ordering;
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                return Err(OrderingError::Storage("db down".into()));
            }
            self.inner.append(order).await
        }

        async fn list(&self, filter: Option<&crate::store::OrderFilter>) -> Result<Vec<OrderRecord>> {
            self.inner.list(filter).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_after_payment_does_not_charge_again() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::ZERO));
        let store = Arc::new(FlakyStore { inner: InMemoryOrderStore::new(), failures: 1.into() });
        let cart = Cart::new(Arc::new(CatalogSnapshot::new(items())));
        let mut c = Checkout::new(cart, &OrderingConfig::default(), gateway.clone(), store.clone());
        c.add_item("A", 1).unwrap();

        c.begin().unwrap();
        c.choose_channel(MPESA).unwrap();
        c.submit_payee("0712345678").unwrap();
        let err = c.process().await.unwrap_err();
        assert!(matches!(err, OrderingError::PaymentFailed { reason: FailureReason::Submission, .. }));
        assert_eq!(c.unsubmitted_order().unwrap().payment_reference.as_deref(), Some("SIM000001"));
        assert_eq!(c.cart().line_count(), 1);

        assert_eq!(c.retry().unwrap(), CheckoutState::Processing);
        let order = c.process().await.unwrap();

        assert_eq!(gateway.calls(), 1);
        assert_eq!(c.session().attempts(), 1);
        assert_eq!(order.payment_reference.as_deref(), Some("SIM000001"));
        assert!(c.unsubmitted_order().is_none());
        assert_eq!(store.inner.list(None).await.unwrap(), vec![order]);
        assert_eq!(c.state(), CheckoutState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_on_last_attempt_is_not_exhaustion() {
        let gateway = Arc::new(SimulatedGateway::new(Duration::ZERO));
        let store = Arc::new(FlakyStore { inner: InMemoryOrderStore::new(), failures: 2.into() });
        let cart = Cart::new(Arc::new(CatalogSnapshot::new(items())));
        let config = OrderingConfig { max_payment_attempts: 1, ..OrderingConfig::default() };
        let mut c = Checkout::new(cart, &config, gateway.clone(), store.clone());
        c.add_item("B", 1).unwrap();

        c.begin().unwrap();
        c.choose_channel(MPESA).unwrap();
        c.submit_payee("0712345678").unwrap();
        assert!(c.process().await.is_err());
        assert_eq!(c.state(), CheckoutState::Failed(FailureReason::Submission));
        c.retry().unwrap();
        assert!(c.process().await.is_err());
        c.retry().unwrap();
        c.process().await.unwrap();

        assert_eq!(gateway.calls(), 1);
        assert_eq!(store.inner.len().await, 1);
    }

    struct FailingCatalog;

    #[async_trait]
    impl CatalogSource for FailingCatalog {
        async fn fetch(&self) -> Result<Arc<CatalogSnapshot>> { Err(OrderingError::Catalog("offline".into())) }
    }

    #[tokio::test]
    async fn test_catalog_refresh() {
        let mut c = checkout(Arc::new(SimulatedGateway::default()), Arc::new(InMemoryOrderStore::new()));
        assert!(c.refresh_catalog(&FailingCatalog).await.is_err());
        assert_eq!(c.cart().quantity_of("A"), Some(2));

        let shrunk = StaticCatalog::new(vec![CatalogItem::new("A", "Widget", Money::kes(Decimal::new(10, 0)), 1, "General")]);
        c.refresh_catalog(&shrunk).await.unwrap();
        assert_eq!(c.cart().quantity_of("A"), Some(1));
        assert_eq!(c.cart().quantity_of("B"), None);
    }
}
