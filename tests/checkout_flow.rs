//! End-to-end checkout and chat intake through the public API.

use opensase_ordering::checkout::{Checkout, CheckoutState, FailureReason};
use opensase_ordering::domain::aggregates::{Cart, MobileMoneyProvider, PaymentChannel, PaymentStatus};
use opensase_ordering::domain::catalog::{demo_items, CatalogItem, CatalogSnapshot};
use opensase_ordering::domain::value_objects::Money;
use opensase_ordering::gateway::SimulatedGateway;
use opensase_ordering::intake::{Extracted, OrderExtractor};
use opensase_ordering::store::{InMemoryOrderStore, OrderStore};
use opensase_ordering::{OrderingConfig, OrderingError, Rejection};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

const MPESA: PaymentChannel = PaymentChannel::MobileMoney(MobileMoneyProvider::Mpesa);

fn catalog() -> Arc<CatalogSnapshot> {
    Arc::new(CatalogSnapshot::new(vec![
        CatalogItem::new("A", "Item A", Money::kes(Decimal::new(10, 0)), 10, "General"),
        CatalogItem::new("B", "Item B", Money::kes(Decimal::new(5, 0)), 4, "General"),
    ]))
}

struct Harness {
    checkout: Checkout,
    gateway: Arc<SimulatedGateway>,
    store: Arc<InMemoryOrderStore>,
}

fn harness() -> Harness {
    let gateway = Arc::new(SimulatedGateway::new(Duration::from_millis(50)));
    let store = Arc::new(InMemoryOrderStore::new());
    let mut cart = Cart::new(catalog());
    cart.add("A", 2).unwrap();
    cart.add("B", 1).unwrap();
    let checkout = Checkout::new(cart, &OrderingConfig::default(), gateway.clone(), store.clone());
    Harness { checkout, gateway, store }
}

#[test]
fn scenario_totals_below_free_shipping() {
    let h = harness();
    let totals = h.checkout.totals();
    assert_eq!(totals.subtotal.amount(), Decimal::new(25, 0));
    assert_eq!(totals.tax_amount.amount(), Decimal::new(4, 0));
    assert_eq!(totals.shipping_fee.amount(), Decimal::new(599, 2));
    assert_eq!(totals.grand_total.amount(), Decimal::new(3499, 2));
}

#[test]
fn scenario_quantity_above_stock_is_rejected() {
    let mut h = harness();
    let err = h.checkout.set_quantity("A", 999).unwrap_err();
    assert_eq!(err, Rejection::ExceedsStock { item_id: "A".into(), requested: 999, available: 10 });
    assert_eq!(h.checkout.cart().quantity_of("A"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn scenario_cash_checkout() {
    let mut h = harness();
    h.checkout.begin().unwrap();
    assert_eq!(h.checkout.choose_channel(PaymentChannel::Cash).unwrap(), CheckoutState::Processing);
    let order = h.checkout.process().await.unwrap();

    assert_eq!(
        h.checkout.session().history(),
        &[CheckoutState::ReviewingCart, CheckoutState::SelectingChannel, CheckoutState::Processing, CheckoutState::Succeeded]
    );
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.can_fulfil());
    assert_eq!(h.gateway.calls(), 0);
    assert_eq!(h.store.list(None).await.unwrap(), vec![order]);
}

#[tokio::test(start_paused = true)]
async fn scenario_mobile_money_checkout() {
    let mut h = harness();
    h.checkout.begin().unwrap();
    assert_eq!(h.checkout.choose_channel(MPESA).unwrap(), CheckoutState::CollectingPayee);
    assert_eq!(h.checkout.submit_payee("0712345678").unwrap(), CheckoutState::Processing);
    let order = h.checkout.process().await.unwrap();

    assert_eq!(
        h.checkout.session().history(),
        &[
            CheckoutState::ReviewingCart,
            CheckoutState::SelectingChannel,
            CheckoutState::CollectingPayee,
            CheckoutState::Processing,
            CheckoutState::Succeeded,
        ]
    );
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.payee_identifier.as_deref(), Some("254712345678"));
    assert_eq!(order.grand_total.amount(), Decimal::new(3499, 2));
    assert!(order.payment_reference.is_some());
    assert_eq!(h.store.len().await, 1);
    assert!(h.checkout.cart().is_empty());
}

#[tokio::test(start_paused = true)]
async fn declined_payments_exhaust_after_three_attempts() {
    let mut h = harness();
    h.gateway.set_decline(true);
    h.checkout.begin().unwrap();

    for attempt in 1..=3 {
        h.checkout.choose_channel(MPESA).unwrap();
        h.checkout.submit_payee("0712345678").unwrap();
        let err = h.checkout.process().await.unwrap_err();
        if attempt < 3 {
            assert!(matches!(err, OrderingError::PaymentFailed { reason: FailureReason::Declined, .. }));
            h.checkout.retry().unwrap();
        } else {
            assert!(matches!(err, OrderingError::PaymentFailed { reason: FailureReason::AttemptsExhausted, .. }));
        }
    }

    assert_eq!(h.checkout.state(), CheckoutState::Failed(FailureReason::AttemptsExhausted));
    assert!(h.checkout.state().is_terminal());
    assert_eq!(h.checkout.retry().unwrap_err(), Rejection::AttemptsExhausted);
    assert!(h.store.is_empty().await);
    assert_eq!(h.checkout.cart().item_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out() {
    let gateway = Arc::new(SimulatedGateway::new(Duration::from_secs(120)));
    let store = Arc::new(InMemoryOrderStore::new());
    let mut cart = Cart::new(catalog());
    cart.add("A", 1).unwrap();
    let mut checkout = Checkout::new(cart, &OrderingConfig::default(), gateway, store.clone());

    checkout.begin().unwrap();
    checkout.choose_channel(MPESA).unwrap();
    checkout.submit_payee("0712345678").unwrap();
    let err = checkout.process().await.unwrap_err();

    assert!(matches!(err, OrderingError::PaymentFailed { reason: FailureReason::TimedOut, .. }));
    assert_eq!(checkout.state(), CheckoutState::Failed(FailureReason::TimedOut));
    assert!(store.is_empty().await);
}

#[test]
fn scenario_free_text_extraction() {
    let extractor = OrderExtractor::new(Arc::new(CatalogSnapshot::new(demo_items("KES"))), None);
    let x = extractor.analyze("Customer +1 (555) 123-4567 wants 3 bags of sugar");

    assert_eq!(x.payee, Extracted::Found("+1 (555) 123-4567".to_string()));
    assert_eq!(x.quantity, Extracted::Found(3));
    assert!(x.product.unwrap().item.name.starts_with("Sugar"));
    let candidate = x.candidate.unwrap();
    assert_eq!(candidate.record.payment_channel, PaymentChannel::Chat);
    assert_eq!(candidate.record.payment_status, PaymentStatus::Pending);
}
