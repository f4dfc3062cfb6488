//! HTTP surface for the storefront checkout and the chat assistant.
//!
//! Each checkout session lives in memory behind its own mutex, keyed by the
//! caller-chosen session id. Nothing here is shared between sessions except
//! the catalog source, the gateway and the order store.
//!
//! A session is dropped once its order is placed, and idle sessions are
//! swept after `session_idle_timeout`. At most `max_sessions` are open.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use validator::{Validate, ValidationErrors};

use crate::checkout::{Checkout, CheckoutState};
use crate::config::OrderingConfig;
use crate::domain::aggregates::order::lines_from_cart;
use crate::domain::aggregates::{Cart, OrderLine, OrderRecord, PaymentChannel, PaymentStatus};
use crate::domain::catalog::{CatalogItem, CatalogSource};
use crate::domain::events::{self, OrderEvent};
use crate::domain::pricing::Totals;
use crate::gateway::PaymentGateway;
use crate::intake::{Extraction, OrderCandidate, OrderExtractor, PLACEHOLDER_PAYEE};
use crate::store::OrderStore;
use crate::{OrderingError, Rejection};

type Session = Arc<Mutex<Checkout>>;

struct SessionSlot {
    checkout: Session,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrderingConfig>,
    pub catalog: Arc<dyn CatalogSource>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub store: Arc<dyn OrderStore>,
    pub nats: Option<async_nats::Client>,
    sessions: Arc<RwLock<HashMap<String, SessionSlot>>>,
}

impl AppState {
    pub fn new(
        config: OrderingConfig,
        catalog: Arc<dyn CatalogSource>,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn OrderStore>,
        nats: Option<async_nats::Client>,
    ) -> Self {
        Self { config: Arc::new(config), catalog, gateway, store, nats, sessions: Arc::default() }
    }

    async fn session(&self, id: &str) -> Result<Session, ApiError> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(id).ok_or_else(|| ApiError::NotFound(format!("no checkout session {id}")))?;
        slot.last_seen = Instant::now();
        Ok(slot.checkout.clone())
    }

    /// Opens a session on first use with a freshly fetched catalog snapshot.
    async fn session_or_create(&self, id: &str) -> Result<Session, ApiError> {
        if let Ok(existing) = self.session(id).await {
            return Ok(existing);
        }
        let snapshot = self.catalog.fetch().await?;
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(id) {
            slot.last_seen = Instant::now();
            return Ok(slot.checkout.clone());
        }
        evict_idle(&mut sessions, self.config.session_idle_timeout);
        if sessions.len() >= self.config.max_sessions {
            tracing::warn!(open = sessions.len(), "checkout session limit reached");
            return Err(ApiError::Busy("too many open checkout sessions".into()));
        }
        tracing::debug!(session = id, items = snapshot.len(), "checkout session opened");
        let checkout = Checkout::new(Cart::new(snapshot), &self.config, self.gateway.clone(), self.store.clone());
        let checkout = Arc::new(Mutex::new(checkout));
        sessions.insert(id.to_string(), SessionSlot { checkout: checkout.clone(), last_seen: Instant::now() });
        Ok(checkout)
    }

    async fn drop_session(&self, id: &str) { self.sessions.write().await.remove(id); }

    /// Drops sessions idle for longer than `session_idle_timeout`.
    pub async fn sweep_idle_sessions(&self) -> usize {
        evict_idle(&mut *self.sessions.write().await, self.config.session_idle_timeout)
    }

    pub async fn session_count(&self) -> usize { self.sessions.read().await.len() }
}

/// Sessions in use, or holding a paid order the store has not taken yet,
/// are kept regardless of age.
fn evict_idle(sessions: &mut HashMap<String, SessionSlot>, idle: std::time::Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|id, slot| {
        if slot.last_seen.elapsed() < idle {
            return true;
        }
        match slot.checkout.try_lock() {
            Ok(checkout) if checkout.unsubmitted_order().is_none() => {
                tracing::debug!(session = %id, "idle checkout session evicted");
                false
            }
            _ => true,
        }
    });
    before - sessions.len()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-ordering"})) }))
        .route("/api/v1/catalog", get(list_catalog))
        .route("/api/v1/cart/:session", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/:item", put(set_quantity).delete(remove_from_cart))
        .route("/api/v1/checkout/:session/begin", post(begin_checkout))
        .route("/api/v1/checkout/:session/channel", post(choose_channel))
        .route("/api/v1/checkout/:session/payee", post(submit_payee))
        .route("/api/v1/checkout/:session/process", post(process_payment))
        .route("/api/v1/checkout/:session/cancel", post(cancel_checkout))
        .route("/api/v1/checkout/:session/retry", post(retry_checkout))
        .route("/api/v1/checkout/:session/refresh", post(refresh_catalog))
        .route("/api/v1/mpesa/callback", post(mpesa_callback))
        .route("/api/v1/chat/analyze", post(analyze_message))
        .route("/api/v1/chat/confirm", post(confirm_chat_order))
        .route("/api/v1/orders", get(list_orders))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Invalid(String),
    Busy(String),
    Ordering(OrderingError),
}

impl From<OrderingError> for ApiError {
    fn from(e: OrderingError) -> Self { Self::Ordering(e) }
}

impl From<Rejection> for ApiError {
    fn from(r: Rejection) -> Self { Self::Ordering(r.into()) }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self { Self::Invalid(e.to_string()) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Invalid(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            Self::Busy(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            Self::Ordering(e) => {
                let status = match &e {
                    OrderingError::Rejected(Rejection::UnknownItem(_)) | OrderingError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                    OrderingError::Rejected(_) | OrderingError::Money(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    OrderingError::DuplicateOrder(_) => StatusCode::CONFLICT,
                    OrderingError::Catalog(_)
                    | OrderingError::Storage(_)
                    | OrderingError::Gateway(_)
                    | OrderingError::PaymentFailed { .. } => StatusCode::BAD_GATEWAY,
                    OrderingError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::warn!(error = %e, "request failed");
                }
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CheckoutView {
    pub session: String,
    pub state: CheckoutState,
    pub channel: Option<PaymentChannel>,
    pub payee: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub lines: Vec<OrderLine>,
    pub totals: Totals,
    pub placed_order: Option<OrderRecord>,
    pub last_failure: Option<String>,
}

impl CheckoutView {
    fn of(session: &str, checkout: &Checkout) -> Self {
        let s = checkout.session();
        Self {
            session: session.to_string(),
            state: s.state(),
            channel: s.channel(),
            payee: s.payee().map(|p| p.to_string()),
            attempts: s.attempts(),
            max_attempts: s.max_attempts(),
            lines: lines_from_cart(checkout.cart()),
            totals: checkout.totals(),
            placed_order: checkout.placed_order().cloned(),
            last_failure: checkout.last_failure().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub extraction: Extraction,
    pub message: String,
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    #[validate(length(min = 1, max = 64))]
    pub item_id: String,
    #[validate(range(min = 1, max = 100000))]
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetQuantityRequest {
    #[validate(range(max = 100000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChooseChannelRequest {
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
}

/// Blank payees get through validation; the session itself refuses them.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitPayeeRequest {
    #[validate(length(max = 32))]
    pub payee: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(max = 2000))]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmChatOrderRequest {
    #[validate(length(min = 1, max = 64))]
    pub item_id: String,
    #[validate(range(min = 1, max = 100000))]
    pub quantity: u32,
    #[validate(length(max = 32))]
    pub payee: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListParams {
    pub channel: Option<String>,
    pub status: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_catalog(State(s): State<AppState>) -> Result<Json<Vec<CatalogItem>>, ApiError> {
    let snapshot = s.catalog.fetch().await?;
    Ok(Json(snapshot.items().to_vec()))
}

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let checkout = s.session(&session).await?;
    let checkout = checkout.lock().await;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

async fn add_to_cart(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<CheckoutView>), ApiError> {
    r.validate()?;
    let checkout = s.session_or_create(&session).await?;
    let mut checkout = checkout.lock().await;
    // an exhausted session starts over on the same cart, against current stock
    if checkout.state().is_terminal() {
        checkout.reset();
        checkout.refresh_catalog(s.catalog.as_ref()).await?;
    }
    checkout.add_item(&r.item_id, r.quantity.unwrap_or(1))?;
    Ok((StatusCode::CREATED, Json(CheckoutView::of(&session, &checkout))))
}

async fn set_quantity(
    State(s): State<AppState>,
    Path((session, item)): Path<(String, String)>,
    Json(r): Json<SetQuantityRequest>,
) -> Result<Json<CheckoutView>, ApiError> {
    r.validate()?;
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.set_quantity(&item, r.quantity)?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

async fn remove_from_cart(
    State(s): State<AppState>,
    Path((session, item)): Path<(String, String)>,
) -> Result<Json<CheckoutView>, ApiError> {
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.remove_item(&item)?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

/// Drops the whole session, cart included.
async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> Result<StatusCode, ApiError> {
    let checkout = s.session(&session).await?;
    let state = checkout.lock().await.state();
    if state == CheckoutState::Processing {
        return Err(Rejection::InvalidTransition { state, action: "clear the cart" }.into());
    }
    s.drop_session(&session).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn begin_checkout(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.begin()?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

async fn choose_channel(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<ChooseChannelRequest>,
) -> Result<Json<CheckoutView>, ApiError> {
    r.validate()?;
    let channel = PaymentChannel::parse(&r.channel).ok_or_else(|| ApiError::Invalid(format!("unknown payment channel {}", r.channel)))?;
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.choose_channel(channel)?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

async fn submit_payee(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<SubmitPayeeRequest>,
) -> Result<Json<CheckoutView>, ApiError> {
    r.validate()?;
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.submit_payee(&r.payee)?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

/// Holds the session lock across the gateway round trip, so a second
/// `process` call on the same session waits and then sees the outcome.
async fn process_payment(State(s): State<AppState>, Path(session): Path<String>) -> Result<(StatusCode, Json<CheckoutView>), ApiError> {
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    let channel = checkout.session().channel();
    match checkout.process().await {
        Ok(order) => {
            events::publish(s.nats.as_ref(), &OrderEvent::placed(&order)).await;
            let view = CheckoutView::of(&session, &checkout);
            s.drop_session(&session).await;
            Ok((StatusCode::CREATED, Json(view)))
        }
        Err(e) => {
            if let (Some(channel), OrderingError::PaymentFailed { reason, .. }) = (channel, &e) {
                let event = OrderEvent::PaymentFailed { channel, reason: reason.to_string(), attempts: checkout.session().attempts() };
                events::publish(s.nats.as_ref(), &event).await;
            }
            Err(e.into())
        }
    }
}

async fn cancel_checkout(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.cancel()?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

async fn retry_checkout(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.retry()?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

/// Re-reads the catalog into the cart, clamping lines to current stock.
async fn refresh_catalog(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let checkout = s.session(&session).await?;
    let mut checkout = checkout.lock().await;
    checkout.refresh_catalog(s.catalog.as_ref()).await?;
    Ok(Json(CheckoutView::of(&session, &checkout)))
}

#[derive(Debug, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: MpesaCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct MpesaCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub result_code: i64,
    #[serde(default)]
    pub result_desc: String,
}

/// Daraja's result notification. The gateway already polls for the same
/// result, so this only records it and acknowledges.
async fn mpesa_callback(Json(c): Json<MpesaCallback>) -> Json<serde_json::Value> {
    let cb = c.body.stk_callback;
    tracing::info!(checkout_request_id = %cb.checkout_request_id, result_code = cb.result_code, result = %cb.result_desc, "M-Pesa callback received");
    Json(serde_json::json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

async fn analyze_message(State(s): State<AppState>, Json(r): Json<AnalyzeRequest>) -> Result<Json<ChatResponse>, ApiError> {
    r.validate()?;
    let snapshot = s.catalog.fetch().await?;
    let extraction = OrderExtractor::new(snapshot, s.config.fallback_product.as_deref()).analyze(&r.message);
    let message = extraction.reply.message();
    Ok(Json(ChatResponse { extraction, message }))
}

/// Re-checks stock against a fresh catalog before storing the chat order.
async fn confirm_chat_order(
    State(s): State<AppState>,
    Json(r): Json<ConfirmChatOrderRequest>,
) -> Result<(StatusCode, Json<OrderRecord>), ApiError> {
    r.validate()?;
    let snapshot = s.catalog.fetch().await?;
    let item = snapshot.find_by_id(&r.item_id).ok_or_else(|| Rejection::UnknownItem(r.item_id.clone()))?;
    let payee = r.payee.as_deref().map(str::trim).filter(|p| !p.is_empty()).unwrap_or(PLACEHOLDER_PAYEE);
    let candidate = OrderCandidate::new(item, r.quantity, payee);
    let record = candidate.record.clone();
    candidate.commit(s.store.as_ref()).await?;
    events::publish(s.nats.as_ref(), &OrderEvent::placed(&record)).await;
    tracing::info!(order_number = %record.order_number, item = %item.id, quantity = r.quantity, "chat order confirmed");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_orders(State(s): State<AppState>, Query(p): Query<OrderListParams>) -> Result<Json<Vec<OrderRecord>>, ApiError> {
    let channel = match p.channel.as_deref() {
        Some(raw) => Some(PaymentChannel::parse(raw).ok_or_else(|| ApiError::Invalid(format!("unknown payment channel {raw}")))?),
        None => None,
    };
    let status = match p.status.as_deref() {
        Some("pending") => Some(PaymentStatus::Pending),
        Some("paid") => Some(PaymentStatus::Paid),
        Some(other) => return Err(ApiError::Invalid(format!("unknown payment status {other}"))),
        None => None,
    };
    let filter = move |o: &OrderRecord| {
        channel.map_or(true, |c| o.payment_channel == c) && status.map_or(true, |st| o.payment_status == st)
    };
    let orders = s.store.list(Some(&filter)).await?;
    Ok(Json(orders))
}
