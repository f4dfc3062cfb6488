//! M-Pesa (Daraja) STK push gateway.
//!
//! Flow: fetch an OAuth token with the consumer key pair, then post a
//! `CustomerPayBillOnline` STK push. A `ResponseCode` of `"0"` only means the
//! prompt reached the customer's handset, so the gateway then polls the STK
//! query endpoint until Daraja reports a `ResultCode`. `"0"` is a completed
//! payment; anything else (`1032` cancelled, `1037` no answer, ...) is a
//! decline. The caller's timeout bounds the polling.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::config::MpesaConfig;
use crate::gateway::{ConfirmationOutcome, PaymentGateway, PaymentRequest};
use crate::{OrderingError, Result};

const EAST_AFRICA_OFFSET_SECS: i32 = 3 * 3600;

#[derive(Clone, Debug)]
pub struct MpesaGateway {
    http: reqwest::Client,
    config: MpesaConfig,
    consumer_key: String,
    consumer_secret: String,
    passkey: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse { access_token: String }

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StkPushBody {
    business_short_code: String,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: u64,
    party_a: String,
    party_b: String,
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    call_back_url: String,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Default, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct StkQueryBody {
    business_short_code: String,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    result_desc: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Answer to the STK push itself.
#[derive(Debug, PartialEq, Eq)]
enum PushReply {
    /// The prompt is on the handset; nothing has been paid yet.
    Accepted { checkout_request_id: String },
    Rejected { reason: String },
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self> {
        let (Some(consumer_key), Some(consumer_secret), Some(passkey)) =
            (config.consumer_key.clone(), config.consumer_secret.clone(), config.passkey.clone())
        else {
            return Err(OrderingError::Config("MPESA_CONSUMER_KEY, MPESA_CONSUMER_SECRET and MPESA_PASSKEY are required".into()));
        };
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, config, consumer_key, consumer_secret, passkey })
    }

    async fn access_token(&self) -> Result<String> {
        let url = format!("{}/oauth/v1/generate?grant_type=client_credentials", self.config.environment.base_url());
        let token: TokenResponse = self
            .http
            .get(url)
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(token.access_token)
    }

    pub(crate) fn stk_body(&self, request: &PaymentRequest, now: DateTime<Utc>) -> StkPushBody {
        let timestamp = daraja_timestamp(now);
        let phone = request.payee.as_str().to_string();
        StkPushBody {
            business_short_code: self.config.business_shortcode.clone(),
            password: stk_password(&self.config.business_shortcode, &self.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: whole_units(request),
            party_a: phone.clone(),
            party_b: self.config.business_shortcode.clone(),
            phone_number: phone,
            call_back_url: self.config.callback_url.clone(),
            account_reference: request.account_reference.clone(),
            transaction_desc: request.description.clone(),
        }
    }

    fn query_body(&self, checkout_request_id: &str, now: DateTime<Utc>) -> StkQueryBody {
        let timestamp = daraja_timestamp(now);
        StkQueryBody {
            business_short_code: self.config.business_shortcode.clone(),
            password: stk_password(&self.config.business_shortcode, &self.passkey, &timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        }
    }

    /// Polls until Daraja reports a result for the push.
    async fn await_result(&self, token: &str, checkout_request_id: String) -> ConfirmationOutcome {
        let url = format!("{}/mpesa/stkpush/v1/stkpushquery/v1/query", self.config.environment.base_url());
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let body = self.query_body(&checkout_request_id, Utc::now());
            let parsed: StkQueryResponse = match self.http.post(&url).bearer_auth(token).json(&body).send().await {
                Ok(response) => response.json().await.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(error = %e, %checkout_request_id, "STK query failed, polling again");
                    continue;
                }
            };
            match interpret_query(&checkout_request_id, parsed) {
                Some(outcome) => return outcome,
                None => tracing::debug!(%checkout_request_id, "STK push still pending"),
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<ConfirmationOutcome> {
        let token = self.access_token().await?;
        let body = self.stk_body(request, Utc::now());
        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.environment.base_url());

        tracing::info!(payee = %request.payee, amount = body.amount, reference = %request.account_reference, "sending STK push");
        let response = self.http.post(url).bearer_auth(&token).json(&body).send().await?;
        let ok = response.status().is_success();
        let parsed: StkPushResponse = response.json().await.unwrap_or_default();
        match interpret_push(ok, parsed) {
            PushReply::Accepted { checkout_request_id } => {
                tracing::info!(%checkout_request_id, "STK push accepted, waiting for the customer");
                Ok(self.await_result(&token, checkout_request_id).await)
            }
            PushReply::Rejected { reason } => Ok(ConfirmationOutcome::Declined { reason }),
        }
    }
}

fn interpret_push(http_ok: bool, response: StkPushResponse) -> PushReply {
    match (http_ok, response.response_code.as_deref(), response.checkout_request_id) {
        (true, Some("0"), Some(checkout_request_id)) => PushReply::Accepted { checkout_request_id },
        _ => PushReply::Rejected {
            reason: response
                .error_message
                .or(response.response_description)
                .unwrap_or_else(|| "STK push failed".to_string()),
        },
    }
}

/// `None` while the customer has not answered the prompt.
fn interpret_query(checkout_request_id: &str, response: StkQueryResponse) -> Option<ConfirmationOutcome> {
    match response.result_code?.trim() {
        "0" => Some(ConfirmationOutcome::Confirmed { reference: checkout_request_id.to_string() }),
        code => Some(ConfirmationOutcome::Declined {
            reason: response.result_desc.or(response.error_message).unwrap_or_else(|| format!("payment not completed (code {code})")),
        }),
    }
}

/// Daraja expects `YYYYMMDDHHMMSS` in Kenyan time.
fn daraja_timestamp(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(EAST_AFRICA_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string(),
        None => now.format("%Y%m%d%H%M%S").to_string(),
    }
}

fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

/// M-Pesa only takes whole shillings; round up so the order is never
/// under-collected.
fn whole_units(request: &PaymentRequest) -> u64 {
    request.amount.amount().ceil().to_u64().unwrap_or(0)
}
