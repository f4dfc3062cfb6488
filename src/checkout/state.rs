//! Payment session and its transition function.
//!
//! ```text
//! ReviewingCart ──begin──► SelectingChannel ──cash──────────────────► Processing ──► Succeeded
//!       ▲                        │  ▲                                     │
//!       │                 mobile money                                  │ declined / timed out
//!       │                        ▼  │ retry                               ▼
//!       └──────cancel──── CollectingPayee ──payee──► Processing      Failed ──(attempts left)──► SelectingChannel
//! ```
//!
//! A store failure after the provider confirmed is `Failed(Submission)`.
//! `Resubmit` takes it straight back to `Processing` without a new attempt,
//! and it never counts toward the attempt cap.
//!
//! Every guard failure returns a [`Rejection`] and leaves the session
//! untouched. `Succeeded` and `Failed(AttemptsExhausted)` are terminal.

use serde::Serialize;
use std::fmt;
use crate::domain::aggregates::PaymentChannel;
use crate::domain::value_objects::PhoneNumber;
use crate::Rejection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider refused the payment.
    Declined,
    /// No answer from the provider within the configured bound.
    TimedOut,
    /// The provider could not be reached at all.
    Unreachable,
    /// The order store refused the record.
    Submission,
    AttemptsExhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Declined => "payment declined",
            Self::TimedOut => "payment confirmation timed out",
            Self::Unreachable => "payment provider unreachable",
            Self::Submission => "order submission failed",
            Self::AttemptsExhausted => "payment attempts exhausted",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CheckoutState {
    ReviewingCart,
    SelectingChannel,
    CollectingPayee,
    Processing,
    Succeeded,
    Failed(FailureReason),
}

impl CheckoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(FailureReason::AttemptsExhausted))
    }

    /// Cancellation is only honoured before processing starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::ReviewingCart | Self::SelectingChannel | Self::CollectingPayee)
    }
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReviewingCart => f.write_str("reviewing cart"),
            Self::SelectingChannel => f.write_str("selecting payment channel"),
            Self::CollectingPayee => f.write_str("collecting phone number"),
            Self::Processing => f.write_str("processing payment"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// What came back from the processing step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Confirmed,
    Failed(FailureReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutEvent {
    Begin { cart_lines: usize },
    ChooseChannel(PaymentChannel),
    SubmitPayee(String),
    Resolve(ProcessingOutcome),
    Cancel,
    Retry,
    /// Re-append an order whose payment was already confirmed.
    Resubmit,
}

impl CheckoutEvent {
    fn action(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin checkout",
            Self::ChooseChannel(_) => "choose a payment channel",
            Self::SubmitPayee(_) => "submit a phone number",
            Self::Resolve(_) => "resolve payment",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
            Self::Resubmit => "resubmit the order",
        }
    }
}

/// State of one checkout attempt. Owned by a single checkout context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentSession {
    state: CheckoutState,
    channel: Option<PaymentChannel>,
    payee: Option<PhoneNumber>,
    attempts: u32,
    max_attempts: u32,
    history: Vec<CheckoutState>,
}

impl PaymentSession {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: CheckoutState::ReviewingCart,
            channel: None,
            payee: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            history: vec![CheckoutState::ReviewingCart],
        }
    }

    pub fn state(&self) -> CheckoutState { self.state }
    pub fn channel(&self) -> Option<PaymentChannel> { self.channel }
    pub fn payee(&self) -> Option<&PhoneNumber> { self.payee.as_ref() }
    pub fn attempts(&self) -> u32 { self.attempts }
    pub fn max_attempts(&self) -> u32 { self.max_attempts }
    /// Every state entered, oldest first.
    pub fn history(&self) -> &[CheckoutState] { &self.history }

    pub fn apply(&mut self, event: CheckoutEvent) -> Result<CheckoutState, Rejection> {
        use CheckoutState::*;

        let invalid = |state: CheckoutState, event: &CheckoutEvent| Rejection::InvalidTransition { state, action: event.action() };

        let next = match (self.state, &event) {
            (ReviewingCart, CheckoutEvent::Begin { cart_lines }) => {
                if *cart_lines == 0 { return Err(Rejection::EmptyCart); }
                SelectingChannel
            }
            (SelectingChannel, CheckoutEvent::ChooseChannel(channel)) => match channel {
                PaymentChannel::Chat => return Err(Rejection::ChannelNotSelectable { channel: *channel }),
                PaymentChannel::Cash => {
                    self.channel = Some(*channel);
                    self.payee = None;
                    Processing
                }
                PaymentChannel::MobileMoney(_) => {
                    self.channel = Some(*channel);
                    CollectingPayee
                }
            },
            (CollectingPayee, CheckoutEvent::SubmitPayee(raw)) => {
                if raw.trim().is_empty() { return Err(Rejection::EmptyPayee); }
                let phone = PhoneNumber::parse(raw).map_err(Rejection::InvalidPayee)?;
                if self.attempts >= self.max_attempts {
                    Failed(FailureReason::AttemptsExhausted)
                } else {
                    self.payee = Some(phone);
                    self.attempts += 1;
                    Processing
                }
            }
            (Processing, CheckoutEvent::Resolve(ProcessingOutcome::Confirmed)) => Succeeded,
            (Processing, CheckoutEvent::Resolve(ProcessingOutcome::Failed(reason))) => {
                let remote = self.channel.is_some_and(|c| c.is_remote());
                if remote && *reason != FailureReason::Submission && self.attempts >= self.max_attempts {
                    Failed(FailureReason::AttemptsExhausted)
                } else {
                    Failed(*reason)
                }
            }
            (state, CheckoutEvent::Cancel) if state.is_cancellable() => {
                let max_attempts = self.max_attempts;
                *self = Self::new(max_attempts);
                return Ok(self.state);
            }
            (Failed(FailureReason::Submission), CheckoutEvent::Resubmit) => Processing,
            (Failed(FailureReason::AttemptsExhausted), CheckoutEvent::Retry) => return Err(Rejection::AttemptsExhausted),
            (Failed(_), CheckoutEvent::Retry) => {
                self.channel = None;
                self.payee = None;
                SelectingChannel
            }
            (state, event) => return Err(invalid(state, event)),
        };

        tracing::debug!(from = %self.state, to = %next, attempts = self.attempts, "checkout transition");
        self.state = next;
        self.history.push(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::MobileMoneyProvider;
    use CheckoutState::*;

    const MPESA: PaymentChannel = PaymentChannel::MobileMoney(MobileMoneyProvider::Mpesa);

    fn at_payee() -> PaymentSession {
        let mut s = PaymentSession::new(3);
        s.apply(CheckoutEvent::Begin { cart_lines: 1 }).unwrap();
        s.apply(CheckoutEvent::ChooseChannel(MPESA)).unwrap();
        s
    }

    #[test]
    fn test_cash_sequence() {
        let mut s = PaymentSession::new(3);
        s.apply(CheckoutEvent::Begin { cart_lines: 2 }).unwrap();
        assert_eq!(s.apply(CheckoutEvent::ChooseChannel(PaymentChannel::Cash)).unwrap(), Processing);
        s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Confirmed)).unwrap();
        assert_eq!(s.history(), &[ReviewingCart, SelectingChannel, Processing, Succeeded]);
        assert_eq!(s.attempts(), 0);
        assert!(s.state().is_terminal());
    }

    #[test]
    fn test_mobile_money_sequence() {
        let mut s = at_payee();
        assert_eq!(s.apply(CheckoutEvent::SubmitPayee("0712345678".into())).unwrap(), Processing);
        s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Confirmed)).unwrap();
        assert_eq!(s.history(), &[ReviewingCart, SelectingChannel, CollectingPayee, Processing, Succeeded]);
        assert_eq!(s.payee().unwrap().as_str(), "254712345678");
        assert_eq!(s.attempts(), 1);
    }

    #[test]
    fn test_empty_cart_refused() {
        let mut s = PaymentSession::new(3);
        assert_eq!(s.apply(CheckoutEvent::Begin { cart_lines: 0 }), Err(Rejection::EmptyCart));
        assert_eq!(s.state(), ReviewingCart);
    }

    #[test]
    fn test_blank_payee_does_not_advance() {
        let mut s = at_payee();
        let before = s.clone();
        assert_eq!(s.apply(CheckoutEvent::SubmitPayee("   ".into())), Err(Rejection::EmptyPayee));
        assert!(matches!(s.apply(CheckoutEvent::SubmitPayee("12345".into())), Err(Rejection::InvalidPayee(_))));
        assert_eq!(s, before);
    }

    #[test]
    fn test_chat_channel_not_selectable() {
        let mut s = PaymentSession::new(3);
        s.apply(CheckoutEvent::Begin { cart_lines: 1 }).unwrap();
        assert!(matches!(s.apply(CheckoutEvent::ChooseChannel(PaymentChannel::Chat)), Err(Rejection::ChannelNotSelectable { .. })));
        assert_eq!(s.state(), SelectingChannel);
    }

    #[test]
    fn test_cancel_only_before_processing() {
        let mut s = at_payee();
        assert_eq!(s.apply(CheckoutEvent::Cancel).unwrap(), ReviewingCart);
        assert_eq!(s.channel(), None);

        let mut s = at_payee();
        s.apply(CheckoutEvent::SubmitPayee("0712345678".into())).unwrap();
        assert!(matches!(s.apply(CheckoutEvent::Cancel), Err(Rejection::InvalidTransition { state: Processing, .. })));
        assert_eq!(s.state(), Processing);
    }

    #[test]
    fn test_retry_until_exhausted() {
        let mut s = at_payee();
        for attempt in 1..=3 {
            s.apply(CheckoutEvent::SubmitPayee("0712345678".into())).unwrap();
            assert_eq!(s.attempts(), attempt);
            let state = s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Failed(FailureReason::Declined))).unwrap();
            if attempt < 3 {
                assert_eq!(state, Failed(FailureReason::Declined));
                assert_eq!(s.apply(CheckoutEvent::Retry).unwrap(), SelectingChannel);
                s.apply(CheckoutEvent::ChooseChannel(MPESA)).unwrap();
            } else {
                assert_eq!(state, Failed(FailureReason::AttemptsExhausted));
            }
        }
        assert!(s.state().is_terminal());
        assert_eq!(s.apply(CheckoutEvent::Retry), Err(Rejection::AttemptsExhausted));
        assert!(s.apply(CheckoutEvent::Cancel).is_err());
    }

    #[test]
    fn test_resubmit_after_store_failure() {
        let mut s = PaymentSession::new(1);
        s.apply(CheckoutEvent::Begin { cart_lines: 1 }).unwrap();
        s.apply(CheckoutEvent::ChooseChannel(MPESA)).unwrap();
        s.apply(CheckoutEvent::SubmitPayee("0712345678".into())).unwrap();
        let state = s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Failed(FailureReason::Submission))).unwrap();
        assert_eq!(state, Failed(FailureReason::Submission));

        assert_eq!(s.apply(CheckoutEvent::Resubmit).unwrap(), Processing);
        assert_eq!(s.attempts(), 1);
        assert_eq!(s.payee().unwrap().as_str(), "254712345678");
        assert_eq!(s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Confirmed)).unwrap(), Succeeded);
    }

    #[test]
    fn test_resubmit_needs_submission_failure() {
        let mut s = at_payee();
        s.apply(CheckoutEvent::SubmitPayee("0712345678".into())).unwrap();
        s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Failed(FailureReason::Declined))).unwrap();
        assert!(matches!(s.apply(CheckoutEvent::Resubmit), Err(Rejection::InvalidTransition { .. })));
        assert_eq!(s.state(), Failed(FailureReason::Declined));
    }

    #[test]
    fn test_remote_processing_always_has_payee() {
        let mut s = at_payee();
        for raw in ["", " ", "abc", "0712345678"] {
            if let Ok(Processing) = s.apply(CheckoutEvent::SubmitPayee(raw.into())) {
                assert!(s.payee().is_some());
            }
        }
        assert_eq!(s.state(), Processing);
    }

    #[test]
    fn test_events_out_of_order_rejected() {
        let mut s = PaymentSession::new(3);
        assert!(s.apply(CheckoutEvent::ChooseChannel(PaymentChannel::Cash)).is_err());
        assert!(s.apply(CheckoutEvent::Resolve(ProcessingOutcome::Confirmed)).is_err());
        assert!(s.apply(CheckoutEvent::Retry).is_err());
        assert_eq!(s.history(), &[ReviewingCart]);
    }
}
