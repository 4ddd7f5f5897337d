//! Error types for the cashless host
//!
//! Every failure the orchestrator can hit during a vend collapses to a denied
//! vend and a `PaymentFailed` publication. The variants here exist so logs can
//! say which of those failures it was.

use std::time::Duration;

use thiserror::Error;

use crate::transaction::Stage;

#[derive(Debug, Error)]
pub enum HostError {
    /// The card payment kernel is not connected, so no card can be read
    #[error("card payment kernel is not connected")]
    KernelUnavailable,

    #[error("card detection failed with code {code}: {message}")]
    Detection { code: i32, message: String },

    #[error("no card detected within {0:?}")]
    DetectionTimeout(Duration),

    /// The kernel dropped the reply handle without answering
    #[error("card detection abandoned by the payment kernel")]
    DetectionAbandoned,

    #[error("payment processor failed: {0}")]
    Processor(String),

    #[error("cashless bus error: {0}")]
    CashlessBus(String),

    #[error("vending bus error: {0}")]
    VendingBus(String),

    #[error("payment kernel error: {0}")]
    Kernel(String),

    #[error("transaction serializer is not accepting work")]
    SerializerClosed,

    #[error("invalid value '{value}' for {key}")]
    Config { key: &'static str, value: String },

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("transaction cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: Stage, to: Stage },
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cashless_icd::card::CardTechnology;
    use rstest::rstest;

    #[rstest]
    #[case::kernel(HostError::KernelUnavailable, "card payment kernel is not connected")]
    #[case::detection(
        HostError::Detection { code: 99, message: "timeout".to_string() },
        "card detection failed with code 99: timeout"
    )]
    #[case::timeout(HostError::DetectionTimeout(Duration::from_secs(60)), "no card detected within 60s")]
    #[case::config(
        HostError::Config { key: "CASHLESS_POLL_BACKOFF_MS", value: "soon".to_string() },
        "invalid value 'soon' for CASHLESS_POLL_BACKOFF_MS"
    )]
    #[case::transition(
        HostError::InvalidTransition { from: Stage::Idle, to: Stage::Found(CardTechnology::Chip) },
        "transaction cannot move from Idle to Found(Chip)"
    )]
    fn test_error_display(#[case] error: HostError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }
}
