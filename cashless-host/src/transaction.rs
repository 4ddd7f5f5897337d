//! Per-vend state machine
//!
//! `Idle -> Requested -> AwaitingCard -> Found(tech) | DetectionFailed -> Settling -> Approved | Denied -> Idle`
//!
//! A vend may be denied from any non-terminal stage. Only `Settling` can be approved.

use cashless_icd::card::CardTechnology;
use cashless_icd::Amount;
use tracing::trace;

use crate::error::{HostError, Result};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Stage {
    Idle,
    Requested,
    AwaitingCard,
    Found(CardTechnology),
    DetectionFailed,
    Settling,
    Approved,
    Denied,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Approved | Stage::Denied)
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Idle, Requested) => true,
            (Requested, AwaitingCard) => true,
            (AwaitingCard, Found(_)) | (AwaitingCard, DetectionFailed) => true,
            (Found(_), Settling) => true,
            (Settling, Approved) => true,
            (Approved, Idle) | (Denied, Idle) => true,
            (from, Denied) => from != Idle && !from.is_terminal(),
            _ => false,
        }
    }
}

pub struct VendTransaction {
    id: u64,
    payload: Vec<u8>,
    amount: Amount,
    stage: Stage,
}

impl VendTransaction {
    /// Takes the raw vend request payload; it is echoed back verbatim on approval.
    pub fn new(id: u64, payload: Vec<u8>) -> Self {
        let amount = Amount::from_vend_payload(&payload);
        Self {
            id,
            payload,
            amount,
            stage: Stage::Requested,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance_to(next) {
            return Err(HostError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        trace!(tx = self.id, from = ?self.stage, to = ?next, "Transaction stage change");
        self.stage = next;
        Ok(())
    }
}
