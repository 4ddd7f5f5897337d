use core::fmt;

use postcard_schema::Schema;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod card;
pub mod cashless_device;
pub mod controller;

//Wire codes published to status observers
pub const EVENT_ONLINE: u8 = 1;
pub const EVENT_OFFLINE: u8 = 2;
pub const EVENT_VEND_STARTED: u8 = 3;
pub const EVENT_PAYMENT_SUCCESS: u8 = 4;
pub const EVENT_PAYMENT_FAILED: u8 = 5;

/// A vend price in cents.
///
/// The cashless bus carries the price in the first four bytes of the vend
/// request payload, big-endian. Consumers see it as a two decimal place value.
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Default)]
pub struct Amount(u32);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: u32) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u32 {
        self.0
    }

    /// Reads the price out of a vend request payload.
    /// Anything shorter than four bytes is a zero price.
    pub fn from_vend_payload(payload: &[u8]) -> Self {
        match payload {
            [a, b, c, d, ..] => Self(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => Self::ZERO,
        }
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(i64::from(self.0), 2)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// Status events handed to whoever is watching the service (a display, a logger...)
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Copy, Clone)]
pub enum OutboundEvent {
    Online,
    Offline,
    VendStarted(Amount),
    PaymentSuccess,
    PaymentFailed,
}

impl OutboundEvent {
    pub fn code(&self) -> u8 {
        match self {
            OutboundEvent::Online => EVENT_ONLINE,
            OutboundEvent::Offline => EVENT_OFFLINE,
            OutboundEvent::VendStarted(_) => EVENT_VEND_STARTED,
            OutboundEvent::PaymentSuccess => EVENT_PAYMENT_SUCCESS,
            OutboundEvent::PaymentFailed => EVENT_PAYMENT_FAILED,
        }
    }

    /// Only VendStarted carries an amount.
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            OutboundEvent::VendStarted(amount) => Some(amount.to_decimal()),
            _ => None,
        }
    }

    /// PaymentSuccess and PaymentFailed close a transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboundEvent::PaymentSuccess | OutboundEvent::PaymentFailed)
    }
}

/// A published event, numbered in publication order.
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Copy, Clone)]
pub struct StatusMessage {
    pub seq: u32,
    pub event: OutboundEvent,
}

impl StatusMessage {
    pub fn to_frame(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(frame)
    }
}

#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum ServiceState {
    #[default]
    Offline,
    Online,
    VendInProgress(Amount),
}
