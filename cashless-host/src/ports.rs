//! Hardware capabilities the orchestrator drives.
//!
//! Each one is a trait so a real binding, the simulator in [`crate::sim`] or a
//! test fake can be plugged in independently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cashless_icd::card::{CardTypeMask, MagCardInfo};
use cashless_icd::cashless_device::CashlessConfig;
use cashless_icd::controller::{CommandFrame, PollOutcome};
use cashless_icd::Amount;

use crate::error::Result;
use crate::kernel::{CardCheckReply, KernelLink};
use crate::monitor::CashlessMonitor;

/// The event-driven cashless bus towards the vending machine.
pub trait CashlessBus: Send + Sync {
    fn configure(&self, config: &CashlessConfig) -> Result<()>;

    /// Signals raised by the bus are delivered to `monitor` from then on.
    fn register_monitor(&self, monitor: CashlessMonitor) -> Result<()>;

    fn send_vend_approved(&self, payload: &[u8]) -> Result<()>;

    fn send_vend_denied(&self) -> Result<()>;
}

/// The polled controller link, with us acting as the slave device.
///
/// `receive_command` must not block the runtime; return `NoCommand` when
/// nothing is pending and let the caller back off.
#[async_trait]
pub trait VendingBus: Send {
    fn open(&mut self) -> Result<()>;

    async fn receive_command(&mut self, frame: &mut CommandFrame) -> Result<PollOutcome>;

    fn send_answer(&mut self, status: u8) -> Result<()>;

    fn close(&mut self);
}

pub trait CardReader: Send + Sync {
    /// Starts looking for a card. The outcome arrives later through `reply`,
    /// possibly from another thread.
    fn check_card(&self, card_types: CardTypeMask, timeout: Duration, reply: CardCheckReply) -> Result<()>;
}

pub trait EmvKernel: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Lifecycle of the card payment kernel.
pub trait PaymentKernel: Send + Sync {
    /// Returns the bind result. Connect/disconnect are reported through `link`.
    fn bind(&self, link: KernelLink) -> Result<bool>;

    fn destroy(&self) -> Result<()>;
}

/// Settlement for a detected card. `Ok(false)` is a decline, `Err` an unexpected failure.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn process_magstripe(&self, card: &MagCardInfo, amount: Amount) -> Result<bool>;

    async fn process_emv(
        &self,
        emv: Option<Arc<dyn EmvKernel>>,
        payload: &[u8],
        contactless: bool,
        amount: Amount,
    ) -> Result<bool>;
}
