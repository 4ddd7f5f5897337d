//! In-memory stand-ins for the hardware, used by the console binary and tests.
//!
//! Every handle is cheap to clone; clones share state so one copy can be given
//! to the orchestrator while another drives it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cashless_icd::card::{CardDetectionOutcome, CardTypeMask};
use cashless_icd::cashless_device::{CashlessConfig, CashlessSignal};
use cashless_icd::controller::{CommandFrame, PollOutcome};
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::kernel::{CardCheckReply, KernelHandles, KernelLink};
use crate::monitor::CashlessMonitor;
use crate::orchestrator::Collaborators;
use crate::ports::{CardReader, CashlessBus, EmvKernel, PaymentKernel, PaymentProcessor, VendingBus};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the simulated cashless bus was told about each vend
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BusResponse {
    Approved(Vec<u8>),
    Denied,
}

/// How the next approval on the simulated cashless bus goes wrong
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BusFault {
    /// The bus rejects the approval
    Error,
    /// The approval reaches the bus, then the driver call panics
    PanicAfterSend,
}

#[derive(Default)]
struct CashlessInner {
    monitor: Option<CashlessMonitor>,
    config: Option<CashlessConfig>,
    responses: Vec<BusResponse>,
    approve_fault: Option<BusFault>,
}

#[derive(Clone, Default)]
pub struct SimCashlessBus {
    inner: Arc<Mutex<CashlessInner>>,
}

impl SimCashlessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a signal as the bus would. Dropped if no monitor is registered.
    pub fn signal(&self, signal: CashlessSignal) {
        let monitor = lock(&self.inner).monitor.clone();
        match monitor {
            Some(monitor) => monitor.on_signal(signal),
            None => warn!(signal = signal.name(), "No cashless monitor registered"),
        }
    }

    pub fn responses(&self) -> Vec<BusResponse> {
        lock(&self.inner).responses.clone()
    }

    pub fn config(&self) -> Option<CashlessConfig> {
        lock(&self.inner).config
    }

    pub fn fault_next_approval(&self, fault: BusFault) {
        lock(&self.inner).approve_fault = Some(fault);
    }
}

impl CashlessBus for SimCashlessBus {
    fn configure(&self, config: &CashlessConfig) -> Result<()> {
        lock(&self.inner).config = Some(*config);
        Ok(())
    }

    fn register_monitor(&self, monitor: CashlessMonitor) -> Result<()> {
        lock(&self.inner).monitor = Some(monitor);
        Ok(())
    }

    fn send_vend_approved(&self, payload: &[u8]) -> Result<()> {
        let mut inner = lock(&self.inner);
        match inner.approve_fault.take() {
            Some(BusFault::Error) => Err(HostError::CashlessBus("approval not acknowledged".to_string())),
            Some(BusFault::PanicAfterSend) => {
                inner.responses.push(BusResponse::Approved(payload.to_vec()));
                drop(inner);
                panic!("cashless driver crashed after approval");
            }
            None => {
                debug!(len = payload.len(), "Sim bus: vend approved");
                inner.responses.push(BusResponse::Approved(payload.to_vec()));
                Ok(())
            }
        }
    }

    fn send_vend_denied(&self) -> Result<()> {
        debug!("Sim bus: vend denied");
        lock(&self.inner).responses.push(BusResponse::Denied);
        Ok(())
    }
}

#[derive(Default)]
struct VendingInner {
    commands: VecDeque<Vec<u8>>,
    answers: Vec<u8>,
    polls: u64,
    receive_failures: u32,
    open: bool,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct SimVendingBus {
    inner: Arc<Mutex<VendingInner>>,
}

impl SimVendingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a controller command; frames longer than the receive buffer are truncated.
    pub fn push_command(&self, command: &[u8]) {
        lock(&self.inner).commands.push_back(command.to_vec());
    }

    /// The next `count` receive attempts fail
    pub fn fail_receives(&self, count: u32) {
        lock(&self.inner).receive_failures = count;
    }

    pub fn answers(&self) -> Vec<u8> {
        lock(&self.inner).answers.clone()
    }

    pub fn polls(&self) -> u64 {
        lock(&self.inner).polls
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner).open
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}

#[async_trait]
impl VendingBus for SimVendingBus {
    fn open(&mut self) -> Result<()> {
        lock(&self.inner).open = true;
        Ok(())
    }

    async fn receive_command(&mut self, frame: &mut CommandFrame) -> Result<PollOutcome> {
        let mut inner = lock(&self.inner);
        inner.polls += 1;
        if inner.receive_failures > 0 {
            inner.receive_failures -= 1;
            return Err(HostError::VendingBus("framing error".to_string()));
        }
        match inner.commands.pop_front() {
            Some(command) => {
                let len = command.len().min(frame.len());
                frame[..len].copy_from_slice(&command[..len]);
                Ok(PollOutcome::CommandReceived)
            }
            None => Ok(PollOutcome::NoCommand),
        }
    }

    fn send_answer(&mut self, status: u8) -> Result<()> {
        lock(&self.inner).answers.push(status);
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = lock(&self.inner);
        inner.open = false;
        inner.closed = true;
    }
}

#[derive(Default)]
struct ReaderInner {
    scripted: VecDeque<CardDetectionOutcome>,
    pending: Option<CardCheckReply>,
    checks: Vec<(CardTypeMask, Duration)>,
}

/// Card reader that answers from a script, or holds the check open until
/// [`SimCardReader::present`] is called.
#[derive(Clone, Default)]
pub struct SimCardReader {
    inner: Arc<Mutex<ReaderInner>>,
}

impl SimCardReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome for a future card check, answered as soon as the check starts
    pub fn script(&self, outcome: CardDetectionOutcome) {
        lock(&self.inner).scripted.push_back(outcome);
    }

    /// Answer the check currently waiting for a card. Returns false if none is.
    pub fn present(&self, outcome: CardDetectionOutcome) -> bool {
        let pending = lock(&self.inner).pending.take();
        match pending {
            Some(reply) => {
                reply.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the waiting check without an answer, as a disconnecting kernel would
    pub fn abandon(&self) -> bool {
        lock(&self.inner).pending.take().is_some()
    }

    pub fn is_waiting(&self) -> bool {
        lock(&self.inner).pending.is_some()
    }

    pub fn checks(&self) -> Vec<(CardTypeMask, Duration)> {
        lock(&self.inner).checks.clone()
    }
}

impl CardReader for SimCardReader {
    fn check_card(&self, card_types: CardTypeMask, timeout: Duration, reply: CardCheckReply) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.checks.push((card_types, timeout));
        let scripted = inner.scripted.pop_front();
        match scripted {
            Some(outcome) => {
                drop(inner);
                reply.send(outcome);
            }
            None => inner.pending = Some(reply),
        }
        Ok(())
    }
}

pub struct SimEmv;

impl EmvKernel for SimEmv {
    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct KernelInner {
    link: Option<KernelLink>,
    destroyed: bool,
    fail_destroy: bool,
}

/// Payment kernel whose connection is toggled by hand
#[derive(Clone, Default)]
pub struct SimPaymentKernel {
    reader: SimCardReader,
    inner: Arc<Mutex<KernelInner>>,
}

impl SimPaymentKernel {
    pub fn new(reader: SimCardReader) -> Self {
        Self {
            reader,
            inner: Arc::default(),
        }
    }

    pub fn reader(&self) -> &SimCardReader {
        &self.reader
    }

    pub fn connect(&self) -> bool {
        let link = lock(&self.inner).link.clone();
        match link {
            Some(link) => {
                link.connected(KernelHandles {
                    card_reader: Arc::new(self.reader.clone()),
                    emv: Arc::new(SimEmv),
                });
                true
            }
            None => false,
        }
    }

    /// Also abandons any card check in progress
    pub fn disconnect(&self) -> bool {
        let link = lock(&self.inner).link.clone();
        self.reader.abandon();
        match link {
            Some(link) => {
                link.disconnected();
                true
            }
            None => false,
        }
    }

    pub fn fail_destroy(&self) {
        lock(&self.inner).fail_destroy = true;
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner).destroyed
    }
}

impl PaymentKernel for SimPaymentKernel {
    fn bind(&self, link: KernelLink) -> Result<bool> {
        lock(&self.inner).link = Some(link);
        Ok(true)
    }

    fn destroy(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.link = None;
        if inner.fail_destroy {
            return Err(HostError::Kernel("sim kernel refused to unbind".to_string()));
        }
        inner.destroyed = true;
        Ok(())
    }
}

/// The whole simulated machine
#[derive(Clone, Default)]
pub struct SimRig {
    pub cashless: SimCashlessBus,
    pub vending: SimVendingBus,
    pub kernel: SimPaymentKernel,
}

impl SimRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> &SimCardReader {
        self.kernel.reader()
    }

    pub fn collaborators(&self, processor: Arc<dyn PaymentProcessor>) -> Collaborators {
        Collaborators {
            cashless: Some(Arc::new(self.cashless.clone())),
            vending_bus: Some(Box::new(self.vending.clone())),
            kernel: Some(Arc::new(self.kernel.clone())),
            processor,
        }
    }
}
