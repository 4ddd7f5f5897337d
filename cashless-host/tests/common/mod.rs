#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use cashless_host::ports::{EmvKernel, PaymentProcessor};
use cashless_host::sim::SimRig;
use cashless_host::{HostConfig, HostError, Orchestrator, Result};
use cashless_icd::card::MagCardInfo;
use cashless_icd::cashless_device::CashlessSignal;
use cashless_icd::{Amount, OutboundEvent, StatusMessage};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the processor does with its next payment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    Approve,
    Decline,
    Fail,
    Panic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Magstripe(Amount),
    Emv {
        contactless: bool,
        amount: Amount,
        payload: Vec<u8>,
        emv_present: bool,
    },
}

/// Processor that follows a script, approving once the script runs out
#[derive(Default)]
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedProcessor {
    pub fn then(&self, step: Script) {
        lock(&self.script).push_back(step);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    fn run(&self, call: Call) -> Result<bool> {
        lock(&self.calls).push(call);
        let step = lock(&self.script).pop_front().unwrap_or(Script::Approve);
        match step {
            Script::Approve => Ok(true),
            Script::Decline => Ok(false),
            Script::Fail => Err(HostError::Processor("acquirer unreachable".to_string())),
            Script::Panic => panic!("processor crashed"),
        }
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn process_magstripe(&self, _card: &MagCardInfo, amount: Amount) -> Result<bool> {
        self.run(Call::Magstripe(amount))
    }

    async fn process_emv(
        &self,
        emv: Option<Arc<dyn EmvKernel>>,
        payload: &[u8],
        contactless: bool,
        amount: Amount,
    ) -> Result<bool> {
        self.run(Call::Emv {
            contactless,
            amount,
            payload: payload.to_vec(),
            emv_present: emv.is_some(),
        })
    }
}

/// An orchestrator running against the simulated machine
pub struct Harness {
    pub rig: SimRig,
    pub processor: Arc<ScriptedProcessor>,
    pub orchestrator: Orchestrator,
    pub events: broadcast::Receiver<StatusMessage>,
}

impl Harness {
    /// Started with the payment kernel connected
    pub fn start() -> Self {
        let harness = Self::start_disconnected();
        assert!(harness.rig.kernel.connect());
        harness
    }

    pub fn start_disconnected() -> Self {
        let rig = SimRig::new();
        let processor = Arc::new(ScriptedProcessor::default());
        let orchestrator = Orchestrator::start(HostConfig::default(), rig.collaborators(processor.clone()));
        let events = orchestrator.subscribe();
        Self {
            rig,
            processor,
            orchestrator,
            events,
        }
    }

    pub fn vend(&self, payload: &[u8]) {
        self.rig.cashless.signal(CashlessSignal::VendRequest(payload.to_vec()));
    }

    pub fn init(&self) {
        self.rig.cashless.signal(CashlessSignal::InitialComplete {
            cashless_info: vec![0x01],
            vmc_info: vec![0x03],
        });
    }

    pub async fn next_message(&mut self) -> StatusMessage {
        next_message(&mut self.events).await
    }

    pub async fn next_event(&mut self) -> OutboundEvent {
        self.next_message().await.event
    }

    /// Nothing is published within a second
    pub async fn assert_quiet(&mut self) {
        if let Ok(msg) = timeout(Duration::from_secs(1), self.events.recv()).await {
            panic!("unexpected event {msg:?}");
        }
    }
}

pub async fn next_message(events: &mut broadcast::Receiver<StatusMessage>) -> StatusMessage {
    // Longer than the card check deadline so timeouts can play out
    timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("no event published")
        .expect("event stream closed")
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}
