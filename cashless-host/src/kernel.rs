use std::sync::Arc;

use cashless_icd::card::{CardDetectionOutcome, MagCardInfo};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::ports::{CardReader, EmvKernel};
use crate::serializer::{Job, JobSender};

/// Capability handles that become available together when the kernel connects.
#[derive(Clone)]
pub struct KernelHandles {
    pub card_reader: Arc<dyn CardReader>,
    pub emv: Arc<dyn EmvKernel>,
}

#[derive(Clone, Default)]
pub enum KernelState {
    #[default]
    Disconnected,
    Connected(KernelHandles),
}

impl KernelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, KernelState::Connected(_))
    }

    pub fn card_reader(&self) -> Option<Arc<dyn CardReader>> {
        match self {
            KernelState::Connected(handles) => Some(handles.card_reader.clone()),
            KernelState::Disconnected => None,
        }
    }

    pub fn emv(&self) -> Option<Arc<dyn EmvKernel>> {
        match self {
            KernelState::Connected(handles) => Some(handles.emv.clone()),
            KernelState::Disconnected => None,
        }
    }

    pub fn apply(&mut self, event: KernelEvent) {
        *self = match event {
            KernelEvent::Connected(handles) => KernelState::Connected(handles),
            KernelEvent::Disconnected => KernelState::Disconnected,
        };
    }
}

pub enum KernelEvent {
    Connected(KernelHandles),
    Disconnected,
}

/// Handed to the payment kernel when it is bound.
/// Connect and disconnect are queued behind any transaction in flight.
#[derive(Clone)]
pub struct KernelLink {
    jobs: JobSender,
}

impl KernelLink {
    pub(crate) fn new(jobs: JobSender) -> Self {
        Self { jobs }
    }

    pub fn connected(&self, handles: KernelHandles) {
        debug!("Payment kernel connected");
        if let Err(e) = self.jobs.submit(Job::Kernel(KernelEvent::Connected(handles))) {
            warn!(error = %e, "Dropped kernel connect notification");
        }
    }

    pub fn disconnected(&self) {
        debug!("Payment kernel disconnected");
        if let Err(e) = self.jobs.submit(Job::Kernel(KernelEvent::Disconnected)) {
            warn!(error = %e, "Dropped kernel disconnect notification");
        }
    }
}

/// One-shot answer to a card check. Every method consumes the reply, so a
/// check can report at most one outcome. Dropping it unanswered abandons the check.
pub struct CardCheckReply {
    tx: oneshot::Sender<CardDetectionOutcome>,
}

impl CardCheckReply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<CardDetectionOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn found_mag_card(self, info: MagCardInfo) {
        debug!("Magstripe card found");
        self.send(CardDetectionOutcome::Magstripe(info));
    }

    pub fn found_ic_card(self, atr: impl Into<String>) {
        let atr = atr.into();
        debug!(%atr, "Chip card found");
        self.send(CardDetectionOutcome::ChipCard(atr));
    }

    pub fn found_rf_card(self, uuid: impl Into<String>) {
        let uuid = uuid.into();
        debug!(%uuid, "Contactless card found");
        self.send(CardDetectionOutcome::ContactlessCard(uuid));
    }

    pub fn error(self, code: i32, message: impl Into<String>) {
        let message = message.into();
        debug!(code, %message, "Card check error");
        self.send(CardDetectionOutcome::DetectionError { code, message });
    }

    pub fn send(self, outcome: CardDetectionOutcome) {
        //The waiting vend may already have given up
        if self.tx.send(outcome).is_err() {
            debug!("Card check outcome arrived after the vend was closed");
        }
    }
}
