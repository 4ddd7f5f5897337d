use std::sync::Arc;

use cashless_icd::cashless_device::CashlessSignal;
use cashless_icd::OutboundEvent;
use tracing::{debug, error, info, warn};

use crate::orchestrator::VendService;
use crate::ports::CashlessBus;
use crate::publisher::StatusPublisher;
use crate::serializer::{Job, JobSender};

/// Sink registered with the cashless bus.
///
/// `on_signal` is called from the bus's own callback thread. It only queues
/// work for the transaction serializer and never fails back into the bus.
///
/// Holds the bus so a vend request that cannot be queued still gets its deny,
/// including after the orchestrator has shut down.
#[derive(Clone)]
pub struct CashlessMonitor {
    jobs: JobSender,
    publisher: StatusPublisher,
    cashless: Option<Arc<dyn CashlessBus>>,
}

impl CashlessMonitor {
    pub(crate) fn new(
        jobs: JobSender,
        publisher: StatusPublisher,
        cashless: Option<Arc<dyn CashlessBus>>,
    ) -> Self {
        Self {
            jobs,
            publisher,
            cashless,
        }
    }

    pub fn on_signal(&self, signal: CashlessSignal) {
        let name = signal.name();
        if signal.is_protocol_noop() {
            debug!(signal = name, "Ignoring cashless protocol signal");
            return;
        }
        info!(signal = name, "Cashless signal received");

        let vend_related = signal.is_vend_related();
        let vend_request = matches!(signal, CashlessSignal::VendRequest(_));
        if let Err(e) = self.jobs.submit(Job::Cashless(signal)) {
            error!(signal = name, error = %e, "Could not queue cashless signal");
            if vend_request {
                self.deny_unqueued_vend();
            }
            if vend_related {
                self.publisher.publish(OutboundEvent::PaymentFailed);
            }
        }
    }

    //The bus still expects an answer to a request that never reached the serializer
    fn deny_unqueued_vend(&self) {
        match &self.cashless {
            Some(bus) => {
                if let Err(e) = bus.send_vend_denied() {
                    error!(error = %e, "Could not deny unqueued vend");
                }
            }
            None => warn!("No cashless bus to deny unqueued vend on"),
        }
    }
}

impl VendService {
    /// Top-level reaction to a cashless signal, run on the serializer
    pub(crate) async fn handle_signal(&mut self, signal: CashlessSignal) {
        match signal {
            CashlessSignal::InitialComplete { cashless_info, vmc_info } => {
                info!(
                    cashless_info = cashless_info.len(),
                    vmc_info = vmc_info.len(),
                    "Cashless initial complete"
                );
                self.set_online(true);
            }
            CashlessSignal::VendRequest(payload) => self.dispatch_vend(payload).await,
            CashlessSignal::VendCancel => {
                info!("Cashless vend cancelled");
                self.publisher.publish(OutboundEvent::PaymentFailed);
            }
            CashlessSignal::VendFailure(_) => {
                info!("Cashless vend failed");
                self.publisher.publish(OutboundEvent::PaymentFailed);
            }
            CashlessSignal::VendSuccess(_) => {
                info!("Cashless vend successful");
                self.publisher.publish(OutboundEvent::PaymentSuccess);
            }
            other => debug!(signal = other.name(), "Ignoring cashless protocol signal"),
        }
    }
}
