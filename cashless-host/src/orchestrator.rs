use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use cashless_icd::cashless_device::CashlessSignal;
use cashless_icd::{OutboundEvent, ServiceState, StatusMessage};

use crate::config::HostConfig;
use crate::error::Result;
use crate::kernel::{KernelEvent, KernelLink, KernelState};
use crate::monitor::CashlessMonitor;
use crate::ports::{CashlessBus, PaymentKernel, PaymentProcessor, VendingBus};
use crate::publisher::StatusPublisher;
use crate::serializer::{self, Job, JobHandler, JobSender};
use crate::transaction::{Stage, VendTransaction};
use crate::vending_bus::VendingBusAdapter;

/// The hardware an orchestrator is wired to. Any bus may be missing; that
/// capability is then simply unavailable.
pub struct Collaborators {
    pub cashless: Option<Arc<dyn CashlessBus>>,
    pub vending_bus: Option<Box<dyn VendingBus>>,
    pub kernel: Option<Arc<dyn PaymentKernel>>,
    pub processor: Arc<dyn PaymentProcessor>,
}

/// The vend the serializer is working on
#[derive(Clone, Copy)]
struct InFlight {
    tx: u64,
    /// Set once approve or deny has been handed to the bus
    answered: bool,
}

/// Owned by the serializer worker; only the worker ever mutates it.
pub(crate) struct VendService {
    pub(crate) config: HostConfig,
    pub(crate) publisher: StatusPublisher,
    pub(crate) processor: Arc<dyn PaymentProcessor>,
    pub(crate) kernel: KernelState,
    cashless: Option<Arc<dyn CashlessBus>>,
    state: watch::Sender<ServiceState>,
    online: bool,
    in_flight: Option<InFlight>,
    next_tx: u64,
}

impl VendService {
    fn new(
        config: HostConfig,
        publisher: StatusPublisher,
        cashless: Option<Arc<dyn CashlessBus>>,
        processor: Arc<dyn PaymentProcessor>,
        state: watch::Sender<ServiceState>,
    ) -> Self {
        Self {
            config,
            publisher,
            processor,
            kernel: KernelState::Disconnected,
            cashless,
            state,
            online: false,
            in_flight: None,
            next_tx: 1,
        }
    }

    fn idle_state(&self) -> ServiceState {
        if self.online {
            ServiceState::Online
        } else {
            ServiceState::Offline
        }
    }

    /// Publishes Online/Offline only when the link actually changes
    pub(crate) fn set_online(&mut self, online: bool) {
        if self.online == online {
            debug!(online, "Cashless link state unchanged");
            return;
        }
        self.online = online;
        if self.in_flight.is_none() {
            self.state.send_replace(self.idle_state());
        }
        self.publisher.publish(if online {
            OutboundEvent::Online
        } else {
            OutboundEvent::Offline
        });
    }

    pub(crate) fn begin_vend(&mut self, payload: Vec<u8>) -> VendTransaction {
        let tx = VendTransaction::new(self.next_tx, payload);
        self.next_tx += 1;
        self.in_flight = Some(InFlight {
            tx: tx.id(),
            answered: false,
        });
        info!(tx = tx.id(), amount = %tx.amount(), "Vend amount parsed");
        self.state.send_replace(ServiceState::VendInProgress(tx.amount()));
        self.publisher.publish(OutboundEvent::VendStarted(tx.amount()));
        tx
    }

    /// Sends the single approve-or-deny for a vend and publishes its terminal event
    pub(crate) fn finish_vend(&mut self, mut tx: VendTransaction, result: Result<bool>) {
        //At most one answer per request, even if the bus call below panics
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.answered = true;
        }
        let approved = match result {
            Ok(true) => match self.send_approved(tx.payload()) {
                Ok(()) => true,
                Err(e) => {
                    error!(tx = tx.id(), error = %e, "Could not approve vend");
                    false
                }
            },
            Ok(false) => {
                info!(tx = tx.id(), "Payment declined");
                false
            }
            Err(e) => {
                warn!(tx = tx.id(), stage = ?tx.stage(), error = %e, "Vend payment failed");
                false
            }
        };

        let terminal = if approved { Stage::Approved } else { Stage::Denied };
        if !approved {
            self.send_denied();
        }
        if let Err(e) = tx.advance(terminal).and_then(|_| tx.advance(Stage::Idle)) {
            error!(tx = tx.id(), error = %e, "Transaction state machine out of step");
        }

        self.in_flight = None;
        self.state.send_replace(self.idle_state());
        self.publisher.publish(if approved {
            OutboundEvent::PaymentSuccess
        } else {
            OutboundEvent::PaymentFailed
        });
    }

    fn send_approved(&self, payload: &[u8]) -> Result<()> {
        match &self.cashless {
            Some(bus) => bus.send_vend_approved(payload),
            None => {
                warn!("No cashless bus to approve vend on");
                Ok(())
            }
        }
    }

    fn send_denied(&self) {
        match &self.cashless {
            Some(bus) => {
                if let Err(e) = bus.send_vend_denied() {
                    error!(error = %e, "Could not deny vend");
                }
            }
            None => warn!("No cashless bus to deny vend on"),
        }
    }

    fn apply_kernel_event(&mut self, event: KernelEvent) {
        match &event {
            KernelEvent::Connected(_) => info!("Card payment kernel ready"),
            KernelEvent::Disconnected => info!("Card payment kernel gone"),
        }
        self.kernel.apply(event);
    }

    fn teardown(&mut self) {
        self.kernel = KernelState::Disconnected;
        self.set_online(false);
    }
}

#[async_trait]
impl JobHandler for VendService {
    async fn handle(&mut self, job: Job) {
        match job {
            Job::Cashless(signal) => self.handle_signal(signal).await,
            Job::Kernel(event) => self.apply_kernel_event(event),
        }
    }

    fn recover(&mut self, job_name: &'static str) {
        if let Some(InFlight { tx, answered }) = self.in_flight.take() {
            error!(tx, answered, job = job_name, "Vend interrupted");
            if !answered {
                self.send_denied();
            }
            self.state.send_replace(self.idle_state());
            self.publisher.publish(OutboundEvent::PaymentFailed);
        }
    }

    fn discard(&mut self, job: Job) {
        if let Job::Cashless(CashlessSignal::VendRequest(_)) = job {
            warn!("Vend request never started, denying");
            self.send_denied();
        }
    }
}

/// Wires the buses, the kernel and the transaction serializer together.
///
/// Must be started from within a tokio runtime. The controller poll loop and
/// the serializer run as separate tasks that share nothing but message queues.
pub struct Orchestrator {
    publisher: StatusPublisher,
    jobs: JobSender,
    state: watch::Receiver<ServiceState>,
    shutdown: CancellationToken,
    serializer: JoinHandle<VendService>,
    poller: Option<JoinHandle<Box<dyn VendingBus>>>,
    kernel: Option<Arc<dyn PaymentKernel>>,
    cashless: Option<Arc<dyn CashlessBus>>,
    _cancel_on_drop: DropGuard,
}

impl Orchestrator {
    pub fn start(config: HostConfig, hardware: Collaborators) -> Self {
        let shutdown = CancellationToken::new();
        let publisher = StatusPublisher::new(config.event_capacity);
        let (state_tx, state) = watch::channel(ServiceState::Offline);

        let service = VendService::new(
            config.clone(),
            publisher.clone(),
            hardware.cashless.clone(),
            hardware.processor,
            state_tx,
        );
        let (jobs, serializer) = serializer::spawn(service, shutdown.child_token());

        match &hardware.cashless {
            Some(bus) => {
                if let Err(e) = bus.configure(&config.cashless) {
                    warn!(error = %e, "Cashless bus configuration failed");
                }
                let monitor = CashlessMonitor::new(jobs.clone(), publisher.clone(), Some(bus.clone()));
                match bus.register_monitor(monitor) {
                    Ok(()) => info!("Cashless monitor registered"),
                    Err(e) => error!(error = %e, "Failed to register cashless monitor"),
                }
            }
            None => warn!("No cashless bus, staying offline"),
        }

        if let Some(kernel) = &hardware.kernel {
            match kernel.bind(KernelLink::new(jobs.clone())) {
                Ok(bound) => info!(bound, "Payment kernel bind result"),
                Err(e) => error!(error = %e, "Payment kernel bind failed"),
            }
        }

        let poller = hardware.vending_bus.map(|mut bus| {
            match bus.open() {
                Ok(()) => info!("Controller bus opened"),
                Err(e) => warn!(error = %e, "Controller bus open failed"),
            }
            let adapter = VendingBusAdapter::new(bus, config.command_poll_backoff);
            tokio::spawn(adapter.run(shutdown.child_token()))
        });

        Self {
            publisher,
            jobs,
            state,
            _cancel_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            serializer,
            poller,
            kernel: hardware.kernel,
            cashless: hardware.cashless,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ServiceState> {
        self.state.clone()
    }

    /// A monitor for buses that are wired up after start
    pub fn monitor(&self) -> CashlessMonitor {
        CashlessMonitor::new(
            self.jobs.clone(),
            self.publisher.clone(),
            self.cashless.clone(),
        )
    }

    pub fn kernel_link(&self) -> KernelLink {
        KernelLink::new(self.jobs.clone())
    }

    /// Stops polling, lets the vend in progress finish, denies anything still
    /// queued and releases the kernel. Kernel teardown failures are ignored.
    pub async fn shutdown(self) {
        info!("Orchestrator shutting down");
        let Orchestrator {
            shutdown,
            serializer,
            poller,
            kernel,
            ..
        } = self;
        shutdown.cancel();

        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                warn!(error = %e, "Controller poll task ended abnormally");
            }
        }

        match serializer.await {
            Ok(mut service) => service.teardown(),
            Err(e) => error!(error = %e, "Transaction serializer ended abnormally"),
        }

        if let Some(kernel) = kernel {
            match std::panic::catch_unwind(AssertUnwindSafe(|| kernel.destroy())) {
                Ok(Ok(())) => info!("Payment kernel destroyed"),
                Ok(Err(e)) => debug!(error = %e, "Ignoring payment kernel teardown failure"),
                Err(_) => debug!("Ignoring payment kernel teardown panic"),
            }
        }
        info!("Orchestrator stopped");
    }
}
