//! Card detection and routing for one vend request.
//!
//! The card check answers through a one-shot reply from the kernel's thread.
//! The serializer worker awaits that reply itself, so settlement always runs
//! on the worker and the next queued vend cannot start until this one has
//! produced its terminal event.

use cashless_icd::card::{CardDetectionOutcome, CardTechnology, CardTypeMask};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{HostError, Result};
use crate::kernel::CardCheckReply;
use crate::orchestrator::VendService;
use crate::ports::CardReader;
use crate::transaction::{Stage, VendTransaction};

impl VendService {
    pub(crate) async fn dispatch_vend(&mut self, payload: Vec<u8>) {
        let mut tx = self.begin_vend(payload);
        let result = self.collect_card_payment(&mut tx).await;
        self.finish_vend(tx, result);
    }

    /// `Ok(true)` approves the vend, anything else denies it
    async fn collect_card_payment(&self, tx: &mut VendTransaction) -> Result<bool> {
        let Some(reader) = self.kernel.card_reader() else {
            warn!(tx = tx.id(), "Card reader unavailable, cannot check card");
            return Err(HostError::KernelUnavailable);
        };

        tx.advance(Stage::AwaitingCard)?;
        let outcome = match self.detect_card(reader.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tx.advance(Stage::DetectionFailed)?;
                return Err(e);
            }
        };

        let amount = tx.amount();
        match outcome {
            CardDetectionOutcome::DetectionError { code, message } => {
                warn!(tx = tx.id(), code, %message, "Card check error");
                tx.advance(Stage::DetectionFailed)?;
                Err(HostError::Detection { code, message })
            }
            CardDetectionOutcome::Magstripe(info) => {
                Self::start_settling(tx, CardTechnology::Magstripe)?;
                self.processor.process_magstripe(&info, amount).await
            }
            CardDetectionOutcome::ChipCard(atr) => {
                info!(tx = tx.id(), %atr, "Chip card presented");
                Self::start_settling(tx, CardTechnology::Chip)?;
                self.processor
                    .process_emv(self.kernel.emv(), tx.payload(), false, amount)
                    .await
            }
            CardDetectionOutcome::ContactlessCard(uuid) => {
                info!(tx = tx.id(), %uuid, "Contactless card presented");
                Self::start_settling(tx, CardTechnology::Contactless)?;
                self.processor
                    .process_emv(self.kernel.emv(), tx.payload(), true, amount)
                    .await
            }
        }
    }

    fn start_settling(tx: &mut VendTransaction, technology: CardTechnology) -> Result<()> {
        tx.advance(Stage::Found(technology))?;
        tx.advance(Stage::Settling)
    }

    async fn detect_card(&self, reader: &dyn CardReader) -> Result<CardDetectionOutcome> {
        let (reply, outcome) = CardCheckReply::channel();
        reader.check_card(CardTypeMask::ALL, self.config.card_check_timeout, reply)?;

        match timeout(self.config.card_check_deadline(), outcome).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(HostError::DetectionAbandoned),
            Err(_) => Err(HostError::DetectionTimeout(self.config.card_check_timeout)),
        }
    }
}
