use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cashless_icd::card::MagCardInfo;
use cashless_icd::Amount;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Result;
use crate::ports::{EmvKernel, PaymentProcessor};

const MAGSTRIPE_LATENCY: Duration = Duration::from_millis(300);
const EMV_LATENCY: Duration = Duration::from_millis(500);

/// Stand-in settlement: approves every card after a short delay.
/// EMV cards are declined when the EMV capability is missing or not ready.
pub struct SimulatedProcessor {
    magstripe_latency: Duration,
    emv_latency: Duration,
}

impl SimulatedProcessor {
    pub fn new(magstripe_latency: Duration, emv_latency: Duration) -> Self {
        Self {
            magstripe_latency,
            emv_latency,
        }
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(MAGSTRIPE_LATENCY, EMV_LATENCY)
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn process_magstripe(&self, _card: &MagCardInfo, amount: Amount) -> Result<bool> {
        info!(%amount, "Processing magstripe payment");
        sleep(self.magstripe_latency).await;
        Ok(true)
    }

    async fn process_emv(
        &self,
        emv: Option<Arc<dyn EmvKernel>>,
        _payload: &[u8],
        contactless: bool,
        amount: Amount,
    ) -> Result<bool> {
        info!(contactless, %amount, "Starting EMV transaction");
        match emv {
            Some(emv) if emv.is_ready() => {
                sleep(self.emv_latency).await;
                Ok(true)
            }
            _ => {
                warn!("EMV capability unavailable, cannot start EMV");
                Ok(false)
            }
        }
    }
}
