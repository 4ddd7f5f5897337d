use std::time::Duration;

use cashless_icd::controller::{empty_frame, CommandFrame, PollOutcome, ANSWER_ACK};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ports::VendingBus;

/// Polls the vending machine controller and acknowledges whatever it sends.
///
/// Runs as its own task, apart from the transaction serializer, so a vend in
/// progress never holds up protocol acknowledgments.
pub struct VendingBusAdapter {
    bus: Box<dyn VendingBus>,
    backoff: Duration,
    frame: CommandFrame,
    acknowledged: u64,
}

impl VendingBusAdapter {
    pub fn new(bus: Box<dyn VendingBus>, backoff: Duration) -> Self {
        Self {
            bus,
            backoff,
            frame: empty_frame(),
            acknowledged: 0,
        }
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    /// One receive attempt. A received command is acknowledged straight away.
    //TODO: decode the command byte once per-command answers are needed; every frame gets ANSWER_ACK for now
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let outcome = self.bus.receive_command(&mut self.frame).await?;
        if outcome == PollOutcome::CommandReceived {
            self.bus.send_answer(ANSWER_ACK)?;
            self.acknowledged += 1;
            debug!(acknowledged = self.acknowledged, "Controller command acknowledged");
        }
        Ok(outcome)
    }

    //Loop will:
    //Poll the controller, acking any command and polling again immediately
    //Back off after an empty poll or a bus error
    //Stop within one backoff interval of shutdown, closing the bus on the way out
    pub async fn run(mut self, shutdown: CancellationToken) -> Box<dyn VendingBus> {
        info!(backoff = ?self.backoff, "Controller receive loop started");
        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = self.poll_once() => polled,
            };
            match polled {
                Ok(PollOutcome::CommandReceived) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(PollOutcome::NoCommand) => {}
                Err(e) => warn!(error = %e, "Controller poll failed"),
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(self.backoff) => {}
            }
        }
        self.bus.close();
        info!(acknowledged = self.acknowledged, "Controller receive loop stopped");
        self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimVendingBus;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_every_command_acked_with_zero() {
        let bus = SimVendingBus::new();
        bus.push_command(&[0x13, 0x00]);
        bus.push_command(&[0x11]);
        let mut adapter = VendingBusAdapter::new(Box::new(bus.clone()), Duration::from_millis(50));

        assert_eq!(adapter.poll_once().await.unwrap(), PollOutcome::CommandReceived);
        assert_eq!(adapter.poll_once().await.unwrap(), PollOutcome::CommandReceived);
        assert_eq!(adapter.poll_once().await.unwrap(), PollOutcome::NoCommand);
        assert_eq!(bus.answers(), vec![ANSWER_ACK, ANSWER_ACK]);
        assert_eq!(adapter.acknowledged(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_backs_off_and_stops() {
        let bus = SimVendingBus::new();
        let adapter = VendingBusAdapter::new(Box::new(bus.clone()), Duration::from_millis(50));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(adapter.run(shutdown.clone()));

        sleep(Duration::from_millis(120)).await;
        // Empty polls at 0, 50 and 100ms
        assert_eq!(bus.polls(), 3);

        bus.push_command(&[0x12]);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.answers(), vec![ANSWER_ACK]);

        let stop_requested = Instant::now();
        shutdown.cancel();
        task.await.unwrap();
        assert!(stop_requested.elapsed() <= Duration::from_millis(50));
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_errors_back_off_and_keep_polling() {
        let bus = SimVendingBus::new();
        bus.fail_receives(2);
        bus.push_command(&[0x13]);
        let adapter = VendingBusAdapter::new(Box::new(bus.clone()), Duration::from_millis(50));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(adapter.run(shutdown.clone()));

        // Failures at 0 and 50ms, nothing sent back for either
        sleep(Duration::from_millis(70)).await;
        assert_eq!(bus.polls(), 2);
        assert!(bus.answers().is_empty());

        // The queued command is picked up on the next poll
        sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.answers(), vec![ANSWER_ACK]);

        shutdown.cancel();
        task.await.unwrap();
        assert!(bus.is_closed());
    }
}
