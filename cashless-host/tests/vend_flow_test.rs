mod common;

use std::time::Duration;

use rstest::rstest;
use rust_decimal::Decimal;
use tokio::time::Instant;

use cashless_host::sim::{BusFault, BusResponse};
use cashless_icd::card::{CardDetectionOutcome, CardTypeMask, MagCardInfo};
use cashless_icd::{Amount, OutboundEvent, ServiceState};

use common::{wait_until, Call, Harness, Script};

const FIFTY: [u8; 6] = [0x00, 0x00, 0x13, 0x88, 0xAA, 0xBB];

#[tokio::test(start_paused = true)]
async fn test_chip_card_approved_echoes_payload() {
    let mut h = Harness::start();
    h.rig
        .reader()
        .script(CardDetectionOutcome::ChipCard("3B6500FF".to_string()));

    h.vend(&FIFTY);

    let started = h.next_event().await;
    assert_eq!(started, OutboundEvent::VendStarted(Amount::from_cents(5000)));
    assert_eq!(started.amount(), Some(Decimal::new(5000, 2)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentSuccess);

    assert_eq!(h.rig.cashless.responses(), vec![BusResponse::Approved(FIFTY.to_vec())]);
    assert_eq!(
        h.processor.calls(),
        vec![Call::Emv {
            contactless: false,
            amount: Amount::from_cents(5000),
            payload: FIFTY.to_vec(),
            emv_present: true,
        }]
    );
    assert_eq!(
        h.rig.reader().checks(),
        vec![(CardTypeMask::ALL, Duration::from_secs(60))]
    );
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_detection_error_denies_without_settling() {
    let mut h = Harness::start();
    h.rig.reader().script(CardDetectionOutcome::DetectionError {
        code: 99,
        message: "timeout".to_string(),
    });

    h.vend(&[0x07]);

    let started = h.next_event().await;
    assert_eq!(started, OutboundEvent::VendStarted(Amount::ZERO));
    assert_eq!(started.amount(), Some(Decimal::ZERO));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);
    assert_eq!(h.rig.cashless.responses(), vec![BusResponse::Denied]);
    assert!(h.processor.calls().is_empty());
    h.orchestrator.shutdown().await;
}

#[rstest]
#[case::error(Script::Fail)]
#[case::panic(Script::Panic)]
#[case::decline(Script::Decline)]
#[tokio::test(start_paused = true)]
async fn test_contactless_failure_denies_and_queue_survives(#[case] step: Script) {
    let mut h = Harness::start();
    h.processor.then(step);
    h.rig
        .reader()
        .script(CardDetectionOutcome::ContactlessCard("04A224".to_string()));
    h.rig
        .reader()
        .script(CardDetectionOutcome::ContactlessCard("04A225".to_string()));

    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);

    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentSuccess);

    assert_eq!(
        h.rig.cashless.responses(),
        vec![BusResponse::Denied, BusResponse::Approved(FIFTY.to_vec())]
    );
    let calls = h.processor.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], Call::Emv { contactless: true, .. }));
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_magstripe_goes_to_magstripe_processing() {
    let mut h = Harness::start();
    h.rig.reader().script(CardDetectionOutcome::Magstripe(MagCardInfo {
        track2: Some("4111111111111111=2512".to_string()),
        ..MagCardInfo::default()
    }));

    h.vend(&[0x00, 0x00, 0x00, 0x96]);

    assert_eq!(
        h.next_event().await,
        OutboundEvent::VendStarted(Amount::from_cents(150))
    );
    assert_eq!(h.next_event().await, OutboundEvent::PaymentSuccess);
    assert_eq!(h.processor.calls(), vec![Call::Magstripe(Amount::from_cents(150))]);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_kernel_short_circuits() {
    let mut h = Harness::start_disconnected();

    h.vend(&FIFTY);

    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);
    assert!(h.rig.reader().checks().is_empty());
    assert!(h.processor.calls().is_empty());
    assert_eq!(h.rig.cashless.responses(), vec![BusResponse::Denied]);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_kernel_times_out() {
    let mut h = Harness::start();
    let began = Instant::now();

    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);

    assert!(began.elapsed() >= Duration::from_secs(65));
    assert_eq!(h.rig.cashless.responses(), vec![BusResponse::Denied]);

    // A card turning up after the deadline changes nothing
    assert!(h
        .rig
        .reader()
        .present(CardDetectionOutcome::ChipCard("3B65".to_string())));
    h.assert_quiet().await;
    assert_eq!(h.rig.cashless.responses().len(), 1);
    assert!(h.processor.calls().is_empty());
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_kernel_disconnect_abandons_card_check() {
    let mut h = Harness::start();
    let began = Instant::now();

    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    let reader = h.rig.reader().clone();
    wait_until(|| reader.is_waiting()).await;

    assert!(h.rig.kernel.disconnect());
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);
    assert!(began.elapsed() < Duration::from_secs(60));

    // The disconnect was queued behind the vend, so the next one short-circuits
    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);
    assert_eq!(h.rig.reader().checks().len(), 1);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_vend_waits_for_first_to_finish() {
    let mut h = Harness::start();

    h.vend(&[0x00, 0x00, 0x00, 0x64]);
    h.vend(&[0x00, 0x00, 0x00, 0xC8]);

    assert_eq!(
        h.next_event().await,
        OutboundEvent::VendStarted(Amount::from_cents(100))
    );
    let reader = h.rig.reader().clone();
    wait_until(|| reader.is_waiting()).await;
    h.assert_quiet().await;

    assert!(reader.present(CardDetectionOutcome::ChipCard("3B65".to_string())));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentSuccess);
    assert_eq!(
        h.next_event().await,
        OutboundEvent::VendStarted(Amount::from_cents(200))
    );

    wait_until(|| reader.is_waiting()).await;
    assert!(reader.present(CardDetectionOutcome::ContactlessCard("04A2".to_string())));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentSuccess);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sequence_numbers_increase() {
    let mut h = Harness::start();
    h.rig
        .reader()
        .script(CardDetectionOutcome::ChipCard("3B65".to_string()));

    h.init();
    h.vend(&FIFTY);

    let seqs = [
        h.next_message().await.seq,
        h.next_message().await.seq,
        h.next_message().await.seq,
    ];
    assert_eq!(seqs, [0, 1, 2]);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_approval_becomes_a_deny() {
    let mut h = Harness::start();
    h.rig.cashless.fault_next_approval(BusFault::Error);
    h.rig
        .reader()
        .script(CardDetectionOutcome::ChipCard("3B65".to_string()));

    h.vend(&FIFTY);

    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);
    assert_eq!(h.rig.cashless.responses(), vec![BusResponse::Denied]);
    assert_eq!(h.orchestrator.state(), ServiceState::Offline);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bus_crash_after_approval_sends_no_second_answer() {
    let mut h = Harness::start();
    h.rig.cashless.fault_next_approval(BusFault::PanicAfterSend);
    h.rig
        .reader()
        .script(CardDetectionOutcome::ChipCard("3B65".to_string()));
    h.rig
        .reader()
        .script(CardDetectionOutcome::ChipCard("3B66".to_string()));

    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentFailed);
    assert_eq!(h.rig.cashless.responses(), vec![BusResponse::Approved(FIFTY.to_vec())]);

    // The worker is still serving vends
    h.vend(&FIFTY);
    assert!(matches!(h.next_event().await, OutboundEvent::VendStarted(_)));
    assert_eq!(h.next_event().await, OutboundEvent::PaymentSuccess);
    assert_eq!(h.rig.cashless.responses().len(), 2);
    h.orchestrator.shutdown().await;
}
