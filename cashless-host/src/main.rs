use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::error;

use cashless_host::logging::init_logging;
use cashless_host::sim::SimRig;
use cashless_host::{HostConfig, Orchestrator, SimulatedProcessor};
use cashless_icd::card::{CardDetectionOutcome, MagCardInfo};
use cashless_icd::cashless_device::CashlessSignal;
use cashless_icd::StatusMessage;

const HELP: &str = "Commands: INIT, VEND <cents> [hex], CANCEL, SUCCESS, FAILURE, \
CARD MAG|CHIP <atr>|NFC <uuid>|ERR <code> <msg>, CONNECT, DISCONNECT, MDB <hex>, STATUS, QUIT";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match HostConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Bad configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config) {
        eprintln!("Could not start logging: {e}");
        return ExitCode::FAILURE;
    }

    let rig = SimRig::new();
    let orchestrator = Orchestrator::start(config, rig.collaborators(Arc::new(SimulatedProcessor::default())));

    //Print every status event as an external observer would see it
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(msg) => println!("{}", describe(&msg)),
                Err(RecvError::Lagged(n)) => println!("Missed {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    rig.kernel.connect();
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Could not read console");
                break;
            }
        };
        let parts: Vec<_> = line.split_ascii_whitespace().collect();
        let Some(command) = parts.first() else {
            continue;
        };

        match command.to_ascii_uppercase().as_str() {
            "INIT" => rig.cashless.signal(CashlessSignal::InitialComplete {
                cashless_info: Vec::new(),
                vmc_info: Vec::new(),
            }),
            "VEND" => match vend_payload(&parts[1..]) {
                Some(payload) => rig.cashless.signal(CashlessSignal::VendRequest(payload)),
                None => println!("Usage: VEND <cents> [hex]"),
            },
            "CANCEL" => rig.cashless.signal(CashlessSignal::VendCancel),
            "SUCCESS" => rig.cashless.signal(CashlessSignal::VendSuccess(Vec::new())),
            "FAILURE" => rig.cashless.signal(CashlessSignal::VendFailure(Vec::new())),
            "CARD" => match card_outcome(&parts[1..]) {
                Some(outcome) => {
                    if !rig.reader().present(outcome.clone()) {
                        println!("No card check waiting, card will answer the next one");
                        rig.reader().script(outcome);
                    }
                }
                None => println!("Usage: CARD MAG|CHIP <atr>|NFC <uuid>|ERR <code> <msg>"),
            },
            "CONNECT" => {
                if !rig.kernel.connect() {
                    println!("Kernel not bound");
                }
            }
            "DISCONNECT" => {
                if !rig.kernel.disconnect() {
                    println!("Kernel not bound");
                }
            }
            "MDB" => match parts.get(1).and_then(|hex| parse_hex(hex)) {
                Some(frame) => rig.vending.push_command(&frame),
                None => println!("Usage: MDB <hex>"),
            },
            "STATUS" => {
                println!("State: {:?}", orchestrator.state());
                println!("Card check waiting: {}", rig.reader().is_waiting());
                println!("Cashless responses: {:?}", rig.cashless.responses());
                println!("Controller answers sent: {}", rig.vending.answers().len());
            }
            "QUIT" => break,
            _ => println!("{HELP}"),
        }
    }

    //Release a pending card check so the vend in progress can finish
    rig.reader().abandon();
    orchestrator.shutdown().await;
    ExitCode::SUCCESS
}

/// One console line per event, with the postcard frame an external observer would receive
fn describe(msg: &StatusMessage) -> String {
    let mut line = format!("[{}] event {}", msg.seq, msg.event.code());
    if let Some(amount) = msg.event.amount() {
        line.push_str(&format!(" amount {amount}"));
    }
    match msg.to_frame() {
        Ok(frame) => {
            let hex: String = frame.iter().map(|b| format!("{b:02x}")).collect();
            line.push_str(&format!(" frame {hex}"));
        }
        Err(e) => error!(error = %e, "Could not encode status frame"),
    }
    line
}

fn vend_payload(args: &[&str]) -> Option<Vec<u8>> {
    let cents: u32 = args.first()?.parse().ok()?;
    let mut payload = cents.to_be_bytes().to_vec();
    if let Some(tail) = args.get(1) {
        payload.extend(parse_hex(tail)?);
    }
    Some(payload)
}

fn card_outcome(args: &[&str]) -> Option<CardDetectionOutcome> {
    match args.first()?.to_ascii_uppercase().as_str() {
        "MAG" => Some(CardDetectionOutcome::Magstripe(MagCardInfo {
            track2: args.get(1).map(|t| t.to_string()),
            ..MagCardInfo::default()
        })),
        "CHIP" => Some(CardDetectionOutcome::ChipCard(args.get(1)?.to_string())),
        "NFC" => Some(CardDetectionOutcome::ContactlessCard(args.get(1)?.to_string())),
        "ERR" => Some(CardDetectionOutcome::DetectionError {
            code: args.get(1)?.parse().ok()?,
            message: args.get(2..).map(|m| m.join(" ")).unwrap_or_default(),
        }),
        _ => None,
    }
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
