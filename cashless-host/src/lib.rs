//! Host side of a cashless vending payment terminal.
//!
//! Bridges the cashless peripheral bus, the polled controller bus and a card
//! payment kernel, running one vend transaction at a time and publishing its
//! progress as [`cashless_icd::StatusMessage`]s.

pub mod config;
mod dispatcher;
pub mod error;
pub mod kernel;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod ports;
pub mod processor;
pub mod publisher;
pub mod serializer;
pub mod sim;
pub mod transaction;
pub mod vending_bus;

pub use config::HostConfig;
pub use error::{HostError, Result};
pub use kernel::{CardCheckReply, KernelHandles, KernelLink};
pub use monitor::CashlessMonitor;
pub use orchestrator::{Collaborators, Orchestrator};
pub use processor::SimulatedProcessor;
