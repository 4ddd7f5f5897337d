//Frames exchanged with the vending machine controller when acting as an MDB slave

pub const COMMAND_FRAME_LEN: usize = 256;

/// Receive buffer for one controller command
pub type CommandFrame = [u8; COMMAND_FRAME_LEN];

/// Status sent back for every received command.
/// The command content is not inspected before acknowledging.
pub const ANSWER_ACK: u8 = 0;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum PollOutcome {
    CommandReceived,
    NoCommand,
}

pub const fn empty_frame() -> CommandFrame {
    [0u8; COMMAND_FRAME_LEN]
}
