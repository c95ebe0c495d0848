use thiserror::Error;

/// Mode bit OR'd into a saved trap code when the fault was raised from user
/// mode, so the handler can recognize the originating ring.
pub const USER: u32 = 16;

/// Processor fault taxonomy.
///
/// The numeric codes are architectural: they are what the guest handler
/// reads from its stack after trap delivery. [`Fault::Timer`] and
/// [`Fault::Keybd`] double as bit positions in the pending-interrupt mask,
/// which is why they occupy the two power-of-two slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum Fault {
    /// Physical address outside the configured memory.
    #[error("bad physical address")]
    Mem = 0,
    /// Timer interrupt.
    #[error("timer interrupt")]
    Timer = 1,
    /// Keyboard interrupt.
    #[error("keyboard interrupt")]
    Keybd = 2,
    /// Privileged instruction dispatched in user mode.
    #[error("privileged instruction in user mode")]
    Priv = 3,
    /// Illegal or unknown opcode.
    #[error("illegal instruction")]
    Inst = 4,
    /// Software trap (`TRAP` opcode).
    #[error("software trap")]
    Sys = 5,
    /// Arithmetic fault (integer divide or modulus by zero, float divide
    /// by zero).
    #[error("arithmetic fault")]
    Arith = 6,
    /// Page fault on instruction fetch.
    #[error("page fault on instruction fetch")]
    IPage = 7,
    /// Page fault on write.
    #[error("page fault on write")]
    WPage = 8,
    /// Page fault on read.
    #[error("page fault on read")]
    RPage = 9,
}

impl Fault {
    /// Returns the architectural trap code for this fault.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Converts a trap code (without the [`USER`] bit) back into a fault.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Mem),
            1 => Some(Self::Timer),
            2 => Some(Self::Keybd),
            3 => Some(Self::Priv),
            4 => Some(Self::Inst),
            5 => Some(Self::Sys),
            6 => Some(Self::Arith),
            7 => Some(Self::IPage),
            8 => Some(Self::WPage),
            9 => Some(Self::RPage),
            _ => None,
        }
    }

    /// True for the asynchronous interrupt sources that can sit in the
    /// pending mask; their codes are their mask bits.
    #[must_use]
    pub const fn is_interrupt(self) -> bool {
        matches!(self, Self::Timer | Self::Keybd)
    }
}
