use core::num::NonZeroI32;

use crate::consts::{
    STATUS_INCOMPLETE_REPEAT,
    STATUS_INVALID_BURST,
    STATUS_MISALIGNED_WORD_COUNT,
    STATUS_UNKNOWN_COMMAND,
};

/// A raw, nonzero status code as returned by a FLASH driver.
///
/// Vendor codes are kept as-is so the host can look them up in the
/// vendor documentation.
pub type ErrorCode = NonZeroI32;

/// Everything that can end a patching session early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum PatchError {
    /// The family driver reported a failure.
    Driver(ErrorCode),
    /// The host sent a tag byte we don't know.
    UnknownCommand(u8),
    /// Burst size is zero, larger than our local buffer, or doesn't divide
    /// the total word count.
    InvalidBurst { burst: u32, total: u32 },
    /// Word count is not a multiple of the programming granularity.
    MisalignedWordCount,
    /// Repeated-word total is not a whole number of patterns.
    IncompleteRepeat,
}

impl PatchError {
    /// The value written to the status word.
    pub fn code(&self) -> i32 {
        match self {
            PatchError::Driver(code) => code.get(),
            PatchError::UnknownCommand(_) => STATUS_UNKNOWN_COMMAND,
            PatchError::InvalidBurst { .. } => STATUS_INVALID_BURST,
            PatchError::MisalignedWordCount => STATUS_MISALIGNED_WORD_COUNT,
            PatchError::IncompleteRepeat => STATUS_INCOMPLETE_REPEAT,
        }
    }
}

impl From<ErrorCode> for PatchError {
    fn from(code: ErrorCode) -> Self {
        match code.get() {
            STATUS_MISALIGNED_WORD_COUNT => PatchError::MisalignedWordCount,
            STATUS_INCOMPLETE_REPEAT => PatchError::IncompleteRepeat,
            _ => PatchError::Driver(code),
        }
    }
}

/// Builds an [`ErrorCode`] from a constant we know is nonzero.
pub(crate) const fn code(raw: i32) -> ErrorCode {
    match NonZeroI32::new(raw) {
        Some(code) => code,
        None => panic!("status code must be nonzero"),
    }
}

/// Flattens a driver result into the signed status convention (0 = ok).
pub fn status_of(result: Result<(), ErrorCode>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(code) => code.get(),
    }
}
