//! The family FLASH driver interface.
//!
//! Exactly one implementation is compiled into a firmware image. The agent and
//! the self-test harness are generic over it, so everything is statically
//! dispatched.
//!
//! Lifecycle: `init` unlocks the controller and may be called again at any
//! point. After that, `erase_sectors` and `program_*` can be called any number
//! of times. `complete` flushes whatever caches sit between the CPU and FLASH,
//! so reads afterwards see the new contents.

use crate::{
    consts::ADDR_HASH_MULTIPLIER,
    consts::{STATUS_INCOMPLETE_REPEAT, STATUS_MISALIGNED_WORD_COUNT},
    error::{code, ErrorCode},
};

pub const MISALIGNED_WORD_COUNT: ErrorCode = code(STATUS_MISALIGNED_WORD_COUNT);
pub const INCOMPLETE_REPEAT: ErrorCode = code(STATUS_INCOMPLETE_REPEAT);

pub trait FlashDriver {
    /// Number of 32-bit words the controller programs in one operation
    /// (1, 2, 4 or 8).
    fn granularity(&self) -> usize;

    /// Unlocks the controller for writing and waits for any operation in
    /// flight on all banks. Idempotent.
    fn init(&mut self) -> Result<(), ErrorCode>;

    /// Erases `count` consecutive erase units starting at `first`.
    ///
    /// `bank` is ignored by single-bank families.
    fn erase_sectors(&mut self, bank: u32, first: u32, count: u32) -> Result<(), ErrorCode>;

    /// Programs exactly one granularity unit (`words.len() == granularity()`)
    /// at `address`.
    fn program_unit(&mut self, bank: u32, address: u32, words: &[u32]) -> Result<(), ErrorCode>;

    /// Flushes caches so newly programmed bytes are visible. Families
    /// without a cache have nothing to do here.
    fn complete(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }

    /// Reads one word of FLASH as the CPU currently sees it.
    fn read_word(&self, address: u32) -> u32;

    /// Programs `words` starting at `address`, one unit at a time.
    ///
    /// The word count must be a whole number of units. Otherwise nothing is
    /// written and [`MISALIGNED_WORD_COUNT`] is returned. Stops at the first
    /// failing unit and returns its code.
    fn program_words(&mut self, bank: u32, address: u32, words: &[u32]) -> Result<(), ErrorCode> {
        let unit = self.granularity();
        if unit == 0 || words.len() % unit != 0 {
            return Err(MISALIGNED_WORD_COUNT);
        }

        let mut addr = address;
        for chunk in words.chunks_exact(unit) {
            self.program_unit(bank, addr, chunk)?;
            addr = addr.wrapping_add((unit * 4) as u32);
        }

        Ok(())
    }

    /// Programs `pattern` back to back until `total_words` words are written.
    ///
    /// Used to fill the tail of a region with a fixed value without sending
    /// it over the wire again.
    fn program_repeated_words(
        &mut self,
        bank: u32,
        address: u32,
        pattern: &[u32],
        total_words: u32,
    ) -> Result<(), ErrorCode> {
        if total_words == 0 {
            return Ok(());
        }

        let unit = self.granularity();
        if pattern.is_empty() {
            return Err(INCOMPLETE_REPEAT);
        }
        if unit == 0 || pattern.len() % unit != 0 {
            return Err(MISALIGNED_WORD_COUNT);
        }
        if total_words as usize % pattern.len() != 0 {
            return Err(INCOMPLETE_REPEAT);
        }

        let step = (pattern.len() * 4) as u32;
        let mut addr = address;
        for _ in 0..(total_words as usize / pattern.len()) {
            self.program_words(bank, addr, pattern)?;
            addr = addr.wrapping_add(step);
        }

        Ok(())
    }
}

/// Expected content of `addr` in the harness's pattern pass. Cheap, and
/// different for every word address.
#[inline]
pub fn word_from_addr(addr: u32) -> u32 {
    addr.wrapping_mul(ADDR_HASH_MULTIPLIER)
}
