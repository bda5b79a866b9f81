//! A driver assembled from C ABI entry points the debug host hands us, as
//! found in the self-test configuration block. This lets the self-test image
//! exercise a driver built into a completely different image.

use core::num::NonZeroI32;

use crate::{driver::FlashDriver, error::ErrorCode};

pub type InitFn = unsafe extern "C" fn() -> i32;
pub type EraseSectorsFn = unsafe extern "C" fn(bank: u32, first: u32, count: u32) -> i32;
pub type ProgramWordsFn =
    unsafe extern "C" fn(bank: u32, address: u32, words: *const u32, count: u32) -> i32;
pub type CompleteFn = unsafe extern "C" fn() -> i32;

#[derive(Clone, Copy)]
pub struct TableDriver {
    pub init: InitFn,
    pub erase_sectors: EraseSectorsFn,
    pub program_words: ProgramWordsFn,
    pub complete: CompleteFn,
    /// Words per programming operation the foreign driver expects.
    pub granularity: usize,
}

fn result_of(status: i32) -> Result<(), ErrorCode> {
    match NonZeroI32::new(status) {
        None => Ok(()),
        Some(code) => Err(code),
    }
}

impl FlashDriver for TableDriver {
    fn granularity(&self) -> usize {
        self.granularity
    }

    fn init(&mut self) -> Result<(), ErrorCode> {
        result_of(unsafe { (self.init)() })
    }

    fn erase_sectors(&mut self, bank: u32, first: u32, count: u32) -> Result<(), ErrorCode> {
        result_of(unsafe { (self.erase_sectors)(bank, first, count) })
    }

    fn program_unit(&mut self, bank: u32, address: u32, words: &[u32]) -> Result<(), ErrorCode> {
        result_of(unsafe { (self.program_words)(bank, address, words.as_ptr(), words.len() as u32) })
    }

    // The foreign entry point splits into units itself, hand it the whole run
    fn program_words(&mut self, bank: u32, address: u32, words: &[u32]) -> Result<(), ErrorCode> {
        if self.granularity == 0 || words.len() % self.granularity != 0 {
            return Err(crate::driver::MISALIGNED_WORD_COUNT);
        }
        self.program_unit(bank, address, words)
    }

    fn complete(&mut self) -> Result<(), ErrorCode> {
        result_of(unsafe { (self.complete)() })
    }

    fn read_word(&self, address: u32) -> u32 {
        unsafe { core::ptr::read_volatile(address as *const u32) }
    }
}
