//! STM32G0 internal FLASH: single bank, 2 KiB pages, programmed one double
//! word at a time.

use stm32g0xx_hal::{
    flash::{Error as FlashError, FlashPage, UnlockedFlash, WriteErase},
    prelude::*,
    stm32::FLASH,
};

use crate::{
    driver::FlashDriver,
    error::{code, ErrorCode},
};

// FLASH_SR / FLASH_ACR bits the HAL doesn't give us access to
const SR_BSY1: u32 = 1 << 16;
const ACR_ICEN: u32 = 1 << 9;
const ACR_ICRST: u32 = 1 << 11;

pub const UNLOCK_FAILED: ErrorCode = code(1);
pub const BUSY: ErrorCode = code(2);
pub const ILLEGAL: ErrorCode = code(3);
pub const ECC_ERROR: ErrorCode = code(4);
pub const PAGE_OUT_OF_RANGE: ErrorCode = code(5);
pub const FAILURE: ErrorCode = code(6);

enum State {
    Locked(FLASH),
    Unlocked(UnlockedFlash),
    // Only seen while switching between the two above
    Switching,
}

pub struct Stm32g0Flash {
    state: State,
}

impl Stm32g0Flash {
    pub fn new(flash: FLASH) -> Self {
        Self {
            state: State::Locked(flash),
        }
    }

    fn unlocked(&mut self) -> Result<&mut UnlockedFlash, ErrorCode> {
        match &mut self.state {
            State::Unlocked(ulf) => Ok(ulf),
            _ => {
                fp_log!(error, "FLASH used before init!");
                Err(UNLOCK_FAILED)
            }
        }
    }

    fn wait_ready() {
        let regs = unsafe { &*FLASH::ptr() };
        while regs.sr.read().bits() & SR_BSY1 != 0 {}
    }
}

fn error_code(e: FlashError) -> ErrorCode {
    match e {
        FlashError::Busy => BUSY,
        FlashError::Illegal => ILLEGAL,
        FlashError::EccError => ECC_ERROR,
        FlashError::PageOutOfRange => PAGE_OUT_OF_RANGE,
        FlashError::Failure => FAILURE,
    }
}

impl FlashDriver for Stm32g0Flash {
    fn granularity(&self) -> usize {
        2
    }

    fn init(&mut self) -> Result<(), ErrorCode> {
        let state = core::mem::replace(&mut self.state, State::Switching);
        self.state = match state {
            State::Locked(flash) => match flash.unlock() {
                Ok(ulf) => {
                    fp_log!(info, "unlocked.");
                    State::Unlocked(ulf)
                }
                Err(flash) => {
                    fp_log!(error, "Unlock failed!");
                    self.state = State::Locked(flash);
                    return Err(UNLOCK_FAILED);
                }
            },
            // Writing the keys again would lock the controller until reset
            other => other,
        };

        Self::wait_ready();
        Ok(())
    }

    fn erase_sectors(&mut self, _bank: u32, first: u32, count: u32) -> Result<(), ErrorCode> {
        let ulf = self.unlocked()?;

        for page in first..first.saturating_add(count) {
            fp_log!(info, "erasing page {=u32}...", page);
            ulf.erase_page(FlashPage(page as usize)).map_err(|e| {
                fp_log!(error, "Erase failed!");
                error_code(e)
            })?;
        }

        Ok(())
    }

    fn program_unit(&mut self, _bank: u32, address: u32, words: &[u32]) -> Result<(), ErrorCode> {
        if words.len() != 2 {
            return Err(crate::driver::MISALIGNED_WORD_COUNT);
        }

        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&words[0].to_le_bytes());
        bytes[4..].copy_from_slice(&words[1].to_le_bytes());

        self.unlocked()?
            .write(address as usize, &bytes)
            .map_err(|e| {
                fp_log!(error, "Write failed at {=u32:X}", address);
                error_code(e)
            })
    }

    fn complete(&mut self) -> Result<(), ErrorCode> {
        let regs = unsafe { &*FLASH::ptr() };

        // The instruction cache can only be reset while it is disabled
        let acr = regs.acr.read().bits();
        regs.acr.write(|w| unsafe { w.bits(acr & !ACR_ICEN) });
        regs.acr.write(|w| unsafe { w.bits((acr & !ACR_ICEN) | ACR_ICRST) });
        regs.acr.write(|w| unsafe { w.bits(acr & !ACR_ICRST) });

        Ok(())
    }

    fn read_word(&self, address: u32) -> u32 {
        unsafe { core::ptr::read_volatile(address as *const u32) }
    }
}
