//! The command loop agent.
//!
//! Initializes the driver once, then executes commands from the shared
//! buffer until `End` or the first failure. Every failure is final: the
//! status word gets the code and the loop returns, leaving the controller
//! alone. The host has to restart the agent to try again.

use crate::{
    command::{Command, ProgramHeader},
    consts::MAX_BURST_WORDS,
    driver::FlashDriver,
    error::{status_of, PatchError},
    ring::{ByteSource, SharedBuffer},
};

/// Runs one session against `buffer` and returns the final status, which is
/// also left in the buffer's status word.
pub fn run_request_loop<D: FlashDriver, const N: usize>(buffer: &SharedBuffer<N>, driver: &mut D) -> i32 {
    let mut reader = buffer.reader();

    let status = match serve(&mut reader, driver, || buffer.count_request()) {
        Ok(()) => {
            fp_log!(info, "session complete, {=u32} requests", buffer.requests_processed());
            0
        }
        Err(e) => {
            fp_log!(error, "session aborted: {:?}", e);
            e.code()
        }
    };

    buffer.set_status(status);
    status
}

/// The loop itself. `processed` is called once per successfully executed
/// command, `End` included.
pub fn serve<S, D, F>(src: &mut S, driver: &mut D, mut processed: F) -> Result<(), PatchError>
where
    S: ByteSource,
    D: FlashDriver,
    F: FnMut(),
{
    driver.init()?;

    loop {
        match Command::read(src)? {
            Command::EraseSector { bank, first, count } => {
                fp_log!(debug, "erase {=u32}:{=u32} x{=u32}", bank, first, count);
                driver.erase_sectors(bank, first, count)?;
            }
            Command::ProgramWords(header) => {
                fp_log!(debug, "program {=u32:X}, {=u32} words", header.address, header.total);
                program(src, driver, &header)?;
            }
            Command::FlushCache => {
                driver.complete()?;
            }
            Command::End => {
                driver.complete()?;
                processed();
                return Ok(());
            }
        }

        processed();
    }
}

/// Streams the data words of one `ProgramWords` command into the driver,
/// `burst` words per call.
fn program<S, D>(src: &mut S, driver: &mut D, header: &ProgramHeader) -> Result<(), PatchError>
where
    S: ByteSource,
    D: FlashDriver,
{
    header.validate()?;

    let burst = header.burst as usize;
    let step = header.burst * 4;
    let mut words = [0u32; MAX_BURST_WORDS];
    let mut addr = header.address;

    for _ in 0..(header.total / header.burst) {
        words[..burst].iter_mut().for_each(|w| *w = src.read_word());
        driver.program_words(header.bank, addr, &words[..burst])?;
        addr = addr.wrapping_add(step);
    }

    if header.repeat > 0 {
        driver.program_repeated_words(header.bank, addr, &words[..burst], header.repeat)?;
    }

    Ok(())
}

// Synchronous entry points. A host that doesn't want to stream can call
// these one at a time, each returns the signed status.

pub fn sync_init<D: FlashDriver>(driver: &mut D) -> i32 {
    status_of(driver.init())
}

pub fn sync_erase_sectors<D: FlashDriver>(driver: &mut D, bank: u32, first: u32, count: u32) -> i32 {
    status_of(driver.erase_sectors(bank, first, count))
}

/// # Safety
///
/// `words` must point to `count` readable words.
pub unsafe fn sync_program_words<D: FlashDriver>(
    driver: &mut D,
    bank: u32,
    address: u32,
    words: *const u32,
    count: u32,
) -> i32 {
    let words = core::slice::from_raw_parts(words, count as usize);
    status_of(driver.program_words(bank, address, words))
}

/// # Safety
///
/// `pattern` must point to `pattern_words` readable words.
pub unsafe fn sync_program_repeated_words<D: FlashDriver>(
    driver: &mut D,
    bank: u32,
    address: u32,
    pattern: *const u32,
    pattern_words: u32,
    total_words: u32,
) -> i32 {
    let pattern = core::slice::from_raw_parts(pattern, pattern_words as usize);
    status_of(driver.program_repeated_words(bank, address, pattern, total_words))
}

pub fn sync_complete<D: FlashDriver>(driver: &mut D) -> i32 {
    status_of(driver.complete())
}
