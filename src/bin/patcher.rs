#![no_main]
#![no_std]
#![allow(non_snake_case)]

// Patcher agent image. The debug host loads this into SRAM, finds
// `AGENT_HEADER`, points SP at the agent stack and either calls the entry
// point to stream commands through `REQUEST_BUFFER`, or drives the
// `FLASHPatcher_*` functions one at a time.

use core::cell::{RefCell, UnsafeCell};

use cortex_m::interrupt::{self, Mutex};
use flash_patcher::{
    agent,
    consts::{AGENT_STACK_SIZE, HEADER_SIGNATURE, REQUEST_BUFFER_SIZE},
    fp_log,
    header::AgentHeader,
    ring::SharedBuffer,
};

#[cfg(feature = "skip-flash")]
use flash_patcher::drivers::sim::SimulatedFlash;
#[cfg(not(feature = "skip-flash"))]
use flash_patcher::drivers::stm32g0::Stm32g0Flash;
#[cfg(not(feature = "skip-flash"))]
use stm32g0xx_hal::stm32;

#[cfg(not(feature = "skip-flash"))]
type Driver = Stm32g0Flash;

// Small RAM-backed stand-in, the real part has 8 KiB of SRAM to share.
#[cfg(feature = "skip-flash")]
type Driver = SimulatedFlash<128, 2>;

/// Returned when the FLASH peripheral has already been taken by someone else.
const NO_DRIVER: i32 = -1;

#[no_mangle]
pub static REQUEST_BUFFER: SharedBuffer<REQUEST_BUFFER_SIZE> = SharedBuffer::new();

#[repr(C, align(8))]
pub struct AgentStack(UnsafeCell<[u8; AGENT_STACK_SIZE]>);

// Only ever touched through SP, never from Rust
unsafe impl Sync for AgentStack {}

static AGENT_STACK: AgentStack = AgentStack(UnsafeCell::new([0; AGENT_STACK_SIZE]));

#[link_section = ".headers"]
#[used]
#[no_mangle]
pub static AGENT_HEADER: AgentHeader = AgentHeader {
    signature: HEADER_SIGNATURE,
    load_address: &AGENT_HEADER,
    entry_point: FLASHPatcher_RunRequestLoop,
    data_buffer: &REQUEST_BUFFER as *const SharedBuffer<REQUEST_BUFFER_SIZE> as *const u8,
    data_buffer_size: core::mem::size_of::<SharedBuffer<REQUEST_BUFFER_SIZE>>() as u32,
    stack: &AGENT_STACK as *const AgentStack as *const u8,
    stack_size: AGENT_STACK_SIZE as u32,
};

static DRIVER: Mutex<RefCell<Option<Driver>>> = Mutex::new(RefCell::new(None));

#[cfg(not(feature = "skip-flash"))]
fn new_driver() -> Option<Driver> {
    stm32::Peripherals::take().map(|board| Stm32g0Flash::new(board.FLASH))
}

#[cfg(feature = "skip-flash")]
fn new_driver() -> Option<Driver> {
    Some(SimulatedFlash::new(0x0800_0000, 64))
}

/// Runs `f` on the driver with interrupts masked, creating the driver on
/// first use.
fn with_driver<F>(f: F) -> i32
where
    F: FnOnce(&mut Driver) -> i32,
{
    interrupt::free(|cs| {
        let mut slot = DRIVER.borrow(cs).borrow_mut();
        if slot.is_none() {
            *slot = new_driver();
        }
        match slot.as_mut() {
            Some(driver) => f(driver),
            None => {
                fp_log!(error, "FLASH peripheral unavailable");
                NO_DRIVER
            }
        }
    })
}

#[no_mangle]
pub extern "C" fn FLASHPatcher_Init() -> i32 {
    with_driver(agent::sync_init)
}

#[no_mangle]
pub extern "C" fn FLASHPatcher_EraseSectors(bank: u32, first: u32, count: u32) -> i32 {
    with_driver(|d| agent::sync_erase_sectors(d, bank, first, count))
}

/// # Safety
///
/// `words` must point to `count` readable words.
#[no_mangle]
pub unsafe extern "C" fn FLASHPatcher_ProgramWords(
    bank: u32,
    address: u32,
    words: *const u32,
    count: u32,
) -> i32 {
    with_driver(|d| agent::sync_program_words(d, bank, address, words, count))
}

/// # Safety
///
/// `pattern` must point to `pattern_words` readable words.
#[no_mangle]
pub unsafe extern "C" fn FLASHPatcher_ProgramRepeatedWords(
    bank: u32,
    address: u32,
    pattern: *const u32,
    pattern_words: u32,
    total_words: u32,
) -> i32 {
    with_driver(|d| agent::sync_program_repeated_words(d, bank, address, pattern, pattern_words, total_words))
}

#[no_mangle]
pub extern "C" fn FLASHPatcher_Complete() -> i32 {
    with_driver(agent::sync_complete)
}

#[no_mangle]
pub extern "C" fn FLASHPatcher_RunRequestLoop() -> i32 {
    with_driver(|d| agent::run_request_loop(&REQUEST_BUFFER, d))
}

#[cortex_m_rt::entry]
fn main() -> ! {
    // Every pointer in the header is absolute, a relocated image can't work
    if !(AGENT_HEADER.is_valid() && AGENT_HEADER.is_at_load_address()) {
        fp_log!(error, "agent header does not match the load address");
        flash_patcher::exit()
    }

    fp_log!(
        info,
        "patcher agent up, {=usize} byte buffer at {=u32:X}",
        REQUEST_BUFFER.capacity(),
        &REQUEST_BUFFER as *const _ as u32
    );

    // Only reached when the host resets into the image instead of calling
    // the entry point directly
    let _ = FLASHPatcher_RunRequestLoop();
    flash_patcher::exit()
}
