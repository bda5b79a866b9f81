#![no_main]
#![no_std]

// Self-test image for FLASH drivers. The host loads a driver image and this
// one, fills in the configuration block at `_config_table` while we sit on
// the first breakpoint, then resumes and collects `FINAL_RESULT` at the
// second one.

use core::sync::atomic::{AtomicI32, Ordering};

use flash_patcher::{
    consts::{TESTER_MAX_SECTORS, TRAP_ON_FAILURE},
    fp_log,
    run_flash_test,
    tester::{Breakpoint, ObservableState, SilentReturn, TesterConfig},
};

extern "C" {
    // Provided by memory.x, right above the initial stack
    static _config_table: u32;
}

#[no_mangle]
pub static mut OBSERVABLE_STATE: ObservableState = ObservableState::new();

#[no_mangle]
pub static FINAL_RESULT: AtomicI32 = AtomicI32::new(0);

#[cortex_m_rt::entry]
fn main() -> ! {
    cortex_m::interrupt::disable();

    // Host writes the configuration block now
    cortex_m::asm::bkpt();

    let config = unsafe {
        let addr = &_config_table as *const u32 as usize;
        &*(addr as *const TesterConfig<TESTER_MAX_SECTORS>)
    };
    let plan = config.plan();
    let mut driver = config.driver();
    fp_log!(info, "testing {=usize} sectors", plan.sectors.len());

    // Only this function ever touches it, the debugger just reads
    let state = unsafe { &mut *core::ptr::addr_of_mut!(OBSERVABLE_STATE) };

    let result = if TRAP_ON_FAILURE {
        run_flash_test(&mut driver, &plan, state, &mut Breakpoint)
    } else {
        run_flash_test(&mut driver, &plan, state, &mut SilentReturn)
    };

    FINAL_RESULT.store(result, Ordering::SeqCst);
    fp_log!(info, "flash test finished: {=i32}", result);

    flash_patcher::exit()
}
