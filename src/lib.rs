#![cfg_attr(not(test), no_std)]

#[macro_use] pub mod log;
pub mod consts;
pub mod error;
pub mod driver;
pub mod drivers;
pub mod ring;
pub mod command;
pub mod agent;
pub mod header;
pub mod tester;

pub use crate::{
    agent::run_request_loop,
    driver::FlashDriver,
    error::{ErrorCode, PatchError},
    ring::SharedBuffer,
    tester::{run_flash_test, TestPlan, TestedSector},
};

#[cfg(feature = "defmt-log")]
mod defmt {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use defmt_rtt as _; // global logger
    use panic_probe as _;

    // same panicking *behavior* as `panic-probe` but doesn't print a panic message
    // this prevents the panic message being printed *twice* when `defmt::panic` is invoked
    #[defmt::panic_handler]
    fn panic() -> ! {
        cortex_m::asm::udf()
    }

    static COUNT: AtomicUsize = AtomicUsize::new(0);

    defmt::timestamp!("{=usize}", {
        // NOTE(no-CAS) `timestamps` runs with interrupts disabled
        let n = COUNT.load(Ordering::Relaxed);
        COUNT.store(n + 1, Ordering::Relaxed);
        n
    });
}

#[cfg(all(feature = "firmware", not(feature = "defmt-log")))]
use panic_reset as _;

/// Parks the core on a breakpoint for the debugger to pick up the result.
pub fn exit() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}
