//! Self-test harness for family FLASH drivers.
//!
//! Erases, fills and re-programs the configured sectors on real FLASH and
//! checks that every operation hit exactly the words it should have. There is
//! nobody to print to, so the outcome is a single signed number:
//!
//! | code | failed check                                                     |
//! |------|------------------------------------------------------------------|
//! |   0  | none, all phases passed                                          |
//! | -10  | init, or erasing one of the sectors                              |
//! | -20  | programming the filler, the read-back of every word right after  |
//! |      | it, or a region that is not a whole number of bursts             |
//! | -30  | full sweep: some word in the region is not the filler            |
//! | -40  | per-sector init or erase                                         |
//! | -41  | a word inside the erased sector is not the erased value          |
//! | -42  | erasing the sector changed a word outside of it                  |
//! | -43  | per-sector init or programming the address pattern               |
//! | -44  | a word inside the sector doesn't hold its address pattern        |
//! | -45  | programming the sector changed a word outside of it              |
//!
//! [`ObservableState`] is updated before every risky step, so if the target
//! traps the debugger can still tell where it was.

use crate::{
    consts::{FILLER_WORD, MAX_BURST_WORDS},
    driver::{word_from_addr, FlashDriver},
    drivers::table::{CompleteFn, EraseSectorsFn, InitFn, ProgramWordsFn, TableDriver},
};

pub const PHASE_GLOBAL_ERASE: i32 = 10;
pub const PHASE_FILL: i32 = 20;
pub const PHASE_SWEEP: i32 = 30;
pub const PHASE_SECTORS: i32 = 40;
pub const PHASE_DONE: i32 = 50;

pub const SUB_ERASE: i32 = 0;
pub const SUB_ERASED_INSIDE: i32 = 1;
pub const SUB_ERASED_OUTSIDE: i32 = 2;
pub const SUB_PROGRAM: i32 = 3;
pub const SUB_PATTERN_INSIDE: i32 = 4;
pub const SUB_PATTERN_OUTSIDE: i32 = 5;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct TestedSector {
    pub bank: u32,
    pub id: u32,
    pub start: u32,
    pub size: u32,
}

impl TestedSector {
    pub fn end(&self) -> u32 {
        self.start.wrapping_add(self.size)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end()
    }
}

/// What to test. Sectors must lie inside `[global_start, global_end)` and
/// must not overlap; this is not checked.
#[derive(Debug, Clone, Copy)]
pub struct TestPlan<'a> {
    pub global_start: u32,
    pub global_end: u32,
    pub erased_value: u32,
    pub sectors: &'a [TestedSector],
}

impl<'a> TestPlan<'a> {
    /// Splits the region into runs of words that are treated alike. Returns
    /// the tested sector holding `address`, if any, and where the run ends.
    ///
    /// One pass over the sectors per run, so walking the whole region costs
    /// O(words + sectors^2) instead of a sector search per word.
    fn run_at(&self, address: u32) -> (Option<usize>, u32) {
        let mut end = self.global_end;
        for (i, sector) in self.sectors.iter().enumerate() {
            if sector.contains(address) {
                return (Some(i), sector.end().min(self.global_end));
            }
            if sector.start > address && sector.start < end {
                end = sector.start;
            }
        }
        (None, end)
    }
}

/// Configuration block the host writes before starting the self-test image.
///
/// Layout is part of the host contract.
#[repr(C)]
pub struct TesterConfig<const N: usize> {
    pub init: InitFn,
    pub erase_sectors: EraseSectorsFn,
    pub program_words: ProgramWordsFn,
    pub complete: CompleteFn,
    pub sector_count: u32,
    pub global_start: u32,
    pub global_end: u32,
    pub erased_value: u32,
    pub burst_words: u32,
    pub sectors: [TestedSector; N],
}

impl<const N: usize> TesterConfig<N> {
    pub fn plan(&self) -> TestPlan<'_> {
        let count = (self.sector_count as usize).min(N);
        TestPlan {
            global_start: self.global_start,
            global_end: self.global_end,
            erased_value: self.erased_value,
            sectors: &self.sectors[..count],
        }
    }

    pub fn driver(&self) -> TableDriver {
        TableDriver {
            init: self.init,
            erase_sectors: self.erase_sectors,
            program_words: self.program_words,
            complete: self.complete,
            granularity: self.burst_words as usize,
        }
    }
}

/// Progress markers for the debugger. Every store is volatile so it lands
/// in memory before the next FLASH operation starts.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ObservableState {
    phase: i32,
    sub_phase: i32,
    address: u32,
    sector: u32,
}

fn store<T: Copy>(field: &mut T, value: T) {
    unsafe { core::ptr::write_volatile(field, value) }
}

fn load<T: Copy>(field: &T) -> T {
    unsafe { core::ptr::read_volatile(field) }
}

impl ObservableState {
    pub const fn new() -> Self {
        Self {
            phase: 0,
            sub_phase: 0,
            address: 0,
            sector: 0,
        }
    }

    pub fn phase(&self) -> i32 {
        load(&self.phase)
    }

    pub fn sub_phase(&self) -> i32 {
        load(&self.sub_phase)
    }

    pub fn address(&self) -> u32 {
        load(&self.address)
    }

    pub fn sector(&self) -> u32 {
        load(&self.sector)
    }

    fn enter_phase(&mut self, phase: i32) {
        store(&mut self.phase, phase);
        store(&mut self.sub_phase, 0);
    }

    fn set_sub_phase(&mut self, sub_phase: i32) {
        store(&mut self.sub_phase, sub_phase);
    }

    fn set_address(&mut self, address: u32) {
        store(&mut self.address, address);
    }

    fn set_sector(&mut self, sector: u32) {
        store(&mut self.sector, sector);
    }
}

/// Called once with the failure code, right before the harness returns it.
pub trait FaultHook {
    fn on_failure(&mut self, code: i32);
}

/// Stops on a breakpoint at the failing check, for a human at the debugger.
pub struct Breakpoint;

impl FaultHook for Breakpoint {
    fn on_failure(&mut self, code: i32) {
        fp_log!(error, "flash test failed: {=i32}", code);
        cortex_m::asm::bkpt();
    }
}

/// Just returns the code.
pub struct SilentReturn;

impl FaultHook for SilentReturn {
    fn on_failure(&mut self, code: i32) {
        fp_log!(warn, "flash test failed: {=i32}", code);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct TestFailure {
    pub phase: i32,
    pub sub_phase: i32,
}

impl TestFailure {
    pub fn code(&self) -> i32 {
        -(self.phase + self.sub_phase)
    }
}

/// Runs every phase against `driver` and returns 0 or the failure code.
pub fn run_flash_test<D, H>(
    driver: &mut D,
    plan: &TestPlan<'_>,
    state: &mut ObservableState,
    hook: &mut H,
) -> i32
where
    D: FlashDriver,
    H: FaultHook,
{
    let mut test = FlashTest { driver, plan, state, hook };
    match test.run() {
        Ok(()) => 0,
        Err(failure) => failure.code(),
    }
}

struct FlashTest<'a, 'p, D, H> {
    driver: &'a mut D,
    plan: &'a TestPlan<'p>,
    state: &'a mut ObservableState,
    hook: &'a mut H,
}

impl<'a, 'p, D: FlashDriver, H: FaultHook> FlashTest<'a, 'p, D, H> {
    fn run(&mut self) -> Result<(), TestFailure> {
        self.state.enter_phase(PHASE_GLOBAL_ERASE);
        self.state.set_address(0);
        self.state.set_sector(0);
        self.global_erase()?;

        self.state.enter_phase(PHASE_FILL);
        self.global_fill()?;

        self.state.enter_phase(PHASE_SWEEP);
        self.sweep()?;

        self.state.enter_phase(PHASE_SECTORS);
        for index in 0..self.plan.sectors.len() {
            self.sector_isolation(index)?;
        }

        self.state.enter_phase(PHASE_DONE);
        fp_log!(info, "flash test passed");
        Ok(())
    }

    fn fail(&mut self) -> TestFailure {
        let failure = TestFailure {
            phase: self.state.phase(),
            sub_phase: self.state.sub_phase(),
        };
        self.hook.on_failure(failure.code());
        failure
    }

    fn check<T, E>(&mut self, result: Result<T, E>) -> Result<T, TestFailure> {
        result.map_err(|_| self.fail())
    }

    fn expect_word(&mut self, address: u32, expected: u32) -> Result<(), TestFailure> {
        // A bad cell can fault on read, so mark it first
        self.state.set_address(address);
        let word = self.driver.read_word(address);
        if word != expected {
            fp_log!(error, "{=u32:X}: got {=u32:X}, expected {=u32:X}", address, word, expected);
            return Err(self.fail());
        }
        Ok(())
    }

    fn burst(&mut self) -> Result<usize, TestFailure> {
        let burst = self.driver.granularity();
        if burst == 0 || burst > MAX_BURST_WORDS {
            return Err(self.fail());
        }
        Ok(burst)
    }

    fn global_erase(&mut self) -> Result<(), TestFailure> {
        let init = self.driver.init();
        self.check(init)?;

        let plan = self.plan;
        for (i, sector) in plan.sectors.iter().enumerate() {
            self.state.set_sector(i as u32);
            let erased = self.driver.erase_sectors(sector.bank, sector.id, 1);
            self.check(erased)?;
        }

        Ok(())
    }

    fn global_fill(&mut self) -> Result<(), TestFailure> {
        let burst = self.burst()?;
        let step = (burst * 4) as u32;
        let filler = [FILLER_WORD; MAX_BURST_WORDS];
        let plan = self.plan;

        // The last burst would run past the end of the region
        if plan.global_end.wrapping_sub(plan.global_start) % step != 0 {
            fp_log!(error, "region is not a whole number of {=u32} byte bursts", step);
            return Err(self.fail());
        }

        let mut addr = plan.global_start;
        let (mut sector, mut run_end) = plan.run_at(addr);
        while addr < plan.global_end {
            if addr >= run_end {
                let (next, end) = plan.run_at(addr);
                sector = next;
                run_end = end;
            }
            let bank = sector.map(|i| plan.sectors[i].bank).unwrap_or(0);

            self.state.set_address(addr);
            let programmed = self.driver.program_words(bank, addr, &filler[..burst]);
            self.check(programmed)?;
            addr = addr.wrapping_add(step);
        }

        let completed = self.driver.complete();
        self.check(completed)?;

        for addr in (plan.global_start..plan.global_end).step_by(4) {
            self.expect_word(addr, FILLER_WORD)?;
        }

        Ok(())
    }

    fn sweep(&mut self) -> Result<(), TestFailure> {
        let plan = self.plan;
        for addr in (plan.global_start..plan.global_end).step_by(4) {
            self.expect_word(addr, FILLER_WORD)?;
        }
        Ok(())
    }

    /// Every word of the region outside of sector `skip` must hold what the
    /// earlier phases left there: the address pattern in the first `done`
    /// sectors, the filler everywhere else.
    fn check_outside(&mut self, skip: usize, done: usize) -> Result<(), TestFailure> {
        let plan = self.plan;

        let mut addr = plan.global_start;
        while addr < plan.global_end {
            let (sector, end) = plan.run_at(addr);
            match sector {
                Some(i) if i == skip => {}
                Some(i) if i < done => {
                    for a in (addr..end).step_by(4) {
                        self.expect_word(a, word_from_addr(a))?;
                    }
                }
                _ => {
                    for a in (addr..end).step_by(4) {
                        self.expect_word(a, FILLER_WORD)?;
                    }
                }
            }
            addr = end;
        }

        Ok(())
    }

    fn sector_isolation(&mut self, index: usize) -> Result<(), TestFailure> {
        let plan = self.plan;
        let sector = plan.sectors[index];

        self.state.set_sector(index as u32);
        self.state.set_sub_phase(SUB_ERASE);
        self.state.set_address(sector.start);

        let init = self.driver.init();
        self.check(init)?;
        let erased = self.driver.erase_sectors(sector.bank, sector.id, 1);
        self.check(erased)?;
        let completed = self.driver.complete();
        self.check(completed)?;

        self.state.set_sub_phase(SUB_ERASED_INSIDE);
        for addr in (sector.start..sector.end()).step_by(4) {
            self.expect_word(addr, plan.erased_value)?;
        }

        self.state.set_sub_phase(SUB_ERASED_OUTSIDE);
        self.check_outside(index, index)?;

        self.state.set_sub_phase(SUB_PROGRAM);
        let init = self.driver.init();
        self.check(init)?;

        let burst = self.burst()?;
        let step = (burst * 4) as u32;
        let mut words = [0u32; MAX_BURST_WORDS];
        let mut addr = sector.start;
        while addr < sector.end() {
            self.state.set_address(addr);
            words[..burst]
                .iter_mut()
                .enumerate()
                .for_each(|(i, w)| *w = word_from_addr(addr.wrapping_add(i as u32 * 4)));

            let programmed = self.driver.program_words(sector.bank, addr, &words[..burst]);
            self.check(programmed)?;
            addr = addr.wrapping_add(step);
        }

        let completed = self.driver.complete();
        self.check(completed)?;

        self.state.set_sub_phase(SUB_PATTERN_INSIDE);
        for addr in (sector.start..sector.end()).step_by(4) {
            self.expect_word(addr, word_from_addr(addr))?;
        }

        self.state.set_sub_phase(SUB_PATTERN_OUTSIDE);
        self.check_outside(index, index + 1)?;

        Ok(())
    }
}
