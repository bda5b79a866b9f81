//! A FLASH device modelled in RAM.
//!
//! Follows the rules real controllers enforce: nothing can be changed while
//! locked, erase works on whole units, programming needs an aligned, erased
//! unit of exactly `G` words. Optionally models a read cache that only sees
//! new contents after `complete()`.
//!
//! Status codes are the STM32 `FLASH_SR` error bits the same violation
//! would raise on silicon.

use crate::{
    driver::FlashDriver,
    error::{code, ErrorCode},
};

pub const PROGERR: ErrorCode = code(1 << 3);
pub const WRPERR: ErrorCode = code(1 << 4);
pub const PGAERR: ErrorCode = code(1 << 5);
pub const SIZERR: ErrorCode = code(1 << 6);
pub const PGSERR: ErrorCode = code(1 << 7);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    Init,
    Erase,
    Program,
    Complete,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub inits: u32,
    /// Erase units erased, not calls.
    pub erased_units: u32,
    /// Program units written, not calls.
    pub programmed_units: u32,
    pub completes: u32,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    op: SimOp,
    skip: u32,
    code: ErrorCode,
}

/// `WORDS` words of FLASH starting at `base`, programmed `G` words at a time.
pub struct SimulatedFlash<const WORDS: usize, const G: usize> {
    base: u32,
    sector_size: u32,
    banks: u32,
    erased: u32,
    cells: [u32; WORDS],
    cache: Option<[u32; WORDS]>,
    unlocked: bool,
    stats: SimStats,
    fault: Option<Fault>,
}

impl<const WORDS: usize, const G: usize> SimulatedFlash<WORDS, G> {
    /// A single-bank, fully erased device with all-ones erased cells.
    ///
    /// `sector_size` is in bytes and should divide the device size.
    pub fn new(base: u32, sector_size: u32) -> Self {
        Self {
            base,
            sector_size,
            banks: 1,
            erased: 0xFFFF_FFFF,
            cells: [0xFFFF_FFFF; WORDS],
            cache: None,
            unlocked: false,
            stats: SimStats::default(),
            fault: None,
        }
    }

    pub fn with_erased_value(mut self, erased: u32) -> Self {
        self.erased = erased;
        self.cells = [erased; WORDS];
        self
    }

    /// Splits the sectors evenly over `banks` banks. Sector IDs restart at
    /// zero in every bank.
    pub fn with_banks(mut self, banks: u32) -> Self {
        self.banks = banks.max(1);
        self
    }

    /// Reads go through a cache that is only refreshed by `complete()`.
    pub fn with_stale_cache(mut self) -> Self {
        self.cache = Some(self.cells);
        self
    }

    /// Makes the `skip + 1`th next `op` fail with `code` without touching
    /// the device. One shot.
    pub fn inject_fault(&mut self, op: SimOp, skip: u32, code: ErrorCode) {
        self.fault = Some(Fault { op, skip, code });
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn end(&self) -> u32 {
        self.base + (WORDS as u32) * 4
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn erased_value(&self) -> u32 {
        self.erased
    }

    pub fn sectors_per_bank(&self) -> u32 {
        (WORDS as u32 * 4) / self.sector_size / self.banks
    }

    /// Start address of sector `id` in `bank`.
    pub fn sector_start(&self, bank: u32, id: u32) -> u32 {
        self.base + (bank * self.sectors_per_bank() + id) * self.sector_size
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    fn check_fault(&mut self, op: SimOp) -> Result<(), ErrorCode> {
        let fault = match self.fault.as_mut() {
            Some(fault) if fault.op == op => fault,
            _ => return Ok(()),
        };

        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }

        let code = fault.code;
        self.fault = None;
        fp_log!(warn, "sim: injected fault");
        Err(code)
    }

    fn index_of(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.base)?;
        if offset % 4 != 0 {
            return None;
        }
        let idx = (offset / 4) as usize;
        if idx < WORDS {
            Some(idx)
        } else {
            None
        }
    }
}

impl<const WORDS: usize, const G: usize> FlashDriver for SimulatedFlash<WORDS, G> {
    fn granularity(&self) -> usize {
        G
    }

    fn init(&mut self) -> Result<(), ErrorCode> {
        self.check_fault(SimOp::Init)?;
        self.stats.inits += 1;
        self.unlocked = true;
        Ok(())
    }

    fn erase_sectors(&mut self, bank: u32, first: u32, count: u32) -> Result<(), ErrorCode> {
        if !self.unlocked {
            return Err(WRPERR);
        }
        self.check_fault(SimOp::Erase)?;

        let per_bank = self.sectors_per_bank();
        let last = first.checked_add(count).ok_or(PGSERR)?;
        if bank >= self.banks || last > per_bank {
            fp_log!(error, "sim: erase of sectors {=u32}..{=u32} out of range", first, last);
            return Err(PGSERR);
        }

        let words_per_sector = (self.sector_size / 4) as usize;
        let start = ((bank * per_bank + first) as usize) * words_per_sector;
        let end = start + (count as usize) * words_per_sector;
        let erased = self.erased;
        self.cells[start..end].iter_mut().for_each(|w| *w = erased);

        self.stats.erased_units += count;
        Ok(())
    }

    fn program_unit(&mut self, _bank: u32, address: u32, words: &[u32]) -> Result<(), ErrorCode> {
        if !self.unlocked {
            return Err(WRPERR);
        }
        self.check_fault(SimOp::Program)?;

        if words.len() != G {
            return Err(SIZERR);
        }
        if address % (G as u32 * 4) != 0 {
            return Err(PGAERR);
        }
        let start = self.index_of(address).ok_or(PGAERR)?;
        if start + G > WORDS {
            return Err(PGAERR);
        }

        let erased = self.erased;
        let unit = &mut self.cells[start..start + G];
        if unit.iter().any(|w| *w != erased) {
            fp_log!(error, "sim: programming non-erased unit at {=u32:X}", address);
            return Err(PROGERR);
        }
        unit.copy_from_slice(words);

        self.stats.programmed_units += 1;
        Ok(())
    }

    fn complete(&mut self) -> Result<(), ErrorCode> {
        self.check_fault(SimOp::Complete)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.copy_from_slice(&self.cells);
        }
        self.stats.completes += 1;
        Ok(())
    }

    fn read_word(&self, address: u32) -> u32 {
        match self.index_of(address) {
            Some(idx) => match self.cache.as_ref() {
                Some(cache) => cache[idx],
                None => self.cells[idx],
            },
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sim = SimulatedFlash<256, 2>;

    #[test]
    fn locked_until_init() {
        let mut sim = Sim::new(0x0800_0000, 128);
        assert_eq!(sim.erase_sectors(0, 0, 1), Err(WRPERR));
        assert_eq!(sim.program_unit(0, 0x0800_0000, &[1, 2]), Err(WRPERR));

        sim.init().unwrap();
        sim.init().unwrap();
        assert!(sim.is_unlocked());
        assert_eq!(sim.stats().inits, 2);
        sim.program_unit(0, 0x0800_0000, &[1, 2]).unwrap();
    }

    #[test]
    fn program_needs_erased_aligned_unit() {
        let mut sim = Sim::new(0x0800_0000, 128);
        sim.init().unwrap();

        assert_eq!(sim.program_unit(0, 0x0800_0004, &[1, 2]), Err(PGAERR));
        assert_eq!(sim.program_unit(0, 0x0800_0000, &[1]), Err(SIZERR));
        assert_eq!(sim.program_unit(0, 0x0800_0400, &[1, 2]), Err(PGAERR));

        sim.program_unit(0, 0x0800_0008, &[1, 2]).unwrap();
        assert_eq!(sim.program_unit(0, 0x0800_0008, &[1, 2]), Err(PROGERR));
        assert_eq!(sim.read_word(0x0800_0008), 1);
        assert_eq!(sim.read_word(0x0800_000C), 2);
    }

    #[test]
    fn erase_restores_only_the_requested_units() {
        let mut sim = Sim::new(0x0800_0000, 128).with_erased_value(0);
        sim.init().unwrap();
        sim.program_words(0, 0x0800_0000, &[7; 256]).unwrap();

        sim.erase_sectors(0, 2, 2).unwrap();
        assert_eq!(sim.read_word(0x0800_00FC), 7);
        assert_eq!(sim.read_word(0x0800_0100), 0);
        assert_eq!(sim.read_word(0x0800_01FC), 0);
        assert_eq!(sim.read_word(0x0800_0200), 7);
        assert_eq!(sim.stats().erased_units, 2);
    }

    #[test]
    fn banks_have_their_own_sector_ids() {
        let mut sim = Sim::new(0, 128).with_banks(2);
        assert_eq!(sim.sectors_per_bank(), 4);
        assert_eq!(sim.sector_start(1, 1), 640);

        sim.init().unwrap();
        assert_eq!(sim.erase_sectors(1, 3, 2), Err(PGSERR));
        assert_eq!(sim.erase_sectors(2, 0, 1), Err(PGSERR));
        sim.erase_sectors(1, 3, 1).unwrap();
    }

    #[test]
    fn stale_cache_hides_writes_until_complete() {
        let mut sim = Sim::new(0, 128).with_stale_cache();
        sim.init().unwrap();
        sim.program_unit(0, 0, &[5, 6]).unwrap();
        assert_eq!(sim.read_word(0), 0xFFFF_FFFF);

        sim.complete().unwrap();
        assert_eq!(sim.read_word(0), 5);
    }

    #[test]
    fn injected_fault_fires_once() {
        let mut sim = Sim::new(0, 128);
        sim.init().unwrap();
        sim.inject_fault(SimOp::Program, 1, code(99));

        sim.program_unit(0, 0, &[1, 1]).unwrap();
        assert_eq!(sim.program_unit(0, 8, &[1, 1]), Err(code(99)));
        assert_eq!(sim.read_word(8), 0xFFFF_FFFF);
        sim.program_unit(0, 8, &[1, 1]).unwrap();
    }
}
