//! Wire format of the commands the host streams to the agent.
//!
//! Every command is one tag byte followed by little-endian 32-bit words:
//!
//! * `0xA0` EraseSector: `bank`, `first`, `count`
//! * `0xA1` ProgramWords: `bank`, `address`, `burst`, `total`, `repeat`,
//!   then `total` data words
//! * `0xA2` FlushCache: no arguments
//! * `0xA3` End: no arguments
//!
//! There is no framing or checksum, host and agent must be built against the
//! same tag values.

use crate::{
    consts::{CommandTag, MAX_BURST_WORDS},
    error::PatchError,
    ring::ByteSource,
};

/// Arguments of a `ProgramWords` command. The data words follow on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct ProgramHeader {
    pub bank: u32,
    pub address: u32,
    /// Words per driver call.
    pub burst: u32,
    /// Data words that follow on the wire.
    pub total: u32,
    /// Words to fill after the data by repeating the last burst.
    pub repeat: u32,
}

impl ProgramHeader {
    /// Checks the header before anything is read or written.
    pub fn validate(&self) -> Result<(), PatchError> {
        let ProgramHeader { burst, total, repeat, .. } = *self;

        if burst == 0 || burst as usize > MAX_BURST_WORDS || total % burst != 0 {
            return Err(PatchError::InvalidBurst { burst, total });
        }
        if repeat % burst != 0 || (repeat > 0 && total == 0) {
            return Err(PatchError::IncompleteRepeat);
        }

        Ok(())
    }

    /// Address right after the data words.
    pub fn tail_address(&self) -> u32 {
        self.address.wrapping_add(self.total.wrapping_mul(4))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Command {
    EraseSector { bank: u32, first: u32, count: u32 },
    ProgramWords(ProgramHeader),
    FlushCache,
    End,
}

impl Command {
    /// Reads the tag and fixed arguments of the next command. For
    /// `ProgramWords` the data words are left in the source.
    pub fn read<S: ByteSource>(src: &mut S) -> Result<Self, PatchError> {
        let tag = src.read_byte();

        match CommandTag::from_byte(tag) {
            Some(CommandTag::EraseSector) => Ok(Command::EraseSector {
                bank: src.read_word(),
                first: src.read_word(),
                count: src.read_word(),
            }),
            Some(CommandTag::ProgramWords) => Ok(Command::ProgramWords(ProgramHeader {
                bank: src.read_word(),
                address: src.read_word(),
                burst: src.read_word(),
                total: src.read_word(),
                repeat: src.read_word(),
            })),
            Some(CommandTag::FlushCache) => Ok(Command::FlushCache),
            Some(CommandTag::End) => Ok(Command::End),
            None => Err(PatchError::UnknownCommand(tag)),
        }
    }

    pub fn tag(&self) -> CommandTag {
        match self {
            Command::EraseSector { .. } => CommandTag::EraseSector,
            Command::ProgramWords(_) => CommandTag::ProgramWords,
            Command::FlushCache => CommandTag::FlushCache,
            Command::End => CommandTag::End,
        }
    }

    /// Host side: writes the tag and fixed arguments into `out`. Returns the
    /// number of bytes used, or `None` if `out` is too small.
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        let mut args = [0u32; 5];
        let argc = match *self {
            Command::EraseSector { bank, first, count } => {
                args[..3].copy_from_slice(&[bank, first, count]);
                3
            }
            Command::ProgramWords(h) => {
                args.copy_from_slice(&[h.bank, h.address, h.burst, h.total, h.repeat]);
                5
            }
            Command::FlushCache | Command::End => 0,
        };

        let len = 1 + argc * 4;
        let out = out.get_mut(..len)?;
        out[0] = self.tag() as u8;
        for (chunk, arg) in out[1..].chunks_exact_mut(4).zip(args.iter()) {
            chunk.copy_from_slice(&arg.to_le_bytes());
        }

        Some(len)
    }
}
