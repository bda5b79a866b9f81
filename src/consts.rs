pub const SKIP_FLASH: bool = cfg!(feature = "skip-flash");

pub const TRAP_ON_FAILURE: bool = cfg!(any(feature = "trap-on-failure", debug_assertions));

// NOTE: Make sure these are in sync with the RAM layout in memory.x!
pub const REQUEST_BUFFER_SIZE: usize = 1024;
pub const AGENT_STACK_SIZE: usize = 512;
pub const TESTER_MAX_SECTORS: usize = 64;

/// Capacity of the agent's local burst buffer, in words.
pub const MAX_BURST_WORDS: usize = 64;

/// "FL32", read as a little-endian word.
pub const HEADER_SIGNATURE: u32 = 0x3233_4C46;

pub const FILLER_WORD: u32 = 0x5555_5555;
pub const ADDR_HASH_MULTIPLIER: u32 = 81_247_345;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    EraseSector = 0xA0,
    ProgramWords = 0xA1,
    FlushCache = 0xA2,
    End = 0xA3,
}

impl CommandTag {
    pub fn from_byte(other: u8) -> Option<Self> {
        match other {
            0xA0 => Some(CommandTag::EraseSector),
            0xA1 => Some(CommandTag::ProgramWords),
            0xA2 => Some(CommandTag::FlushCache),
            0xA3 => Some(CommandTag::End),
            _ => None,
        }
    }
}

// Status codes reported through the status word. Driver codes are passed
// through unchanged, these are the ones we generate ourselves.
pub const STATUS_OK: i32 = 0;
pub const STATUS_UNKNOWN_COMMAND: i32 = -2;
pub const STATUS_MISALIGNED_WORD_COUNT: i32 = -10;
pub const STATUS_INVALID_BURST: i32 = 1003;
pub const STATUS_INCOMPLETE_REPEAT: i32 = -1005;
