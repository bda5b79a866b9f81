use crate::consts::HEADER_SIGNATURE;

pub type EntryFn = unsafe extern "C" fn() -> i32;

/// Fixed-layout descriptor at the start of the agent image (`.headers`
/// section). The debug host finds the buffer and the stack through it.
#[repr(C)]
pub struct AgentHeader {
    pub signature: u32,
    /// Address of this header, i.e. where the image expects to be loaded.
    pub load_address: *const AgentHeader,
    pub entry_point: EntryFn,
    pub data_buffer: *const u8,
    pub data_buffer_size: u32,
    pub stack: *const u8,
    pub stack_size: u32,
}

// Only read by the host, never written at runtime
unsafe impl Sync for AgentHeader {}

impl AgentHeader {
    pub fn is_valid(&self) -> bool {
        self.signature == HEADER_SIGNATURE
    }

    /// `true` if the image is running where it was linked.
    pub fn is_at_load_address(&self) -> bool {
        core::ptr::eq(self, self.load_address)
    }
}
