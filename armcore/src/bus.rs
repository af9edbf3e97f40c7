//! Host-side memory and coprocessor boundary.
//!
//! The core owns no memory of its own (the tightly-coupled-memory windows of
//! some ARM9 variants excepted). Every load, store and opcode fetch is routed
//! through a [`Bus`] implementation supplied by the host platform, addressed
//! with *physical* addresses: the MMU has already run by the time a `Bus`
//! method is called. Endianness is the host's concern.

/// Memory access service consumed by the core.
///
/// All methods take physical addresses. Implementations are free to mirror,
/// ignore or open-bus unmapped regions; a bus failure is not a modeled
/// condition, only MMU-detected faults exist as a failure path.
pub trait Bus {
    fn read8(&mut self, address: u32) -> u8;
    fn read16(&mut self, address: u32) -> u16;
    fn read32(&mut self, address: u32) -> u32;

    fn write8(&mut self, address: u32, value: u8);
    fn write16(&mut self, address: u32, value: u16);
    fn write32(&mut self, address: u32, value: u32);

    /// Fast path used only for level-1 page-table descriptor fetches.
    ///
    /// Hosts that keep the guest page tables in plain RAM can override this
    /// to skip device dispatch; the default is an ordinary word read.
    fn read_table_word(&mut self, address: u32) -> u32 {
        self.read32(address)
    }

    /// Register read for coprocessors the core does not model itself
    /// (everything except CP15, and CP14 on the cycle-counter variants).
    /// The full MRC opcode word is passed through.
    fn coprocessor_read(&mut self, opcode: u32) -> u32 {
        let _ = opcode;
        0
    }

    /// Register write counterpart of [`Bus::coprocessor_read`].
    fn coprocessor_write(&mut self, opcode: u32, value: u32) {
        let _ = (opcode, value);
    }

    /// Debugger hook, called once per instruction with the address about to
    /// be executed. No-op by default.
    fn instruction_hook(&mut self, address: u32) {
        let _ = address;
    }

    /// Bus lock around the SWP read-modify-write pair.
    fn lock(&mut self) {}

    /// Bus unlock after the SWP read-modify-write pair.
    fn unlock(&mut self) {}
}
