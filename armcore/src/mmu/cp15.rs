//! System control coprocessor (CP15) register model.
//!
//! Holds the control word, translation-table base, domain access control,
//! fault status/address latches, the FCSE process-id remap, and (for the
//! variants that have them) the tightly-coupled-memory region registers
//! with their backing RAM. The derived translator caches live in
//! [`Mmu`](super::Mmu); writes here report which caches went stale through
//! [`Cp15Effects`].

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// Control register bits (register 1).
const CONTROL_MMU_ENABLE: u32 = 0;
const CONTROL_SYSTEM: u32 = 8;
const CONTROL_ROM: u32 = 9;
const CONTROL_HIGH_VECTORS: u32 = 13;
const CONTROL_DTCM_ENABLE: u32 = 16;
const CONTROL_ITCM_ENABLE: u32 = 18;

/// What a CP15 write invalidated.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Cp15Effects {
    /// Translator caches (level-1 shortcut cache, fault tables) must be
    /// recomputed before the next translation.
    pub refresh_translator: bool,
    /// The execution loop's cached dispatch configuration is stale
    /// (MMU enable toggled, FCSE remap changed, vector base moved).
    pub refresh_dispatch: bool,
}

/// One tightly-coupled-memory window: a fast RAM region that shadows the
/// bus for addresses inside its configured range.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TcmRegion {
    /// Raw region register: base in bits 31-12, size field in bits 5-1.
    pub control: u32,
    pub enabled: bool,
    base: u32,
    limit: u32,
    ram: Vec<u8>,
}

impl TcmRegion {
    fn with_ram(size: usize) -> Self {
        Self {
            ram: vec![0; size],
            ..Self::default()
        }
    }

    fn update(&mut self, control: u32, enabled: bool, base_fixed_zero: bool) {
        self.control = control;
        self.enabled = enabled && !self.ram.is_empty();
        self.base = if base_fixed_zero {
            0
        } else {
            control & 0xFFFF_F000
        };
        let virtual_size = 512_u32 << control.get_bits(1..=5);
        self.limit = self.base.wrapping_add(virtual_size);
    }

    #[must_use]
    pub fn contains(&self, address: u32) -> bool {
        self.enabled && address >= self.base && address < self.limit
    }

    /// Byte offset into the backing RAM, mirroring when the virtual window
    /// is larger than the physical RAM.
    fn ram_index(&self, address: u32) -> usize {
        (address - self.base) as usize % self.ram.len()
    }

    #[must_use]
    pub fn read8(&self, address: u32) -> u8 {
        self.ram[self.ram_index(address)]
    }

    #[must_use]
    pub fn read16(&self, address: u32) -> u16 {
        let i = self.ram_index(address & !1);
        u16::from_le_bytes([self.ram[i], self.ram[(i + 1) % self.ram.len()]])
    }

    #[must_use]
    pub fn read32(&self, address: u32) -> u32 {
        let i = self.ram_index(address & !3);
        let n = self.ram.len();
        u32::from_le_bytes([
            self.ram[i],
            self.ram[(i + 1) % n],
            self.ram[(i + 2) % n],
            self.ram[(i + 3) % n],
        ])
    }

    pub fn write8(&mut self, address: u32, value: u8) {
        let i = self.ram_index(address);
        self.ram[i] = value;
    }

    pub fn write16(&mut self, address: u32, value: u16) {
        let i = self.ram_index(address & !1);
        let n = self.ram.len();
        let bytes = value.to_le_bytes();
        self.ram[i] = bytes[0];
        self.ram[(i + 1) % n] = bytes[1];
    }

    pub fn write32(&mut self, address: u32, value: u32) {
        let i = self.ram_index(address & !3);
        let n = self.ram.len();
        for (k, byte) in value.to_le_bytes().iter().enumerate() {
            self.ram[(i + k) % n] = *byte;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cp15 {
    /// Guest-visible identification value, fixed at construction.
    pub id: u32,
    pub control: u32,
    /// Translation table base (register 2); bits 31-14 are significant.
    pub translation_table_base: u32,
    /// Domain access control (register 3): sixteen 2-bit fields.
    pub domain_access_control: u32,
    pub fault_status: u32,
    pub fault_address: u32,
    /// FCSE process id (register 13); bits 31-25 are significant.
    pub process_id: u32,
    pub breakpoint: u32,

    pub dtcm: TcmRegion,
    pub itcm: TcmRegion,
}

impl Cp15 {
    #[must_use]
    pub fn new(id: u32, itcm_size: usize, dtcm_size: usize) -> Self {
        Self {
            id,
            control: 0,
            translation_table_base: 0,
            domain_access_control: 0,
            fault_status: 0,
            fault_address: 0,
            process_id: 0,
            breakpoint: 0,
            dtcm: TcmRegion::with_ram(dtcm_size),
            itcm: TcmRegion::with_ram(itcm_size),
        }
    }

    pub fn reset(&mut self) {
        let effects = self.write_control(0);
        debug_assert!(effects.refresh_translator);
        self.translation_table_base = 0;
        self.domain_access_control = 0;
        self.fault_status = 0;
        self.fault_address = 0;
        self.process_id = 0;
        self.breakpoint = 0;
    }

    #[must_use]
    pub fn mmu_enabled(&self) -> bool {
        self.control.get_bit(CONTROL_MMU_ENABLE)
    }

    /// The S bit: privileged-read-only meaning for AP=00.
    #[must_use]
    pub fn system_bit(&self) -> bool {
        self.control.get_bit(CONTROL_SYSTEM)
    }

    /// The R bit: read-allowed meaning for AP=00.
    #[must_use]
    pub fn rom_bit(&self) -> bool {
        self.control.get_bit(CONTROL_ROM)
    }

    #[must_use]
    pub fn vector_base(&self) -> u32 {
        if self.control.get_bit(CONTROL_HIGH_VECTORS) {
            0xFFFF_0000
        } else {
            0x0000_0000
        }
    }

    /// FCSE remap added to virtual addresses below 32MB.
    #[must_use]
    pub const fn process_id_offset(&self) -> u32 {
        self.process_id & 0xFE00_0000
    }

    /// 2-bit access-control mode for a domain, from the DACR.
    #[must_use]
    pub fn domain_mode(&self, domain: u32) -> u32 {
        (self.domain_access_control >> (domain * 2)) & 0b11
    }

    /// Read of register `reg` with opcode2 field `op2`.
    #[must_use]
    pub fn read(&self, reg: u32, op2: u32) -> u32 {
        match reg {
            0 => match op2 {
                // Main ID; op2=1 would be the cache type register, which
                // reads as zero on the cores modeled here.
                0 => self.id,
                _ => 0,
            },
            1 => self.control,
            2 => self.translation_table_base,
            3 => self.domain_access_control,
            5 => self.fault_status,
            6 => self.fault_address,
            9 => match op2 {
                0 => self.dtcm.control,
                _ => self.itcm.control,
            },
            13 => self.process_id,
            14 => self.breakpoint,
            _ => {
                tracing::debug!("CP15 read of unimplemented register c{reg}, op2={op2}");
                0
            }
        }
    }

    /// Write of register `reg`, returning which derived state went stale.
    pub fn write(&mut self, reg: u32, op2: u32, value: u32) -> Cp15Effects {
        match reg {
            1 => self.write_control(value),
            2 => {
                self.translation_table_base = value;
                Cp15Effects {
                    refresh_translator: true,
                    refresh_dispatch: false,
                }
            }
            3 => {
                self.domain_access_control = value;
                Cp15Effects {
                    refresh_translator: true,
                    refresh_dispatch: false,
                }
            }
            5 => {
                self.fault_status = value;
                Cp15Effects::default()
            }
            6 => {
                self.fault_address = value;
                Cp15Effects::default()
            }
            // Cache maintenance (7) is a no-op without a cache model; TLB
            // maintenance (8) invalidates the translator caches.
            7 => Cp15Effects::default(),
            8 => Cp15Effects {
                refresh_translator: true,
                refresh_dispatch: false,
            },
            9 => {
                self.write_tcm_region(op2, value);
                Cp15Effects::default()
            }
            13 => {
                let old = self.process_id_offset();
                self.process_id = value;
                Cp15Effects {
                    refresh_translator: false,
                    refresh_dispatch: old != self.process_id_offset(),
                }
            }
            14 => {
                self.breakpoint = value;
                Cp15Effects::default()
            }
            _ => {
                tracing::debug!("CP15 write of unimplemented register c{reg}: {value:08X}");
                Cp15Effects::default()
            }
        }
    }

    fn write_control(&mut self, value: u32) -> Cp15Effects {
        let old = self.control;
        self.control = value;
        self.refresh_tcm();

        let mmu_toggled =
            old.get_bit(CONTROL_MMU_ENABLE) != value.get_bit(CONTROL_MMU_ENABLE);
        let vectors_moved =
            old.get_bit(CONTROL_HIGH_VECTORS) != value.get_bit(CONTROL_HIGH_VECTORS);
        Cp15Effects {
            // The S/R bits feed the fault decision tables, and the enable
            // bit gates the whole translator.
            refresh_translator: true,
            refresh_dispatch: mmu_toggled || vectors_moved,
        }
    }

    fn write_tcm_region(&mut self, op2: u32, value: u32) {
        match op2 {
            0 => {
                let enabled = self.control.get_bit(CONTROL_DTCM_ENABLE);
                self.dtcm.update(value, enabled, false);
            }
            _ => {
                let enabled = self.control.get_bit(CONTROL_ITCM_ENABLE);
                // The ITCM window always starts at address zero.
                self.itcm.update(value, enabled, true);
            }
        }
    }

    fn refresh_tcm(&mut self) {
        let dtcm_control = self.dtcm.control;
        let itcm_control = self.itcm.control;
        self.dtcm
            .update(dtcm_control, self.control.get_bit(CONTROL_DTCM_ENABLE), false);
        self.itcm
            .update(itcm_control, self.control.get_bit(CONTROL_ITCM_ENABLE), true);
    }

    /// Latches an abort's fault status and address for guest inspection.
    pub const fn latch_fault(&mut self, status: u32, address: u32) {
        self.fault_status = status;
        self.fault_address = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_write_reports_mmu_toggle() {
        let mut cp15 = Cp15::new(0x4105_9461, 0, 0);
        let effects = cp15.write(1, 0, 1);
        assert!(effects.refresh_translator);
        assert!(effects.refresh_dispatch);
        assert!(cp15.mmu_enabled());

        // Same enable state again: translator still refreshes (S/R bits
        // may have changed) but dispatch does not.
        let effects = cp15.write(1, 0, 1 | (1 << 8));
        assert!(effects.refresh_translator);
        assert!(!effects.refresh_dispatch);
        assert!(cp15.system_bit());
    }

    #[test]
    fn high_vectors() {
        let mut cp15 = Cp15::new(0, 0, 0);
        assert_eq!(cp15.vector_base(), 0);
        let effects = cp15.write(1, 0, 1 << 13);
        assert!(effects.refresh_dispatch);
        assert_eq!(cp15.vector_base(), 0xFFFF_0000);
    }

    #[test]
    fn domain_modes_unpack() {
        let mut cp15 = Cp15::new(0, 0, 0);
        cp15.write(3, 0, 0b11_10_01_00);
        assert_eq!(cp15.domain_mode(0), 0);
        assert_eq!(cp15.domain_mode(1), 1);
        assert_eq!(cp15.domain_mode(2), 2);
        assert_eq!(cp15.domain_mode(3), 3);
        assert_eq!(cp15.domain_mode(15), 0);
    }

    #[test]
    fn process_id_offset_masks_low_bits() {
        let mut cp15 = Cp15::new(0, 0, 0);
        let effects = cp15.write(13, 0, 0x0600_1234);
        assert!(effects.refresh_dispatch);
        assert_eq!(cp15.process_id_offset(), 0x0600_0000);
    }

    #[test]
    fn tcm_window_shadows_range() {
        let mut cp15 = Cp15::new(0, 0x8000, 0x4000);
        // Enable DTCM, base 0x0280_0000, size field 5 -> 16KB window.
        cp15.write(1, 0, 1 << 16);
        cp15.write(9, 0, 0x0280_0000 | (5 << 1));

        assert!(cp15.dtcm.contains(0x0280_0000));
        assert!(cp15.dtcm.contains(0x0280_3FFF));
        assert!(!cp15.dtcm.contains(0x0280_4000));
        assert!(!cp15.dtcm.contains(0x027F_FFFF));

        cp15.dtcm.write32(0x0280_0010, 0xCAFE_F00D);
        assert_eq!(cp15.dtcm.read32(0x0280_0010), 0xCAFE_F00D);
        assert_eq!(cp15.dtcm.read16(0x0280_0010), 0xF00D);
        assert_eq!(cp15.dtcm.read8(0x0280_0013), 0xCA);
    }

    #[test]
    fn itcm_base_is_fixed_at_zero() {
        let mut cp15 = Cp15::new(0, 0x8000, 0);
        cp15.write(1, 0, 1 << 18);
        // Base bits are ignored for ITCM.
        cp15.write(9, 1, 0x1234_5000 | (6 << 1));
        assert!(cp15.itcm.contains(0));
        assert!(cp15.itcm.contains(0x7FFF));
        assert!(!cp15.itcm.contains(0x8000));
    }

    #[test]
    fn disabled_tcm_never_hits() {
        let mut cp15 = Cp15::new(0, 0, 0);
        cp15.write(1, 0, (1 << 16) | (1 << 18));
        cp15.write(9, 0, 5 << 1);
        cp15.write(9, 1, 5 << 1);
        // No backing RAM was configured, so the windows stay off.
        assert!(!cp15.dtcm.contains(0));
        assert!(!cp15.itcm.contains(0));
    }
}
