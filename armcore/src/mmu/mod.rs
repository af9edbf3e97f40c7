//! Two-level virtual memory translation.
//!
//! A 4096-entry cache of decoded level-1 descriptors fronts the table walk:
//! section entries whose permissions can never fault carry a `faultless`
//! shortcut so the common translation is one array load and an OR. Level-2
//! descriptors are fetched from guest memory on every translation. The
//! cache and the fault decision tables are derived state, rebuilt lazily
//! whenever a CP15 write touches the registers they depend on.

pub mod cp15;

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::mmu::cp15::{Cp15, Cp15Effects};

/// Fault-status codes, per the low nibble of the FSR. The faulting domain
/// goes in bits 4-7.
pub const FAULT_SECTION_TRANSLATION: u32 = 0b0101;
pub const FAULT_PAGE_TRANSLATION: u32 = 0b0111;
pub const FAULT_SECTION_DOMAIN: u32 = 0b1001;
pub const FAULT_PAGE_DOMAIN: u32 = 0b1011;
pub const FAULT_SECTION_PERMISSION: u32 = 0b1101;
pub const FAULT_PAGE_PERMISSION: u32 = 0b1111;

/// Outcome of a permission check, before it is tied to a section or page.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum FaultKind {
    #[default]
    None,
    Domain,
    Permission,
}

/// A failed translation: the status word destined for the FSR and the
/// virtual address destined for the FAR.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct MemoryFault {
    pub status: u32,
    pub address: u32,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
enum Level1Kind {
    #[default]
    Unmapped,
    Section,
    Coarse,
    Fine,
}

/// One decoded level-1 descriptor.
#[derive(Debug, Clone, Copy, Default)]
struct Level1Entry {
    kind: Level1Kind,
    /// Section base (1MB aligned) or level-2 table base.
    base: u32,
    domain: u32,
    /// Section access permissions; unused for table entries, whose AP
    /// bits live in the level-2 descriptors.
    ap: u32,
    /// Section that can never fault under the current DACR and S/R bits:
    /// translation skips the permission path entirely.
    faultless: bool,
}

/// Decides whether an access faults, given the descriptor AP bits, the
/// domain's access-control mode, and the CP15 S/R bits.
#[must_use]
pub const fn decode_fault(
    ap: u32,
    domain_mode: u32,
    user: bool,
    write: bool,
    system: bool,
    rom: bool,
) -> FaultKind {
    match domain_mode {
        // No-access domains fault, and so does the reserved encoding.
        0b00 | 0b10 => FaultKind::Domain,
        // Manager domains bypass permission checks.
        0b11 => FaultKind::None,
        _ => {
            let permitted = match ap {
                0b00 => match (system, rom) {
                    (false, false) | (true, true) => false,
                    (true, false) => !user && !write,
                    (false, true) => !write,
                },
                0b01 => !user,
                0b10 => !user || !write,
                _ => true,
            };
            if permitted {
                FaultKind::None
            } else {
                FaultKind::Permission
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mmu {
    pub cp15: Cp15,

    /// Decoded level-1 descriptors, one per megabyte of virtual space.
    /// Derived from guest memory; rebuilt, never serialized.
    #[serde(skip)]
    level1: Vec<Level1Entry>,
    #[serde(skip)]
    level1_stale: bool,

    /// Fault decisions indexed by `(ap << 2) | domain_mode`, one table per
    /// (privilege, direction) pair. Derived from the CP15 S/R bits.
    #[serde(skip)]
    fault_user_read: [FaultKind; 16],
    #[serde(skip)]
    fault_user_write: [FaultKind; 16],
    #[serde(skip)]
    fault_priv_read: [FaultKind; 16],
    #[serde(skip)]
    fault_priv_write: [FaultKind; 16],
}

impl Mmu {
    #[must_use]
    pub fn new(cp15: Cp15) -> Self {
        Self {
            cp15,
            level1: Vec::new(),
            level1_stale: true,
            fault_user_read: [FaultKind::None; 16],
            fault_user_write: [FaultKind::None; 16],
            fault_priv_read: [FaultKind::None; 16],
            fault_priv_write: [FaultKind::None; 16],
        }
    }

    pub fn reset(&mut self) {
        self.cp15.reset();
        self.level1.clear();
        self.level1_stale = true;
    }

    /// CP15 register write, also invalidating whatever derived state the
    /// write made stale.
    pub fn write_register(&mut self, reg: u32, op2: u32, value: u32) -> Cp15Effects {
        let effects = self.cp15.write(reg, op2, value);
        if effects.refresh_translator {
            self.level1_stale = true;
        }
        effects
    }

    #[must_use]
    pub fn read_register(&self, reg: u32, op2: u32) -> u32 {
        self.cp15.read(reg, op2)
    }

    /// Translates a virtual address, walking the guest's tables as needed.
    /// With the MMU disabled this is the identity. `check_pid` applies the
    /// FCSE remap; it is skipped for explicit debugger probes of physical
    /// layouts.
    pub fn translate(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        write: bool,
        privileged: bool,
        check_pid: bool,
    ) -> Result<u32, MemoryFault> {
        if !self.cp15.mmu_enabled() {
            return Ok(address);
        }
        if self.level1_stale || self.level1.is_empty() {
            self.refresh(bus);
        }

        let virt = if check_pid && address < 0x0200_0000 {
            address.wrapping_add(self.cp15.process_id_offset())
        } else {
            address
        };

        let entry = self.level1[(virt >> 20) as usize];
        if entry.faultless {
            return Ok(entry.base | (virt & 0x000F_FFFF));
        }

        let domain_mode = self.cp15.domain_mode(entry.domain);
        match entry.kind {
            Level1Kind::Unmapped => Err(MemoryFault {
                status: FAULT_SECTION_TRANSLATION,
                address: virt,
            }),
            Level1Kind::Section => {
                let kind = self.lookup_fault(entry.ap, domain_mode, privileged, write);
                match kind {
                    FaultKind::None => Ok(entry.base | (virt & 0x000F_FFFF)),
                    FaultKind::Domain => Err(MemoryFault {
                        status: FAULT_SECTION_DOMAIN | (entry.domain << 4),
                        address: virt,
                    }),
                    FaultKind::Permission => Err(MemoryFault {
                        status: FAULT_SECTION_PERMISSION | (entry.domain << 4),
                        address: virt,
                    }),
                }
            }
            Level1Kind::Coarse | Level1Kind::Fine => {
                self.walk_level2(bus, entry, domain_mode, virt, write, privileged)
            }
        }
    }

    fn walk_level2(
        &self,
        bus: &mut impl Bus,
        entry: Level1Entry,
        domain_mode: u32,
        virt: u32,
        write: bool,
        privileged: bool,
    ) -> Result<u32, MemoryFault> {
        // Only Client and Manager domains are meaningful for a table walk;
        // the reserved encodings have no defined level-2 semantics.
        assert!(
            matches!(domain_mode, 0b01 | 0b11),
            "page table walk with domain access mode {domain_mode:#04b} at {virt:08X}"
        );

        let index = match entry.kind {
            Level1Kind::Coarse => virt.get_bits(12..=19),
            _ => virt.get_bits(10..=19),
        };
        let descriptor = bus.read_table_word(entry.base | (index << 2));

        let (base, offset, ap) = match descriptor & 0b11 {
            0b00 => {
                return Err(MemoryFault {
                    status: FAULT_PAGE_TRANSLATION | (entry.domain << 4),
                    address: virt,
                });
            }
            // 64KB large page: AP sub-field selected by address bits 15-14.
            0b01 => (
                descriptor & 0xFFFF_0000,
                virt & 0xFFFF,
                (descriptor >> (4 + 2 * virt.get_bits(14..=15))) & 0b11,
            ),
            // 4KB small page: AP sub-field selected by address bits 11-10.
            0b10 => (
                descriptor & 0xFFFF_F000,
                virt & 0xFFF,
                (descriptor >> (4 + 2 * virt.get_bits(10..=11))) & 0b11,
            ),
            // 1KB tiny page: a single AP field.
            _ => (descriptor & 0xFFFF_FC00, virt & 0x3FF, descriptor.get_bits(4..=5)),
        };

        match self.lookup_fault(ap, domain_mode, privileged, write) {
            FaultKind::None => Ok(base | offset),
            // Domain faults were already resolved by the level-1 check, so
            // the only remaining kind here is a permission fault.
            _ => Err(MemoryFault {
                status: FAULT_PAGE_PERMISSION | (entry.domain << 4),
                address: virt,
            }),
        }
    }

    const fn lookup_fault(
        &self,
        ap: u32,
        domain_mode: u32,
        privileged: bool,
        write: bool,
    ) -> FaultKind {
        let index = ((ap << 2) | domain_mode) as usize;
        match (privileged, write) {
            (false, false) => self.fault_user_read[index],
            (false, true) => self.fault_user_write[index],
            (true, false) => self.fault_priv_read[index],
            (true, true) => self.fault_priv_write[index],
        }
    }

    /// Rebuilds the fault tables and the level-1 descriptor cache from the
    /// current CP15 state and guest memory.
    fn refresh(&mut self, bus: &mut impl Bus) {
        let system = self.cp15.system_bit();
        let rom = self.cp15.rom_bit();
        for index in 0..16 {
            let ap = (index as u32) >> 2;
            let domain_mode = (index as u32) & 0b11;
            self.fault_user_read[index] =
                decode_fault(ap, domain_mode, true, false, system, rom);
            self.fault_user_write[index] =
                decode_fault(ap, domain_mode, true, true, system, rom);
            self.fault_priv_read[index] =
                decode_fault(ap, domain_mode, false, false, system, rom);
            self.fault_priv_write[index] =
                decode_fault(ap, domain_mode, false, true, system, rom);
        }

        let table_base = self.cp15.translation_table_base & 0xFFFF_C000;
        self.level1.clear();
        self.level1.reserve(4096);
        for index in 0..4096 {
            let descriptor = bus.read_table_word(table_base | (index << 2));
            self.level1.push(self.decode_level1(descriptor));
        }
        self.level1_stale = false;
    }

    fn decode_level1(&self, descriptor: u32) -> Level1Entry {
        let domain = descriptor.get_bits(5..=8);
        match descriptor & 0b11 {
            0b00 => Level1Entry::default(),
            0b01 => Level1Entry {
                kind: Level1Kind::Coarse,
                base: descriptor & 0xFFFF_FC00,
                domain,
                ap: 0,
                faultless: false,
            },
            0b11 => Level1Entry {
                kind: Level1Kind::Fine,
                base: descriptor & 0xFFFF_F000,
                domain,
                ap: 0,
                faultless: false,
            },
            _ => {
                let ap = descriptor.get_bits(10..=11);
                let domain_mode = self.cp15.domain_mode(domain);
                let index = ((ap << 2) | domain_mode) as usize;
                let faultless = matches!(self.fault_user_read[index], FaultKind::None)
                    && matches!(self.fault_user_write[index], FaultKind::None)
                    && matches!(self.fault_priv_read[index], FaultKind::None)
                    && matches!(self.fault_priv_write[index], FaultKind::None);
                Level1Entry {
                    kind: Level1Kind::Section,
                    base: descriptor & 0xFFF0_0000,
                    domain,
                    ap,
                    faultless,
                }
            }
        }
    }
}
