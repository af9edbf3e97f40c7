use serde::{Deserialize, Serialize};

/// Processor operating mode, encoded in CPSR bits 4-0.
///
/// Bit 4 is always set for the architecturally valid modes; the 26-bit
/// compatibility encodings (bit 4 clear) and the three reserved 5-bit
/// patterns decode to [`Mode::Reserved`], which addresses a zeroed scratch
/// bank instead of crashing. Real guest software never runs there.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Mode {
    User = 0b10000,
    Fiq = 0b10001,
    Irq = 0b10010,
    Supervisor = 0b10011,
    Abort = 0b10111,
    Undefined = 0b11011,
    System = 0b11111,
    /// Any invalid mode pattern. Architecturally "don't care".
    Reserved = 0b00000,
}

impl Mode {
    /// Everything except User runs privileged. Reserved is treated as
    /// privileged since only privileged code can reach it at all.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        !matches!(self, Self::User)
    }

    /// Modes with a banked SPSR (everything but User/System/Reserved).
    #[must_use]
    pub const fn has_spsr(self) -> bool {
        matches!(
            self,
            Self::Fiq | Self::Irq | Self::Supervisor | Self::Abort | Self::Undefined
        )
    }
}

impl TryFrom<u32> for Mode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(value),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("USR"),
            Self::Fiq => f.write_str("FIQ"),
            Self::Irq => f.write_str("IRQ"),
            Self::Supervisor => f.write_str("SVC"),
            Self::Abort => f.write_str("ABT"),
            Self::Undefined => f.write_str("UND"),
            Self::System => f.write_str("SYS"),
            Self::Reserved => f.write_str("RSV"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn valid_modes_round_trip() {
        for mode in [
            Mode::User,
            Mode::Fiq,
            Mode::Irq,
            Mode::Supervisor,
            Mode::Abort,
            Mode::Undefined,
            Mode::System,
        ] {
            assert_eq!(Mode::try_from(mode as u32), Ok(mode));
        }
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        // The three reserved patterns with bit 4 set, plus a 26-bit encoding.
        for bits in [0b10100_u32, 0b10101, 0b10110, 0b00010] {
            assert_eq!(Mode::try_from(bits), Err(bits));
        }
    }

    #[test]
    fn privilege() {
        assert!(!Mode::User.is_privileged());
        assert!(Mode::System.is_privileged());
        assert!(Mode::Supervisor.is_privileged());
    }
}
