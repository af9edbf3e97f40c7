//! Exception kinds, pending-line tracking and the priority resolver.
//!
//! Six independent pending lines feed a fixed-priority resolver that the
//! execution loop polls once per instruction. The aggregate `any` flag
//! exists so the hot loop tests a single bool; every mutator goes through
//! [`PendingLines::set`] / [`PendingLines::clear`] precisely so that flag
//! can never go stale.

use serde::{Deserialize, Serialize};

use crate::cpu::modes::Mode;
use crate::cpu::psr::Psr;

/// The architectural exceptions, in no particular order. Priority lives in
/// [`PendingLines::highest_pending`].
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Exception {
    Reset,
    DataAbort,
    Fiq,
    Irq,
    PrefetchAbort,
    Undefined,
    SoftwareInterrupt,
}

impl Exception {
    /// Offset of this exception's slot in the vector table.
    #[must_use]
    pub const fn vector_offset(self) -> u32 {
        match self {
            Self::Reset => 0x00,
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::PrefetchAbort => 0x0C,
            Self::DataAbort => 0x10,
            Self::Irq => 0x18,
            Self::Fiq => 0x1C,
        }
    }

    /// The mode entered when this exception is taken.
    #[must_use]
    pub const fn target_mode(self) -> Mode {
        match self {
            Self::Reset | Self::SoftwareInterrupt => Mode::Supervisor,
            Self::DataAbort | Self::PrefetchAbort => Mode::Abort,
            Self::Fiq => Mode::Fiq,
            Self::Irq => Mode::Irq,
            Self::Undefined => Mode::Undefined,
        }
    }

    /// FIQ entry (and reset) masks FIQ as well as IRQ.
    #[must_use]
    pub const fn masks_fiq(self) -> bool {
        matches!(self, Self::Fiq | Self::Reset)
    }
}

/// Host-visible interrupt/abort lines for `set_input_line`. SWI has no
/// line; it is raised by the instruction stream.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum InputLine {
    Irq,
    Fiq,
    AbortData,
    AbortPrefetch,
    Undefined,
}

/// The six pending booleans plus the aggregate checked once per
/// instruction.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PendingLines {
    irq: bool,
    fiq: bool,
    abort_data: bool,
    abort_prefetch: bool,
    undefined: bool,
    swi: bool,
    any: bool,
}

impl PendingLines {
    /// True iff at least one line is pending. This is the only flag the
    /// execution loop reads on the hot path.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.any
    }

    #[must_use]
    pub const fn is_pending(&self, line: InputLine) -> bool {
        match line {
            InputLine::Irq => self.irq,
            InputLine::Fiq => self.fiq,
            InputLine::AbortData => self.abort_data,
            InputLine::AbortPrefetch => self.abort_prefetch,
            InputLine::Undefined => self.undefined,
        }
    }

    pub const fn set(&mut self, line: InputLine, state: bool) {
        match line {
            InputLine::Irq => self.irq = state,
            InputLine::Fiq => self.fiq = state,
            InputLine::AbortData => self.abort_data = state,
            InputLine::AbortPrefetch => self.abort_prefetch = state,
            InputLine::Undefined => self.undefined = state,
        }
        self.recompute();
    }

    pub const fn raise_swi(&mut self) {
        self.swi = true;
        self.recompute();
    }

    /// Picks the highest-priority serviceable exception, honoring the
    /// CPSR I/F masks, and clears its pending line. Priority, highest
    /// first: data abort, FIQ, IRQ, prefetch abort, undefined, SWI.
    /// Reset is not a pending line; the host calls `reset()` directly.
    pub fn take_highest(&mut self, cpsr: Psr) -> Option<Exception> {
        if !self.any {
            return None;
        }

        let taken = if self.abort_data {
            self.abort_data = false;
            Some(Exception::DataAbort)
        } else if self.fiq && !cpsr.fiq_disable() {
            self.fiq = false;
            Some(Exception::Fiq)
        } else if self.irq && !cpsr.irq_disable() {
            self.irq = false;
            Some(Exception::Irq)
        } else if self.abort_prefetch {
            self.abort_prefetch = false;
            Some(Exception::PrefetchAbort)
        } else if self.undefined {
            self.undefined = false;
            Some(Exception::Undefined)
        } else if self.swi {
            self.swi = false;
            Some(Exception::SoftwareInterrupt)
        } else {
            // Only masked IRQ/FIQ lines remain pending.
            None
        };

        self.recompute();
        taken
    }

    const fn recompute(&mut self) {
        self.any = self.irq
            || self.fiq
            || self.abort_data
            || self.abort_prefetch
            || self.undefined
            || self.swi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    #[test]
    fn aggregate_tracks_lines() {
        let mut pending = PendingLines::default();
        assert!(!pending.any());

        pending.set(InputLine::Irq, true);
        assert!(pending.any());
        pending.set(InputLine::Fiq, true);
        pending.set(InputLine::Irq, false);
        assert!(pending.any());
        pending.set(InputLine::Fiq, false);
        assert!(!pending.any());
    }

    #[test]
    fn aggregate_consistency_random_walk() {
        let lines = [
            InputLine::Irq,
            InputLine::Fiq,
            InputLine::AbortData,
            InputLine::AbortPrefetch,
            InputLine::Undefined,
        ];
        let mut rng = rand::thread_rng();
        let mut pending = PendingLines::default();

        for _ in 0..1_000 {
            let line = lines[rng.gen_range(0..lines.len())];
            pending.set(line, rng.r#gen());

            let expected = lines.iter().any(|&l| pending.is_pending(l));
            assert_eq!(pending.any(), expected);
        }
    }

    #[test]
    fn fiq_beats_irq() {
        let mut pending = PendingLines::default();
        pending.set(InputLine::Irq, true);
        pending.set(InputLine::Fiq, true);

        let cpsr = Psr::default();
        assert_eq!(pending.take_highest(cpsr), Some(Exception::Fiq));
        // IRQ stays pending for the next poll.
        assert!(pending.any());
        assert_eq!(pending.take_highest(cpsr), Some(Exception::Irq));
        assert!(!pending.any());
    }

    #[test]
    fn data_abort_beats_everything() {
        let mut pending = PendingLines::default();
        pending.set(InputLine::Fiq, true);
        pending.set(InputLine::AbortData, true);

        assert_eq!(
            pending.take_highest(Psr::default()),
            Some(Exception::DataAbort)
        );
    }

    #[test]
    fn masked_lines_are_not_taken() {
        let mut pending = PendingLines::default();
        pending.set(InputLine::Irq, true);
        pending.set(InputLine::Fiq, true);

        let mut cpsr = Psr::default();
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);

        assert_eq!(pending.take_highest(cpsr), None);
        // Masked lines stay pending.
        assert!(pending.any());

        cpsr.set_fiq_disable(false);
        assert_eq!(pending.take_highest(cpsr), Some(Exception::Fiq));
    }

    #[test]
    fn vector_layout() {
        assert_eq!(Exception::Reset.vector_offset(), 0x00);
        assert_eq!(Exception::Undefined.vector_offset(), 0x04);
        assert_eq!(Exception::SoftwareInterrupt.vector_offset(), 0x08);
        assert_eq!(Exception::PrefetchAbort.vector_offset(), 0x0C);
        assert_eq!(Exception::DataAbort.vector_offset(), 0x10);
        assert_eq!(Exception::Irq.vector_offset(), 0x18);
        assert_eq!(Exception::Fiq.vector_offset(), 0x1C);
    }
}
