use crate::backend::reservation_station::RSIndex;
use crate::instructions::instructions::{InstrIndex, RegisterType, WordType};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RegUsage {
    Free,
    // an in-flight instruction will write (or wrote, but hasn't committed) this slot
    Destination,
    // in-flight instructions read this slot
    Source,
}

#[derive(Debug, Clone)]
pub(crate) struct RegEntry {
    pub(crate) value: WordType,
    pub(crate) usage: RegUsage,
    // the reservation station currently producing the value of this slot
    pub(crate) dest_used_by: Option<RSIndex>,
    // the instruction that most recently claimed this slot as destination
    pub(crate) last_writer: Option<InstrIndex>,
}

impl RegEntry {
    fn new() -> Self {
        RegEntry { value: 0, usage: RegUsage::Free, dest_used_by: None, last_writer: None }
    }

    fn reset(&mut self) {
        self.value = 0;
        self.usage = RegUsage::Free;
        self.dest_used_by = None;
        self.last_writer = None;
    }
}

/// The register file: the architectural registers `r0..` followed by the
/// temporary registers the rename unit draws from.
pub(crate) struct RegFile {
    pub(crate) arch_count: u16,
    pub(crate) temp_count: u16,
    entries: Vec<RegEntry>,
}

impl RegFile {
    pub(crate) fn new(arch_count: u16, temp_count: u16) -> RegFile {
        let count = arch_count as usize + temp_count as usize;
        let entries = (0..count).map(|_| RegEntry::new()).collect();
        RegFile { arch_count, temp_count, entries }
    }

    pub(crate) fn count(&self) -> u16 {
        self.arch_count + self.temp_count
    }

    pub(crate) fn is_temp(&self, reg: RegisterType) -> bool {
        reg >= self.arch_count
    }

    pub(crate) fn get(&self, reg: RegisterType) -> &RegEntry {
        &self.entries[reg as usize]
    }

    pub(crate) fn get_mut(&mut self, reg: RegisterType) -> &mut RegEntry {
        &mut self.entries[reg as usize]
    }

    pub(crate) fn get_value(&self, reg: RegisterType) -> WordType {
        self.get(reg).value
    }

    pub(crate) fn set_value(&mut self, reg: RegisterType, value: WordType) {
        self.get_mut(reg).value = value;
    }

    /// The lowest numbered temporary register that is free.
    pub(crate) fn find_free_temp(&self) -> Option<RegisterType> {
        (self.arch_count..self.count()).find(|&reg| self.get(reg).usage == RegUsage::Free)
    }

    /// Claims `reg` as the destination of the instruction bound to station `rs_index`.
    pub(crate) fn mark_destination(&mut self, reg: RegisterType, rs_index: RSIndex, instr_index: InstrIndex) {
        let entry = self.get_mut(reg);
        debug_assert!(entry.dest_used_by.is_none() || entry.dest_used_by == Some(rs_index),
                      "register {} already produced by station {:?}", reg, entry.dest_used_by);
        entry.usage = RegUsage::Destination;
        entry.dest_used_by = Some(rs_index);
        entry.last_writer = Some(instr_index);
    }

    /// Publishes the result of the producer of `reg`. An architectural slot stops
    /// being a destination right away; a temporary one stays live until commit.
    pub(crate) fn write_back(&mut self, reg: RegisterType, value: WordType) {
        let is_temp = self.is_temp(reg);
        let entry = self.get_mut(reg);
        entry.value = value;
        entry.dest_used_by = None;
        if !is_temp {
            entry.usage = RegUsage::Source;
        }
    }

    pub(crate) fn reset(&mut self, reg: RegisterType) {
        let is_temp = self.is_temp(reg);
        let entry = self.get_mut(reg);
        if is_temp {
            entry.reset();
        } else {
            // architectural registers keep their value
            entry.usage = RegUsage::Free;
            entry.dest_used_by = None;
            entry.last_writer = None;
        }
    }

    pub(crate) fn name(&self, reg: RegisterType) -> String {
        if !self.is_temp(reg) {
            return format!("r{}", reg);
        }

        let temp = reg - self.arch_count;
        if temp < 26 {
            format!("r{}", (b'a' + temp as u8) as char)
        } else {
            format!("t{}", temp)
        }
    }
}
