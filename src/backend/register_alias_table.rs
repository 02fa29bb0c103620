use log::debug;

use crate::backend::register_file::{RegFile, RegUsage};
use crate::error::SimError;
use crate::instructions::instructions::{Instr, InstrIndex, RegisterType, RenamedOperands};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RATEntry {
    // for an architectural register: the temporary register that receives its newest value.
    pub(crate) renamed_to: Option<RegisterType>,
    // for a temporary register: the architectural register it stands in for.
    pub(crate) renamed_from: Option<RegisterType>,
    // the number of in-flight instructions referring to this register.
    pub(crate) ref_count: u16,
}

/// The Register Alias Table. It is the rename unit: it decides at issue which
/// register slots an instruction reads and writes and keeps the reference counts
/// that tell when a slot can be reclaimed. Only renaming and unwinding touch it.
pub(crate) struct RAT {
    table: Vec<RATEntry>,
}

impl RAT {
    pub fn new(reg_count: u16) -> Self {
        let table = (0..reg_count).map(|_| RATEntry::default()).collect();
        Self { table }
    }

    pub fn get(&self, reg: RegisterType) -> &RATEntry {
        &self.table[reg as usize]
    }

    fn get_mut(&mut self, reg: RegisterType) -> &mut RATEntry {
        &mut self.table[reg as usize]
    }

    /// The slot holding the newest value of an architectural register.
    pub fn resolve(&self, arch_reg: RegisterType) -> RegisterType {
        self.get(arch_reg).renamed_to.unwrap_or(arch_reg)
    }

    /// Renames the operands of `instr`. Fails without touching any state when the
    /// destination needs a temporary register and none is free.
    pub(crate) fn rename(&mut self,
                         reg_file: &mut RegFile,
                         instr_index: InstrIndex,
                         instr: &Instr) -> Result<RenamedOperands, SimError> {
        // A destination is renamed when an older in-flight instruction still uses the
        // register, or an older renamed write to it hasn't committed yet.
        let dest_temp = match instr.dest {
            Some(arch_reg) if reg_file.get(arch_reg).usage != RegUsage::Free || self.get(arch_reg).renamed_to.is_some() => {
                match reg_file.find_free_temp() {
                    Some(temp) => Some(temp),
                    None => return Err(SimError::RenameExhausted {
                        arch_reg: reg_file.name(arch_reg),
                        instr: instr_index,
                        text: instr.to_string(),
                    }),
                }
            }
            _ => None,
        };

        // sources are resolved before the destination link moves: 'add r1,r1,r4' reads the old r1
        let src1 = instr.src1.map(|arch_reg| self.acquire_source(reg_file, arch_reg));
        let src2 = instr.src2.map(|arch_reg| self.acquire_source(reg_file, arch_reg));

        let dest = instr.dest.map(|arch_reg| {
            let reg = match dest_temp {
                Some(temp) => {
                    let arch_entry = self.get_mut(arch_reg);
                    arch_entry.renamed_to = Some(temp);
                    self.get_mut(temp).renamed_from = Some(arch_reg);
                    debug!("Renamed destination {} to {} for [{}]", reg_file.name(arch_reg), reg_file.name(temp), instr);
                    temp
                }
                None => arch_reg,
            };
            self.get_mut(reg).ref_count += 1;
            reg_file.get_mut(reg).usage = RegUsage::Destination;
            reg
        });

        Ok(RenamedOperands { dest, src1, src2 })
    }

    fn acquire_source(&mut self, reg_file: &mut RegFile, arch_reg: RegisterType) -> RegisterType {
        let reg = self.resolve(arch_reg);
        if reg != arch_reg {
            debug!("Renamed source {} to {}", reg_file.name(arch_reg), reg_file.name(reg));
        }

        self.get_mut(reg).ref_count += 1;
        let entry = reg_file.get_mut(reg);
        if entry.usage == RegUsage::Free {
            entry.usage = RegUsage::Source;
        }
        reg
    }

    /// Drops one reference to `reg`, reclaiming the slot if nothing needs it anymore.
    pub(crate) fn release(&mut self, reg_file: &mut RegFile, reg: RegisterType) {
        let entry = self.get_mut(reg);
        debug_assert!(entry.ref_count > 0, "register {} released more often than acquired", reg);
        entry.ref_count = entry.ref_count.saturating_sub(1);
        self.try_reclaim(reg_file, reg);
    }

    /// Called when the instruction writing the temporary `temp` commits: its value is
    /// now architectural, so the slot only lives on for readers that still refer to it.
    pub(crate) fn retire_destination(&mut self, reg_file: &mut RegFile, temp: RegisterType) {
        debug_assert!(reg_file.is_temp(temp));
        reg_file.get_mut(temp).usage = RegUsage::Source;
        self.try_reclaim(reg_file, temp);
    }

    fn try_reclaim(&mut self, reg_file: &mut RegFile, reg: RegisterType) {
        if self.get(reg).ref_count > 0 || reg_file.get(reg).usage == RegUsage::Destination {
            return;
        }

        reg_file.reset(reg);
        if let Some(arch_reg) = self.get_mut(reg).renamed_from.take() {
            let arch_entry = self.get_mut(arch_reg);
            // a younger rename of the same register keeps its link
            if arch_entry.renamed_to == Some(reg) {
                arch_entry.renamed_to = None;
            }
            debug!("Reclaimed {} (was {})", reg_file.name(reg), reg_file.name(arch_reg));
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::instructions::instructions::Opcode;

    use super::*;

    fn add(dest: RegisterType, src1: RegisterType, src2: RegisterType) -> Instr {
        Instr::new(Opcode::ADD, Some(dest), Some(src1), Some(src2), None, 2)
    }

    #[test]
    fn test_free_destination_is_not_renamed() {
        let mut reg_file = RegFile::new(12, 24);
        let mut rat = RAT::new(reg_file.count());

        let renamed = rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        assert_eq!(renamed, RenamedOperands { dest: Some(1), src1: Some(2), src2: Some(3) });
        assert_eq!(reg_file.get(1).usage, RegUsage::Destination);
        assert_eq!(reg_file.get(2).usage, RegUsage::Source);
        assert_eq!(rat.get(1).ref_count, 1);
        assert_eq!(rat.get(2).ref_count, 1);
    }

    #[test]
    fn test_busy_destination_is_renamed() {
        let mut reg_file = RegFile::new(12, 24);
        let mut rat = RAT::new(reg_file.count());

        rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        let renamed = rat.rename(&mut reg_file, 1, &add(1, 1, 4)).unwrap();

        // the source still reads r1 itself, the destination goes to the first temporary
        assert_eq!(renamed, RenamedOperands { dest: Some(12), src1: Some(1), src2: Some(4) });
        assert_eq!(rat.get(1).renamed_to, Some(12));
        assert_eq!(rat.get(12).renamed_from, Some(1));
        assert_eq!(reg_file.get(12).usage, RegUsage::Destination);
    }

    #[test]
    fn test_source_follows_rename_link() {
        let mut reg_file = RegFile::new(12, 24);
        let mut rat = RAT::new(reg_file.count());

        rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 1, &add(1, 1, 4)).unwrap();
        let renamed = rat.rename(&mut reg_file, 2, &add(5, 1, 1)).unwrap();

        assert_eq!(renamed, RenamedOperands { dest: Some(5), src1: Some(12), src2: Some(12) });
        assert_eq!(rat.get(12).ref_count, 3);
    }

    #[test]
    fn test_exhaustion_leaves_state_untouched() {
        let mut reg_file = RegFile::new(4, 1);
        let mut rat = RAT::new(reg_file.count());

        rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 1, &add(1, 2, 3)).unwrap();
        let ref_counts: Vec<u16> = (0..5).map(|reg| rat.get(reg).ref_count).collect();

        let result = rat.rename(&mut reg_file, 2, &add(1, 2, 3));
        assert!(matches!(result, Err(SimError::RenameExhausted { instr: 2, .. })));

        let after: Vec<u16> = (0..5).map(|reg| rat.get(reg).ref_count).collect();
        assert_eq!(ref_counts, after);
        assert_eq!(rat.get(1).renamed_to, Some(4));
    }

    #[test]
    fn test_release_reclaims_temp_after_commit() {
        let mut reg_file = RegFile::new(12, 24);
        let mut rat = RAT::new(reg_file.count());

        rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 1, &add(1, 2, 3)).unwrap();

        // write-back of the renamed instruction: the temp stays live until commit
        reg_file.mark_destination(12, 1, 1);
        reg_file.write_back(12, 5);
        rat.release(&mut reg_file, 12);
        assert_eq!(rat.get(12).ref_count, 0);
        assert_eq!(reg_file.get(12).usage, RegUsage::Destination);
        assert_eq!(rat.get(1).renamed_to, Some(12));

        rat.retire_destination(&mut reg_file, 12);
        assert_eq!(reg_file.get(12).usage, RegUsage::Free);
        assert_eq!(rat.get(12).renamed_from, None);
        assert_eq!(rat.get(1).renamed_to, None);
    }

    #[test]
    fn test_retired_temp_survives_while_read() {
        let mut reg_file = RegFile::new(12, 24);
        let mut rat = RAT::new(reg_file.count());

        rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 1, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 2, &add(4, 1, 2)).unwrap();

        reg_file.write_back(12, 5);
        rat.release(&mut reg_file, 12);
        rat.retire_destination(&mut reg_file, 12);

        // the reader of r1 still holds ra
        assert_eq!(reg_file.get(12).usage, RegUsage::Source);
        assert_eq!(rat.resolve(1), 12);

        rat.release(&mut reg_file, 12);
        assert_eq!(reg_file.get(12).usage, RegUsage::Free);
        assert_eq!(rat.resolve(1), 1);
    }

    #[test]
    fn test_younger_rename_keeps_link() {
        let mut reg_file = RegFile::new(12, 24);
        let mut rat = RAT::new(reg_file.count());

        rat.rename(&mut reg_file, 0, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 1, &add(1, 2, 3)).unwrap();
        rat.rename(&mut reg_file, 2, &add(1, 2, 3)).unwrap();
        assert_eq!(rat.get(1).renamed_to, Some(13));

        reg_file.write_back(12, 5);
        rat.release(&mut reg_file, 12);
        rat.retire_destination(&mut reg_file, 12);

        assert_eq!(reg_file.get(12).usage, RegUsage::Free);
        assert_eq!(rat.get(1).renamed_to, Some(13));
    }
}
