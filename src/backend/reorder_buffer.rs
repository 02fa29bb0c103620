use crate::error::SimError;
use crate::instructions::instructions::InstrIndex;

/// The reorder buffer. Completed instructions wait here until every older
/// instruction has committed. Since instructions are issued in program order,
/// the sequence numbers double as indices into the program.
pub(crate) struct ROB {
    capacity: u16,
    // number of instructions issued so far
    pub(crate) seq_issued: u64,
    // everything before this point is committed.
    pub(crate) seq_committed: u64,
    completed: Vec<InstrIndex>,
}

impl ROB {
    pub(crate) fn new(capacity: u16) -> Self {
        Self {
            capacity,
            seq_issued: 0,
            seq_committed: 0,
            completed: Vec::with_capacity(capacity as usize),
        }
    }

    // The number of issued but not yet committed instructions.
    pub(crate) fn size(&self) -> u16 {
        (self.seq_issued - self.seq_committed) as u16
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub(crate) fn has_space(&self) -> bool {
        self.capacity > self.size()
    }

    pub(crate) fn allocate(&mut self) {
        assert!(self.has_space(), "ROB: Can't allocate if no space.");
        self.seq_issued += 1;
    }

    /// Records a completed instruction. Only an issued instruction that hasn't
    /// completed or committed yet can complete.
    pub(crate) fn push_completed(&mut self, instr_index: InstrIndex) -> Result<(), SimError> {
        if (instr_index as u64) < self.seq_committed {
            return Err(SimError::StructuralViolation(
                format!("#{} completed after it was committed", instr_index)));
        }
        if instr_index as u64 >= self.seq_issued {
            return Err(SimError::StructuralViolation(
                format!("#{} completed before it was issued", instr_index)));
        }
        if self.completed.contains(&instr_index) {
            return Err(SimError::StructuralViolation(
                format!("#{} completed twice", instr_index)));
        }
        self.completed.push(instr_index);
        Ok(())
    }

    /// The next instruction to commit, if it has completed. It is removed from
    /// the completed set and the commit point moves past it.
    pub(crate) fn next_committable(&mut self) -> Option<InstrIndex> {
        let head = self.seq_committed as InstrIndex;
        let pos = self.completed.iter().position(|&index| index == head)?;
        self.completed.swap_remove(pos);
        self.seq_committed += 1;
        Some(head)
    }

    #[cfg(test)]
    pub(crate) fn completed(&self) -> &[InstrIndex] {
        &self.completed
    }
}
