use crate::error::SimError;
use crate::instructions::instructions::{FU_CLASSES, FUClass, InstrIndex, WordType};

pub(crate) type RSIndex = u16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RSState {
    IDLE,
    BUSY,
}

// A single reservation station together with the functional unit it feeds.
#[derive(Debug, Clone)]
pub(crate) struct RS {
    pub(crate) index: RSIndex,
    pub(crate) class: FUClass,
    // position within the pool of its class
    pub(crate) slot: u16,
    pub(crate) state: RSState,
    // set by issue; the station turns busy when it picks the instruction up
    pub(crate) instr: Option<InstrIndex>,
    pub(crate) vj: WordType,
    pub(crate) vk: WordType,
    // the stations producing vj/vk; None when the value is available
    pub(crate) qj: Option<RSIndex>,
    pub(crate) qk: Option<RSIndex>,
    // the instructions producing vj/vk
    pub(crate) producer_j: Option<InstrIndex>,
    pub(crate) producer_k: Option<InstrIndex>,
    pub(crate) lock_j: bool,
    pub(crate) lock_k: bool,
    pub(crate) cycles_remaining: Option<u32>,
}

impl RS {
    fn new(index: RSIndex, class: FUClass, slot: u16) -> Self {
        Self {
            index,
            class,
            slot,
            state: RSState::IDLE,
            instr: None,
            vj: 0,
            vk: 0,
            qj: None,
            qk: None,
            producer_j: None,
            producer_k: None,
            lock_j: false,
            lock_k: false,
            cycles_remaining: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = RSState::IDLE;
        self.instr = None;
        self.vj = 0;
        self.vk = 0;
        self.qj = None;
        self.qk = None;
        self.producer_j = None;
        self.producer_k = None;
        self.lock_j = false;
        self.lock_k = false;
        self.cycles_remaining = None;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == RSState::IDLE && self.instr.is_none()
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.lock_j || self.lock_k
    }

    pub(crate) fn name(&self) -> String {
        format!("{}{}", self.class.name(), self.slot + 1)
    }
}

/// All reservation stations, grouped in one pool per functional unit class.
/// Stations are ordered by class and then by slot; this is also the order in
/// which they are advanced each cycle.
pub(crate) struct RSTable {
    pub(crate) capacity: u16,
    array: Vec<RS>,
}

impl RSTable {
    pub(crate) fn new(add_count: u16, mul_count: u16, load_count: u16) -> Self {
        let mut array = Vec::with_capacity(add_count as usize + mul_count as usize + load_count as usize);
        for class in FU_CLASSES {
            let count = match class {
                FUClass::Add => add_count,
                FUClass::Mul => mul_count,
                FUClass::Load => load_count,
            };
            for slot in 0..count {
                let index = array.len() as RSIndex;
                array.push(RS::new(index, class, slot));
            }
        }

        RSTable { capacity: array.len() as u16, array }
    }

    pub(crate) fn get(&self, rs_index: RSIndex) -> &RS {
        &self.array[rs_index as usize]
    }

    pub(crate) fn get_mut(&mut self, rs_index: RSIndex) -> &mut RS {
        &mut self.array[rs_index as usize]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item=&RS> {
        self.array.iter()
    }

    /// The first idle station of the given class.
    pub(crate) fn find_idle(&self, class: FUClass) -> Option<RSIndex> {
        self.array.iter()
            .find(|rs| rs.class == class && rs.is_idle())
            .map(|rs| rs.index)
    }

    pub(crate) fn all_idle(&self) -> bool {
        self.array.iter().all(|rs| rs.is_idle())
    }

    /// Hands an instruction to an idle station. The station picks it up during the
    /// execute phase of the same cycle.
    pub(crate) fn allocate(&mut self, rs_index: RSIndex, instr_index: InstrIndex) -> Result<(), SimError> {
        let rs = self.get_mut(rs_index);
        if !rs.is_idle() {
            return Err(SimError::StructuralViolation(
                format!("station {} bound to #{} while holding {:?}", rs.name(), instr_index, rs.instr)));
        }
        rs.instr = Some(instr_index);
        Ok(())
    }

    pub(crate) fn deallocate(&mut self, rs_index: RSIndex) {
        self.get_mut(rs_index).reset();
    }
}
