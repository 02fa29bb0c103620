use log::debug;

use crate::cpu::CPUConfig;
use crate::instructions::instructions::{Program, WordType};

/// Outcome of checking a load against the stores that haven't reached memory yet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ForwardResult {
    // the youngest older store to the same word supplies the value
    Hit(WordType),
    // no pending store to this word; memory holds the value
    Miss,
    // an older store hasn't computed its address yet
    Stall,
}

/// Flat word addressed data memory. Addresses wrap around the memory size, so
/// every computed address maps onto a word.
pub(crate) struct MemorySubsystem {
    pub(crate) memory: Vec<WordType>,
}

impl MemorySubsystem {
    pub fn new(cpu_config: &CPUConfig) -> MemorySubsystem {
        MemorySubsystem {
            memory: vec![0; cpu_config.memory_size as usize],
        }
    }

    pub(crate) fn init(&mut self, program: &Program) {
        self.memory.iter_mut().for_each(|word| *word = 0);

        for &(addr, value) in &program.initial_memory {
            let index = self.to_index(addr as WordType);
            self.memory[index] = value;
        }
    }

    fn to_index(&self, addr: WordType) -> usize {
        addr.rem_euclid(self.memory.len() as WordType) as usize
    }

    pub(crate) fn same_word(&self, a: WordType, b: WordType) -> bool {
        self.to_index(a) == self.to_index(b)
    }

    pub(crate) fn load(&self, addr: WordType) -> WordType {
        self.memory[self.to_index(addr)]
    }

    pub(crate) fn store(&mut self, addr: WordType, value: WordType) {
        let index = self.to_index(addr);
        debug!("Store [{}]={}", index, value);
        self.memory[index] = value;
    }
}
