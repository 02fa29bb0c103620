use std::collections::VecDeque;
use std::fmt;

use regex::Regex;

use crate::backend::reservation_station::RSIndex;
use crate::cpu::Latencies;

pub(crate) type RegisterType = u16;
pub(crate) type WordType = i64;
pub(crate) type CycleType = u64;
pub(crate) type InstrIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    ADD,
    SUB,
    MUL,
    DIV,
    LW,
    SW,
}

/// The class of functional unit (and so the reservation station pool) an
/// instruction executes on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FUClass {
    Add,
    Mul,
    Load,
}

pub(crate) const FU_CLASSES: [FUClass; 3] = [FUClass::Add, FUClass::Mul, FUClass::Load];

impl FUClass {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            FUClass::Add => "add",
            FUClass::Mul => "mult",
            FUClass::Load => "load",
        }
    }
}

impl Opcode {
    pub(crate) fn fu_class(&self) -> FUClass {
        match self {
            Opcode::ADD | Opcode::SUB => FUClass::Add,
            Opcode::MUL | Opcode::DIV => FUClass::Mul,
            Opcode::LW | Opcode::SW => FUClass::Load,
        }
    }

    pub(crate) fn latency(&self, latencies: &Latencies) -> u32 {
        match self {
            Opcode::ADD => latencies.add,
            Opcode::SUB => latencies.sub,
            Opcode::MUL => latencies.mul,
            Opcode::DIV => latencies.div,
            Opcode::LW => latencies.lw,
            Opcode::SW => latencies.sw,
        }
    }
}

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::ADD => "add",
        Opcode::SUB => "sub",
        Opcode::MUL => "mul",
        Opcode::DIV => "div",
        Opcode::LW => "lw",
        Opcode::SW => "sw",
    }
}

pub(crate) fn get_opcode(mnemonic: &str) -> Option<Opcode> {
    let string = mnemonic.to_lowercase();

    match string.as_str() {
        "add" => Some(Opcode::ADD),
        "sub" => Some(Opcode::SUB),
        "mul" => Some(Opcode::MUL),
        "div" => Some(Opcode::DIV),
        "lw" => Some(Opcode::LW),
        "sw" => Some(Opcode::SW),
        _ => None,
    }
}

/// Resolves an architectural register mnemonic (`r0`, `R7`, ...). Temporary
/// registers can't be named in a program.
pub(crate) fn get_register(name: &str, arch_reg_count: u16) -> Option<RegisterType> {
    let re = Regex::new(r"^(?i)r(\d+)$").unwrap();
    let captures = re.captures(name)?;
    let reg: RegisterType = captures[1].parse().ok()?;

    if reg >= arch_reg_count {
        return None;
    }
    Some(reg)
}

/// The physical slots an instruction was bound to by the rename unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RenamedOperands {
    pub(crate) dest: Option<RegisterType>,
    pub(crate) src1: Option<RegisterType>,
    pub(crate) src2: Option<RegisterType>,
}

#[derive(Debug, Clone)]
pub(crate) struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) dest: Option<RegisterType>,
    pub(crate) src1: Option<RegisterType>,
    pub(crate) src2: Option<RegisterType>,
    pub(crate) imm: Option<WordType>,
    // the latency in cycles
    pub(crate) cycles: u32,
    pub(crate) loc: Option<SourceLocation>,

    // Everything below is filled in while the instruction moves through the pipeline.
    pub(crate) renamed: Option<RenamedOperands>,
    pub(crate) station: Option<RSIndex>,
    pub(crate) result: Option<WordType>,
    // (address, value) of a store; written to memory on commit.
    pub(crate) store: Option<(WordType, WordType)>,
    pub(crate) issue: Option<CycleType>,
    pub(crate) exec: Option<CycleType>,
    pub(crate) write: Option<CycleType>,
    pub(crate) commit: Option<CycleType>,
}

impl Instr {
    pub(crate) fn new(opcode: Opcode,
                      dest: Option<RegisterType>,
                      src1: Option<RegisterType>,
                      src2: Option<RegisterType>,
                      imm: Option<WordType>,
                      cycles: u32) -> Instr {
        Instr {
            opcode,
            dest,
            src1,
            src2,
            imm,
            cycles,
            loc: None,
            renamed: None,
            station: None,
            result: None,
            store: None,
            issue: None,
            exec: None,
            write: None,
            commit: None,
        }
    }

    /// True if the result of this instruction was published in an earlier cycle
    /// than `cycle`; a consumer can't pick up a value in the write-back cycle itself.
    pub(crate) fn written_back_before(&self, cycle: CycleType) -> bool {
        matches!(self.write, Some(write) if write < cycle)
    }
}

/// Sets a cycle stamp. Stamps are set once and never move.
pub(crate) fn stamp(field: &mut Option<CycleType>, cycle: CycleType) {
    debug_assert!(field.is_none(), "cycle stamp already set to {:?}", field);
    *field = Some(cycle);
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", mnemonic(self.opcode))?;

        let reg = |r: Option<RegisterType>| r.map_or(String::from("-"), |r| format!("r{}", r));
        match self.opcode {
            Opcode::ADD |
            Opcode::SUB |
            Opcode::MUL |
            Opcode::DIV => write!(f, "{},{},{}", reg(self.dest), reg(self.src1), reg(self.src2))?,
            Opcode::LW => write!(f, "{},{}({})", reg(self.dest), self.imm.unwrap_or(0), reg(self.src2))?,
            Opcode::SW => write!(f, "{},{}({})", reg(self.src1), self.imm.unwrap_or(0), reg(self.src2))?,
        }

        if let Some(loc) = self.loc {
            write!(f, " ; {}", loc)?;
        }

        Ok(())
    }
}

/// A loaded program: the master list of instructions in program order plus
/// the initial machine state requested by the source.
#[derive(Debug, Clone, Default)]
pub(crate) struct Program {
    pub(crate) code: Vec<Instr>,
    pub(crate) initial_registers: Vec<(RegisterType, WordType)>,
    pub(crate) initial_memory: Vec<(usize, WordType)>,
}

impl Program {
    pub(crate) fn len(&self) -> usize {
        self.code.len()
    }

    pub(crate) fn get(&self, index: InstrIndex) -> &Instr {
        &self.code[index]
    }

    pub(crate) fn get_mut(&mut self, index: InstrIndex) -> &mut Instr {
        &mut self.code[index]
    }
}

// The InstrQueue holds the instructions that haven't been issued yet, oldest first.
pub(crate) struct InstrQueue {
    instructions: VecDeque<InstrIndex>,
}

impl InstrQueue {
    pub fn new(program: &Program) -> Self {
        InstrQueue { instructions: (0..program.len()).collect() }
    }

    pub fn size(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn dequeue(&mut self) {
        assert!(!self.is_empty(), "Can't dequeue when InstrQueue is empty.");
        self.instructions.pop_front();
    }

    pub fn peek(&self) -> Option<InstrIndex> {
        self.instructions.front().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_opcode() {
        assert_eq!(get_opcode("add"), Some(Opcode::ADD));
        assert_eq!(get_opcode("DIV"), Some(Opcode::DIV));
        assert_eq!(get_opcode("Lw"), Some(Opcode::LW));
        assert_eq!(get_opcode("jmp"), None);
    }

    #[test]
    fn test_fu_class() {
        assert_eq!(Opcode::ADD.fu_class(), FUClass::Add);
        assert_eq!(Opcode::SUB.fu_class(), FUClass::Add);
        assert_eq!(Opcode::MUL.fu_class(), FUClass::Mul);
        assert_eq!(Opcode::DIV.fu_class(), FUClass::Mul);
        assert_eq!(Opcode::LW.fu_class(), FUClass::Load);
        assert_eq!(Opcode::SW.fu_class(), FUClass::Load);
    }

    #[test]
    fn test_get_register() {
        assert_eq!(get_register("r0", 12), Some(0));
        assert_eq!(get_register("R11", 12), Some(11));
        assert_eq!(get_register("r12", 12), None);
        assert_eq!(get_register("ra", 12), None);
        assert_eq!(get_register("x1", 12), None);
    }

    #[test]
    fn test_display() {
        let instr = Instr::new(Opcode::LW, Some(1), None, Some(2), Some(8), 5);
        assert_eq!(format!("{}", instr), "lw r1,8(r2)");

        let instr = Instr::new(Opcode::SUB, Some(3), Some(4), Some(5), None, 2);
        assert_eq!(format!("{}", instr), "sub r3,r4,r5");
    }

    #[test]
    fn test_instr_queue_is_fifo() {
        let program = Program {
            code: vec![
                Instr::new(Opcode::ADD, Some(1), Some(2), Some(3), None, 2),
                Instr::new(Opcode::MUL, Some(4), Some(5), Some(6), None, 10),
            ],
            ..Program::default()
        };
        let mut queue = InstrQueue::new(&program);
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.peek(), Some(0));
        queue.dequeue();
        assert_eq!(queue.peek(), Some(1));
        queue.dequeue();
        assert!(queue.is_empty());
        assert_eq!(queue.peek(), None);
    }
}
