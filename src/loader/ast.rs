// Positions are byte offsets into the source text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(String, usize),
    Immediate(i64, usize),
    MemoryAccess { offset: i64, base: String, pos: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub operands: Vec<Operand>,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Instr(Instr),
    Directive(Directive),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub lines: Vec<Line>,
}
