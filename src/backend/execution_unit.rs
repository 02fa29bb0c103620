use crate::instructions::instructions::{Opcode, WordType};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

/// What a functional unit produces when an instruction finishes executing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ExecResult {
    // a value for the destination register
    Value(WordType),
    // a store; it reaches memory when the instruction commits
    Store { addr: WordType, value: WordType },
}

/// Computes the outcome of an instruction from its captured operands. For
/// loads and stores `vk` is the base register; for stores `vj` is the value.
pub(crate) fn execute(opcode: Opcode,
                      vj: WordType,
                      vk: WordType,
                      imm: Option<WordType>,
                      memory_subsystem: &MemorySubsystem) -> ExecResult {
    match opcode {
        Opcode::ADD => execute_ADD(vj, vk),
        Opcode::SUB => execute_SUB(vj, vk),
        Opcode::MUL => execute_MUL(vj, vk),
        Opcode::DIV => execute_DIV(vj, vk),
        Opcode::LW => execute_LW(memory_subsystem, vk, imm.unwrap_or(0)),
        Opcode::SW => execute_SW(vj, vk, imm.unwrap_or(0)),
    }
}

#[allow(non_snake_case)]
fn execute_ADD(vj: WordType, vk: WordType) -> ExecResult {
    ExecResult::Value(vj.wrapping_add(vk))
}

#[allow(non_snake_case)]
fn execute_SUB(vj: WordType, vk: WordType) -> ExecResult {
    ExecResult::Value(vj.wrapping_sub(vk))
}

#[allow(non_snake_case)]
fn execute_MUL(vj: WordType, vk: WordType) -> ExecResult {
    ExecResult::Value(vj.wrapping_mul(vk))
}

#[allow(non_snake_case)]
fn execute_DIV(vj: WordType, vk: WordType) -> ExecResult {
    if vk == 0 {
        return ExecResult::Value(-1);
    }
    ExecResult::Value(vj.wrapping_div(vk))
}

pub(crate) fn effective_address(base: WordType, offset: WordType) -> WordType {
    base.wrapping_add(offset)
}

#[allow(non_snake_case)]
fn execute_LW(memory_subsystem: &MemorySubsystem, base: WordType, offset: WordType) -> ExecResult {
    ExecResult::Value(memory_subsystem.load(effective_address(base, offset)))
}

#[allow(non_snake_case)]
fn execute_SW(value: WordType, base: WordType, offset: WordType) -> ExecResult {
    ExecResult::Store { addr: effective_address(base, offset), value }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::cpu::CPUConfig;
    use crate::instructions::instructions::Program;

    use super::*;

    fn memory() -> MemorySubsystem {
        let mut memory_subsystem = MemorySubsystem::new(&CPUConfig { memory_size: 32, ..CPUConfig::default() });
        memory_subsystem.init(&Program { initial_memory: vec![(10, 77)], ..Program::default() });
        memory_subsystem
    }

    #[rstest]
    #[case(Opcode::ADD, 7, 5, 12)]
    #[case(Opcode::SUB, 7, 5, 2)]
    #[case(Opcode::MUL, 7, 5, 35)]
    #[case(Opcode::DIV, 7, 2, 3)]
    #[case(Opcode::DIV, -7, 2, -3)]
    #[case(Opcode::DIV, 7, 0, -1)]
    #[case(Opcode::ADD, WordType::MAX, 1, WordType::MIN)]
    #[case(Opcode::DIV, WordType::MIN, -1, WordType::MIN)]
    fn test_arithmetic(#[case] opcode: Opcode, #[case] vj: WordType, #[case] vk: WordType, #[case] expected: WordType) {
        assert_eq!(execute(opcode, vj, vk, None, &memory()), ExecResult::Value(expected));
    }

    #[test]
    fn test_load_reads_base_plus_offset() {
        assert_eq!(execute(Opcode::LW, 0, 4, Some(6), &memory()), ExecResult::Value(77));
    }

    #[test]
    fn test_store_computes_address() {
        assert_eq!(execute(Opcode::SW, 9, 4, Some(-1), &memory()), ExecResult::Store { addr: 3, value: 9 });
    }
}
