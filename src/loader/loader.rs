use std::fs;
use std::io::ErrorKind;

use lalrpop_util::ParseError;
use thiserror::Error;

use crate::assembly::AssemblyParser;
use crate::cpu::CPUConfig;
use crate::instructions::instructions::{get_opcode, get_register, Instr, Opcode, Program, RegisterType, SourceLocation, WordType};
use crate::loader::ast;
use crate::loader::ast::{Assembly, Line, Operand};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("{0}")]
    ParseError(String),

    #[error("{}", .0.join("\n"))]
    AnalysisError(Vec<String>),

    #[error("{0}")]
    NotFoundError(String),

    #[error("{0}")]
    IOError(String),
}

struct Loader<'a> {
    cpu_config: CPUConfig,
    src: &'a str,
    code: Vec<Instr>,
    initial_registers: Vec<(RegisterType, WordType)>,
    initial_memory: Vec<(usize, WordType)>,
    errors: Vec<String>,
}

impl Loader<'_> {
    fn load(mut self) -> Result<Program, LoadError> {
        let assembly = self.parse()?;

        for line in &assembly.lines {
            match line {
                Line::Instr(instr) => self.analyze_instr(instr),
                Line::Directive(directive) => self.analyze_directive(directive),
            }
        }

        if self.code.is_empty() && self.errors.is_empty() {
            self.errors.push(String::from("Program contains no instructions"));
        }

        if !self.errors.is_empty() {
            return Err(LoadError::AnalysisError(self.errors));
        }

        Ok(Program {
            code: self.code,
            initial_registers: self.initial_registers,
            initial_memory: self.initial_memory,
        })
    }

    fn parse(&self) -> Result<Assembly, LoadError> {
        AssemblyParser::new().parse(self.src).map_err(|err| {
            let (pos, msg) = match err {
                ParseError::InvalidToken { location } =>
                    (location, String::from("Invalid token")),
                ParseError::UnrecognizedEof { location, expected } =>
                    (location, format!("Unexpected end of file, expected one of {}", expected.join(", "))),
                ParseError::UnrecognizedToken { token: (start, token, _), expected } =>
                    (start, format!("Unexpected '{}', expected one of {}", token, expected.join(", "))),
                ParseError::ExtraToken { token: (start, token, _) } =>
                    (start, format!("Unexpected '{}'", token)),
                ParseError::User { error } => error,
            };
            LoadError::ParseError(format!("{} at {}", msg, self.location(pos)))
        })
    }

    fn analyze_instr(&mut self, ast_instr: &ast::Instr) {
        let loc = self.location(ast_instr.pos);
        let opcode = match get_opcode(&ast_instr.mnemonic) {
            Some(opcode) => opcode,
            None => {
                self.errors.push(format!("Unknown mnemonic '{}' at {}", ast_instr.mnemonic, loc));
                return;
            }
        };

        let cycles = opcode.latency(&self.cpu_config.latency);
        let operands = &ast_instr.operands;
        let mut instr = match (opcode, operands.as_slice()) {
            (Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV,
                [Operand::Register(..), Operand::Register(..), Operand::Register(..)]) => {
                let dest = self.register(&operands[0]);
                let src1 = self.register(&operands[1]);
                let src2 = self.register(&operands[2]);
                match (dest, src1, src2) {
                    (Some(_), Some(_), Some(_)) => Instr::new(opcode, dest, src1, src2, None, cycles),
                    _ => return,
                }
            }
            (Opcode::LW, [Operand::Register(..), Operand::MemoryAccess { offset, base, pos }]) => {
                let dest = self.register(&operands[0]);
                let base = self.register_name(base, *pos);
                match (dest, base) {
                    (Some(_), Some(_)) => Instr::new(opcode, dest, None, base, Some(*offset), cycles),
                    _ => return,
                }
            }
            (Opcode::SW, [Operand::Register(..), Operand::MemoryAccess { offset, base, pos }]) => {
                let src = self.register(&operands[0]);
                let base = self.register_name(base, *pos);
                match (src, base) {
                    (Some(_), Some(_)) => Instr::new(opcode, None, src, base, Some(*offset), cycles),
                    _ => return,
                }
            }
            _ => {
                self.errors.push(format!("'{}' expects operands '{}' at {}", ast_instr.mnemonic, shape(opcode), loc));
                return;
            }
        };

        instr.loc = Some(loc);
        self.code.push(instr);
    }

    fn analyze_directive(&mut self, directive: &ast::Directive) {
        let loc = self.location(directive.pos);
        match (directive.name.as_str(), directive.operands.as_slice()) {
            (".reg", [reg @ Operand::Register(..), Operand::Immediate(value, _)]) => {
                if let Some(reg) = self.register(reg) {
                    self.initial_registers.push((reg, *value));
                }
            }
            (".word", [Operand::Immediate(addr, pos), Operand::Immediate(value, _)]) => {
                if *addr < 0 || *addr >= self.cpu_config.memory_size as i64 {
                    let addr_loc = self.location(*pos);
                    self.errors.push(format!("Address {} outside of memory [0, {}) at {}", addr, self.cpu_config.memory_size, addr_loc));
                } else {
                    self.initial_memory.push((*addr as usize, *value));
                }
            }
            (".reg", _) => self.errors.push(format!("'.reg' expects operands 'rN, value' at {}", loc)),
            (".word", _) => self.errors.push(format!("'.word' expects operands 'addr, value' at {}", loc)),
            (name, _) => self.errors.push(format!("Unknown directive '{}' at {}", name, loc)),
        }
    }

    fn register(&mut self, operand: &Operand) -> Option<RegisterType> {
        match operand {
            Operand::Register(name, pos) => self.register_name(name, *pos),
            _ => None,
        }
    }

    fn register_name(&mut self, name: &str, pos: usize) -> Option<RegisterType> {
        let reg = get_register(name, self.cpu_config.arch_reg_count);
        if reg.is_none() {
            let loc = self.location(pos);
            self.errors.push(format!("Illegal register '{}' at {}", name, loc));
        }
        reg
    }

    // Converts a byte offset into a 1 based line and column.
    fn location(&self, pos: usize) -> SourceLocation {
        let before = &self.src[..pos.min(self.src.len())];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |index| index + 1);
        SourceLocation { line, column: before[line_start..].chars().count() + 1 }
    }
}

fn shape(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV => "rD, rS, rT",
        Opcode::LW => "rD, imm(rB)",
        Opcode::SW => "rS, imm(rB)",
    }
}

pub(crate) fn load(cpu_config: CPUConfig, path: &str) -> Result<Program, LoadError> {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(LoadError::NotFoundError(format!("File '{}' not found", path)));
        }
        Err(err) => {
            return Err(LoadError::IOError(format!("Error reading file '{}': {}", path, err)));
        }
    };

    load_from_string(cpu_config, &src)
}

pub(crate) fn load_from_string(cpu_config: CPUConfig, src: &str) -> Result<Program, LoadError> {
    let loader = Loader {
        cpu_config,
        src,
        code: Vec::new(),
        initial_registers: Vec::new(),
        initial_memory: Vec::new(),
        errors: Vec::new(),
    };

    loader.load()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn load_default(src: &str) -> Result<Program, LoadError> {
        load_from_string(CPUConfig::default(), src)
    }

    fn analysis_errors(src: &str) -> Vec<String> {
        match load_default(src) {
            Err(LoadError::AnalysisError(errors)) => errors,
            other => panic!("expected an analysis error, got {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn test_arithmetic() {
        let program = load_default("add r1, r2, r3\nSUB R4,r5,r6\nmul r7, r8, r9\ndiv r10, r11, r0").unwrap();
        assert_eq!(program.len(), 4);

        let add = program.get(0);
        assert_eq!(add.opcode, Opcode::ADD);
        assert_eq!((add.dest, add.src1, add.src2), (Some(1), Some(2), Some(3)));
        assert_eq!(add.cycles, 2);
        assert_eq!(add.loc, Some(SourceLocation { line: 1, column: 1 }));

        assert_eq!(program.get(1).opcode, Opcode::SUB);
        assert_eq!(program.get(2).cycles, 10);
        assert_eq!(program.get(3).cycles, 40);
        assert_eq!(program.get(3).src2, Some(0));
    }

    #[test]
    fn test_load_store() {
        let program = load_default("lw r1, 8(r2)\nsw r3, -4(r5)").unwrap();

        let lw = program.get(0);
        assert_eq!((lw.dest, lw.src1, lw.src2, lw.imm), (Some(1), None, Some(2), Some(8)));

        let sw = program.get(1);
        assert_eq!((sw.dest, sw.src1, sw.src2, sw.imm), (None, Some(3), Some(5), Some(-4)));
        assert_eq!(sw.to_string(), "sw r3,-4(r5) ; 2:1");
    }

    #[test]
    fn test_directives_and_comments() {
        let src = r#"
# initial state
.reg r2, 40
.word 3, -7   // a data word
    add r1, r2, r2
"#;
        let program = load_default(src).unwrap();
        assert_eq!(program.initial_registers, vec![(2, 40)]);
        assert_eq!(program.initial_memory, vec![(3, -7)]);
        assert_eq!(program.get(0).loc, Some(SourceLocation { line: 5, column: 5 }));
    }

    #[test]
    fn test_latency_comes_from_config() {
        let mut cpu_config = CPUConfig::default();
        cpu_config.latency.add = 7;
        let program = load_from_string(cpu_config, "add r1, r2, r3").unwrap();
        assert_eq!(program.get(0).cycles, 7);
    }

    #[test]
    fn test_errors_are_collected() {
        let errors = analysis_errors("jmp r1, r2\nadd r1, r12, r3\nlw r1, r2\n.foo 1\n.word 5000, 1");
        assert_eq!(errors, vec![
            String::from("Unknown mnemonic 'jmp' at 1:1"),
            String::from("Illegal register 'r12' at 2:9"),
            String::from("'lw' expects operands 'rD, imm(rB)' at 3:1"),
            String::from("Unknown directive '.foo' at 4:1"),
            String::from("Address 5000 outside of memory [0, 1024) at 5:7"),
        ]);
    }

    #[test]
    fn test_temporary_registers_cant_be_named() {
        let errors = analysis_errors("add ra, r1, r2");
        assert_eq!(errors, vec![String::from("Illegal register 'ra' at 1:5")]);
    }

    #[test]
    fn test_empty_program() {
        let errors = analysis_errors("# nothing here\n.reg r1, 5\n");
        assert_eq!(errors, vec![String::from("Program contains no instructions")]);
    }

    #[test]
    fn test_parse_error() {
        let result = load_default("add r1, r2,\n");
        assert!(matches!(result, Err(LoadError::ParseError(_))));

        let result = load_default("add r1; r2");
        match result {
            Err(LoadError::ParseError(msg)) => assert!(msg.ends_with("at 1:7"), "{}", msg),
            other => panic!("unexpected {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = load(CPUConfig::default(), "/nonexistent/program.asm");
        assert!(matches!(result, Err(LoadError::NotFoundError(_))));
    }
}
