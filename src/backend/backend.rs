use log::{debug, info};

use crate::backend::execution_unit::{effective_address, execute, ExecResult};
use crate::backend::register_alias_table::RAT;
use crate::backend::register_file::{RegFile, RegUsage};
use crate::backend::reorder_buffer::ROB;
use crate::backend::reservation_station::{RSIndex, RSState, RSTable};
use crate::cpu::{CPUConfig, PerfCounters, Trace};
use crate::error::SimError;
use crate::instructions::instructions::{CycleType, InstrIndex, InstrQueue, Opcode, Program, RegisterType, stamp, WordType};
use crate::memory_subsystem::memory_subsystem::{ForwardResult, MemorySubsystem};

/// A read-only copy of a reservation station for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StationView {
    pub name: String,
    pub busy: bool,
    pub instr: Option<InstrIndex>,
    pub opcode: Option<Opcode>,
    pub dest: Option<String>,
    // None if the operand isn't captured (or doesn't exist)
    pub vj: Option<WordType>,
    pub vk: Option<WordType>,
    pub qj: Option<String>,
    pub qk: Option<String>,
    pub time_left: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegisterView {
    pub name: String,
    pub temp: bool,
    pub value: WordType,
    pub usage: RegUsage,
    pub renamed_to: Option<String>,
    pub ref_count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstrView {
    pub index: InstrIndex,
    pub text: String,
    pub station: Option<String>,
    pub issue: Option<CycleType>,
    pub exec: Option<CycleType>,
    pub write: Option<CycleType>,
    pub commit: Option<CycleType>,
}

/// The out of order core: issue, execute and commit over a single owned
/// copy of the machine state.
pub(crate) struct Backend {
    program: Program,
    instr_queue: InstrQueue,
    reg_file: RegFile,
    rat: RAT,
    rs_table: RSTable,
    rob: ROB,
    memory_subsystem: MemorySubsystem,
    trace: Trace,
    commit_n_wide: u8,
}

impl Backend {
    pub(crate) fn new(cpu_config: &CPUConfig, program: Program) -> Backend {
        let mut reg_file = RegFile::new(cpu_config.arch_reg_count, cpu_config.temp_reg_count);
        for &(reg, value) in &program.initial_registers {
            reg_file.set_value(reg, value);
        }

        let mut memory_subsystem = MemorySubsystem::new(cpu_config);
        memory_subsystem.init(&program);

        Backend {
            instr_queue: InstrQueue::new(&program),
            rat: RAT::new(reg_file.count()),
            reg_file,
            rs_table: RSTable::new(cpu_config.add_rs_count, cpu_config.mul_rs_count, cpu_config.load_rs_count),
            rob: ROB::new(cpu_config.rs_count()),
            memory_subsystem,
            trace: cpu_config.trace.clone(),
            commit_n_wide: cpu_config.commit_n_wide,
            program,
        }
    }

    pub(crate) fn do_cycle(&mut self, cycle: CycleType, perf_counters: &mut PerfCounters) -> Result<(), SimError> {
        self.cycle_issue(cycle, perf_counters)?;
        self.cycle_execute(cycle, perf_counters)?;
        self.cycle_commit(cycle, perf_counters)?;
        Ok(())
    }

    /// Nothing left to issue, execute or commit.
    pub(crate) fn is_done(&self) -> bool {
        self.instr_queue.is_empty() && self.rs_table.all_idle() && self.rob.is_empty()
    }

    // Issues the instruction at the head of the queue if there is room for it.
    fn cycle_issue(&mut self, cycle: CycleType, perf_counters: &mut PerfCounters) -> Result<(), SimError> {
        let instr_index = match self.instr_queue.peek() {
            Some(instr_index) => instr_index,
            None => return Ok(()),
        };

        if !self.rob.has_space() {
            debug!("Issue stall: ROB full for [{}]", self.program.get(instr_index));
            perf_counters.issue_stall_cnt += 1;
            return Ok(());
        }

        let class = self.program.get(instr_index).opcode.fu_class();
        let rs_index = match self.rs_table.find_idle(class) {
            Some(rs_index) => rs_index,
            None => {
                debug!("Issue stall: no idle {} station for [{}]", class.name(), self.program.get(instr_index));
                perf_counters.issue_stall_cnt += 1;
                return Ok(());
            }
        };

        let renamed = self.rat.rename(&mut self.reg_file, instr_index, self.program.get(instr_index))?;
        self.rs_table.allocate(rs_index, instr_index)?;
        self.rob.allocate();
        self.instr_queue.dequeue();

        let instr = self.program.get_mut(instr_index);
        if renamed.dest != instr.dest {
            perf_counters.rename_cnt += 1;
        }
        instr.renamed = Some(renamed);
        instr.station = Some(rs_index);
        stamp(&mut instr.issue, cycle);
        perf_counters.issue_cnt += 1;

        if self.trace.issue {
            info!("Issued [{}] to {}", instr, self.rs_table.get(rs_index).name());
        }
        Ok(())
    }

    // Advances every station by one cycle, in table order.
    fn cycle_execute(&mut self, cycle: CycleType, perf_counters: &mut PerfCounters) -> Result<(), SimError> {
        for rs_index in 0..self.rs_table.capacity {
            let rs = self.rs_table.get(rs_index);
            let state = rs.state;
            let instr_index = match rs.instr {
                Some(instr_index) => instr_index,
                None => continue,
            };

            match state {
                RSState::IDLE => self.bind(rs_index, instr_index, cycle),
                RSState::BUSY => self.step(rs_index, instr_index, cycle, perf_counters)?,
            }
        }
        Ok(())
    }

    // The station picks up the instruction issued to it this cycle.
    fn bind(&mut self, rs_index: RSIndex, instr_index: InstrIndex, cycle: CycleType) {
        let instr = self.program.get(instr_index);
        let renamed = instr.renamed.unwrap_or_default();
        let cycles = instr.cycles;

        let src_j = renamed.src1.map(|reg| self.capture(reg, cycle));
        let src_k = renamed.src2.map(|reg| self.capture(reg, cycle));

        let rs = self.rs_table.get_mut(rs_index);
        rs.state = RSState::BUSY;
        rs.cycles_remaining = Some(cycles);
        if let Some(operand) = src_j {
            match operand {
                Operand::Ready(value) => rs.vj = value,
                Operand::Pending { producer, station } => {
                    rs.lock_j = true;
                    rs.qj = station;
                    rs.producer_j = Some(producer);
                }
            }
        }
        if let Some(operand) = src_k {
            match operand {
                Operand::Ready(value) => rs.vk = value,
                Operand::Pending { producer, station } => {
                    rs.lock_k = true;
                    rs.qk = station;
                    rs.producer_k = Some(producer);
                }
            }
        }

        if let Some(dest) = renamed.dest {
            self.reg_file.mark_destination(dest, rs_index, instr_index);
        }

        if self.rs_table.get(rs_index).is_locked() {
            debug!("{} waits for operands of [{}]", self.rs_table.get(rs_index).name(), self.program.get(instr_index));
        }
    }

    // Reads a source slot, or finds the instruction that is still going to produce it.
    fn capture(&self, reg: RegisterType, cycle: CycleType) -> Operand {
        if let Some(producer) = self.reg_file.get(reg).last_writer {
            let producer_instr = self.program.get(producer);
            if !producer_instr.written_back_before(cycle) {
                return Operand::Pending { producer, station: producer_instr.station };
            }
        }
        Operand::Ready(self.reg_file.get_value(reg))
    }

    fn step(&mut self,
            rs_index: RSIndex,
            instr_index: InstrIndex,
            cycle: CycleType,
            perf_counters: &mut PerfCounters) -> Result<(), SimError> {
        let renamed = self.program.get(instr_index).renamed.unwrap_or_default();

        // operand wait: every locked operand is checked on its own
        let mut captured = false;
        let rs = self.rs_table.get(rs_index);
        let (lock_j, producer_j, lock_k, producer_k) = (rs.lock_j, rs.producer_j, rs.lock_k, rs.producer_k);
        if lock_j && self.unlocks(producer_j, cycle) {
            let value = renamed.src1.map_or(0, |reg| self.reg_file.get_value(reg));
            let rs = self.rs_table.get_mut(rs_index);
            rs.vj = value;
            rs.lock_j = false;
            rs.qj = None;
            captured = true;
        }
        if lock_k && self.unlocks(producer_k, cycle) {
            let value = renamed.src2.map_or(0, |reg| self.reg_file.get_value(reg));
            let rs = self.rs_table.get_mut(rs_index);
            rs.vk = value;
            rs.lock_k = false;
            rs.qk = None;
            captured = true;
        }

        let rs = self.rs_table.get(rs_index);
        if captured || rs.is_locked() {
            return Ok(());
        }

        // countdown
        let cycles_remaining = rs.cycles_remaining.unwrap_or(0).saturating_sub(1);
        let instr = self.program.get_mut(instr_index);
        if instr.exec.is_none() {
            stamp(&mut instr.exec, cycle);
            if self.trace.execute {
                info!("Executing [{}] on {}", instr, self.rs_table.get(rs_index).name());
            }
        }

        if cycles_remaining > 0 {
            self.rs_table.get_mut(rs_index).cycles_remaining = Some(cycles_remaining);
            return Ok(());
        }

        // a load holds its last cycle until every older store has an address
        let forward = self.forward_load(rs_index, instr_index);
        if forward == ForwardResult::Stall {
            debug!("{} holds [{}] behind an older store", self.rs_table.get(rs_index).name(), self.program.get(instr_index));
            return Ok(());
        }

        self.rs_table.get_mut(rs_index).cycles_remaining = Some(0);
        self.complete(rs_index, instr_index, cycle, forward, perf_counters)
    }

    // Checks a load against the older stores that haven't committed, youngest first.
    fn forward_load(&self, rs_index: RSIndex, instr_index: InstrIndex) -> ForwardResult {
        let instr = self.program.get(instr_index);
        if instr.opcode != Opcode::LW {
            return ForwardResult::Miss;
        }

        let addr = effective_address(self.rs_table.get(rs_index).vk, instr.imm.unwrap_or(0));
        let oldest = self.rob.seq_committed as InstrIndex;
        for older in (oldest..instr_index).rev() {
            let older_instr = self.program.get(older);
            if older_instr.opcode != Opcode::SW {
                continue;
            }
            match older_instr.store {
                None => return ForwardResult::Stall,
                Some((store_addr, value)) if self.memory_subsystem.same_word(store_addr, addr) => {
                    return ForwardResult::Hit(value);
                }
                Some(_) => {}
            }
        }
        ForwardResult::Miss
    }

    fn unlocks(&self, producer: Option<InstrIndex>, cycle: CycleType) -> bool {
        producer.map_or(true, |producer| self.program.get(producer).written_back_before(cycle))
    }

    // Write-back: publish the result, undo the renaming and hand the instruction to the ROB.
    fn complete(&mut self,
                rs_index: RSIndex,
                instr_index: InstrIndex,
                cycle: CycleType,
                forward: ForwardResult,
                perf_counters: &mut PerfCounters) -> Result<(), SimError> {
        let rs = self.rs_table.get(rs_index);
        let instr = self.program.get(instr_index);
        let renamed = instr.renamed.unwrap_or_default();
        let result = match forward {
            ForwardResult::Hit(value) => ExecResult::Value(value),
            _ => execute(instr.opcode, rs.vj, rs.vk, instr.imm, &self.memory_subsystem),
        };

        let instr = self.program.get_mut(instr_index);
        stamp(&mut instr.write, cycle);
        match result {
            ExecResult::Value(value) => {
                instr.result = Some(value);
                match renamed.dest {
                    Some(dest) => self.reg_file.write_back(dest, value),
                    None => return Err(SimError::StructuralViolation(
                        format!("[{}] produced a value without a destination", instr))),
                }
            }
            ExecResult::Store { addr, value } => instr.store = Some((addr, value)),
        }

        if self.trace.execute {
            info!("Written back [{}] result={:?}", instr, instr.result);
        }

        for reg in [renamed.src1, renamed.src2, renamed.dest].into_iter().flatten() {
            self.rat.release(&mut self.reg_file, reg);
        }

        self.rob.push_completed(instr_index)?;
        self.rs_table.deallocate(rs_index);
        perf_counters.write_back_cnt += 1;
        Ok(())
    }

    // Commits completed instructions in program order.
    fn cycle_commit(&mut self, cycle: CycleType, perf_counters: &mut PerfCounters) -> Result<(), SimError> {
        for _ in 0..self.commit_n_wide {
            let instr_index = match self.rob.next_committable() {
                Some(instr_index) => instr_index,
                None => break,
            };

            let instr = self.program.get_mut(instr_index);
            stamp(&mut instr.commit, cycle);

            let renamed = instr.renamed.unwrap_or_default();
            if let (Some(arch_reg), Some(dest)) = (instr.dest, renamed.dest) {
                if dest != arch_reg {
                    let value = self.reg_file.get_value(dest);
                    self.reg_file.set_value(arch_reg, value);
                    self.rat.retire_destination(&mut self.reg_file, dest);
                }
            }

            if let Some((addr, value)) = instr.store {
                self.memory_subsystem.store(addr, value);
            }

            perf_counters.commit_cnt += 1;
            if self.trace.commit {
                info!("Committed [{}]", instr);
            }
        }
        Ok(())
    }

    pub(crate) fn station_snapshot(&self) -> Vec<StationView> {
        self.rs_table.iter().map(|rs| {
            let instr = rs.instr.map(|instr_index| self.program.get(instr_index));
            let renamed = instr.and_then(|instr| instr.renamed).unwrap_or_default();
            let bound = rs.state == RSState::BUSY;
            let station_name = |station: Option<RSIndex>| station.map(|index| self.rs_table.get(index).name());

            StationView {
                name: rs.name(),
                busy: bound,
                instr: rs.instr,
                opcode: instr.map(|instr| instr.opcode),
                dest: renamed.dest.map(|reg| self.reg_file.name(reg)),
                vj: if bound && renamed.src1.is_some() && !rs.lock_j { Some(rs.vj) } else { None },
                vk: if bound && renamed.src2.is_some() && !rs.lock_k { Some(rs.vk) } else { None },
                qj: if rs.lock_j { station_name(rs.qj) } else { None },
                qk: if rs.lock_k { station_name(rs.qk) } else { None },
                time_left: rs.cycles_remaining,
            }
        }).collect()
    }

    pub(crate) fn register_snapshot(&self) -> Vec<RegisterView> {
        (0..self.reg_file.count()).map(|reg| {
            let entry = self.reg_file.get(reg);
            let rat_entry = self.rat.get(reg);
            RegisterView {
                name: self.reg_file.name(reg),
                temp: self.reg_file.is_temp(reg),
                value: entry.value,
                usage: entry.usage,
                renamed_to: rat_entry.renamed_to.map(|temp| self.reg_file.name(temp)),
                ref_count: rat_entry.ref_count,
            }
        }).collect()
    }

    pub(crate) fn instruction_snapshot(&self) -> Vec<InstrView> {
        self.program.code.iter().enumerate().map(|(index, instr)| InstrView {
            index,
            text: instr.to_string(),
            station: instr.station.map(|rs_index| self.rs_table.get(rs_index).name()),
            issue: instr.issue,
            exec: instr.exec,
            write: instr.write,
            commit: instr.commit,
        }).collect()
    }

    #[cfg(test)]
    pub(crate) fn memory(&self) -> &[WordType] {
        &self.memory_subsystem.memory
    }

    /// The number of instructions waiting to be issued.
    pub(crate) fn queued(&self) -> usize {
        self.instr_queue.size()
    }

    /// The number of issued, not yet committed instructions.
    pub(crate) fn in_flight(&self) -> u16 {
        self.rob.size()
    }
}

enum Operand {
    Ready(WordType),
    Pending { producer: InstrIndex, station: Option<RSIndex> },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::instructions::instructions::Instr;

    use super::*;

    fn program(code: Vec<Instr>) -> Program {
        Program { code, ..Program::default() }
    }

    fn cycle(backend: &mut Backend, cycle: CycleType) {
        let mut perf_counters = PerfCounters::default();
        backend.do_cycle(cycle, &mut perf_counters).unwrap();
    }

    #[test]
    fn test_issue_binds_lowest_idle_station() {
        let code = vec![
            Instr::new(Opcode::ADD, Some(1), Some(2), Some(3), None, 2),
            Instr::new(Opcode::SUB, Some(4), Some(2), Some(3), None, 2),
        ];
        let mut backend = Backend::new(&CPUConfig::default(), program(code));

        cycle(&mut backend, 1);
        cycle(&mut backend, 2);

        let stations = backend.station_snapshot();
        assert_eq!(stations[0].instr, Some(0));
        assert_eq!(stations[1].instr, Some(1));
        assert_eq!(stations[0].opcode, Some(Opcode::ADD));
        assert_eq!(stations[1].time_left, Some(2));
        assert!(stations[2].instr.is_none());
    }

    #[test]
    fn test_locked_operand_shows_producer_station() {
        let code = vec![
            Instr::new(Opcode::MUL, Some(1), Some(2), Some(3), None, 10),
            Instr::new(Opcode::ADD, Some(4), Some(1), Some(5), None, 2),
        ];
        let mut backend = Backend::new(&CPUConfig::default(), program(code));

        cycle(&mut backend, 1);
        cycle(&mut backend, 2);

        let add1 = &backend.station_snapshot()[0];
        assert_eq!(add1.qj, Some(String::from("mult1")));
        assert_eq!(add1.vj, None);
        assert_eq!(add1.vk, Some(0));
        assert_eq!(add1.qk, None);
    }

    #[test]
    fn test_done_after_commit() {
        let code = vec![Instr::new(Opcode::ADD, Some(1), Some(2), Some(3), None, 1)];
        let mut backend = Backend::new(&CPUConfig::default(), program(code));
        assert!(!backend.is_done());
        assert_eq!(backend.queued(), 1);

        cycle(&mut backend, 1);
        assert_eq!(backend.queued(), 0);
        assert_eq!(backend.in_flight(), 1);
        cycle(&mut backend, 2);
        assert!(backend.is_done());
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn test_initial_state_is_applied() {
        let program = Program {
            code: vec![],
            initial_registers: vec![(2, 40)],
            initial_memory: vec![(3, 9)],
        };
        let backend = Backend::new(&CPUConfig::default(), program);
        assert_eq!(backend.register_snapshot()[2].value, 40);
        assert_eq!(backend.memory()[3], 9);
        assert!(backend.is_done());
    }
}
