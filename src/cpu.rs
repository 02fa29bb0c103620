use std::fs;
use std::thread;
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::backend::backend::{Backend, InstrView, RegisterView, StationView};
use crate::error::{ConfigError, SimError};
use crate::instructions::instructions::{CycleType, Program};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PerfCounters {
    pub issue_cnt: u64,
    pub issue_stall_cnt: u64,
    pub rename_cnt: u64,
    pub write_back_cnt: u64,
    pub commit_cnt: u64,
    pub cycle_cnt: u64,
}

impl PerfCounters {
    pub fn ipc(&self) -> f32 {
        if self.cycle_cnt == 0 {
            return 0.0;
        }
        self.commit_cnt as f32 / self.cycle_cnt as f32
    }
}

#[derive(Clone, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Trace {
    pub issue: bool,
    pub execute: bool,
    pub commit: bool,
    pub cycle: bool,
}

/// Latency in cycles of every opcode.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Latencies {
    pub add: u32,
    pub sub: u32,
    pub mul: u32,
    pub div: u32,
    pub lw: u32,
    pub sw: u32,
}

impl Default for Latencies {
    fn default() -> Self {
        Latencies { add: 2, sub: 2, mul: 10, div: 40, lw: 5, sw: 5 }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct CPUConfig {
    // the number of architectural (program visible) registers
    pub(crate) arch_reg_count: u16,
    // the number of temporary registers available for renaming
    pub(crate) temp_reg_count: u16,
    // the number of reservation stations per functional unit class
    pub(crate) add_rs_count: u16,
    pub(crate) mul_rs_count: u16,
    pub(crate) load_rs_count: u16,
    pub(crate) latency: Latencies,
    // the number of instructions that can commit per clock cycle
    pub(crate) commit_n_wide: u8,
    // the size of the data memory in machine words
    pub(crate) memory_size: u32,
    // the frequency of the CPU in Hz when running in batch mode; 0 runs unpaced.
    pub(crate) frequency_hz: u64,
    // run() gives up after this many cycles; 0 means never.
    pub(crate) cycle_limit: u64,
    // which pipeline phases should be traced (logged)
    pub(crate) trace: Trace,
}

impl Default for CPUConfig {
    fn default() -> Self {
        CPUConfig {
            arch_reg_count: 12,
            temp_reg_count: 24,
            add_rs_count: 2,
            mul_rs_count: 2,
            load_rs_count: 2,
            latency: Latencies::default(),
            commit_n_wide: 1,
            memory_size: 1024,
            frequency_hz: 0,
            cycle_limit: 100_000,
            trace: Trace::default(),
        }
    }
}

impl CPUConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let latency = &self.latency;
        let latencies = [
            ("add", latency.add), ("sub", latency.sub), ("mul", latency.mul),
            ("div", latency.div), ("lw", latency.lw), ("sw", latency.sw)];
        for (name, cycles) in latencies {
            if cycles == 0 {
                return Err(ConfigError::Invalid(format!("latency of '{}' must be at least 1 cycle", name)));
            }
        }

        if self.arch_reg_count == 0 {
            return Err(ConfigError::Invalid(String::from("arch_reg_count must be at least 1")));
        }
        let reg_count = self.arch_reg_count as u32 + self.temp_reg_count as u32;
        if reg_count > u16::MAX as u32 {
            return Err(ConfigError::Invalid(format!("arch_reg_count + temp_reg_count must not exceed {}", u16::MAX)));
        }
        let rs_count = self.add_rs_count as u32 + self.mul_rs_count as u32 + self.load_rs_count as u32;
        if rs_count > u16::MAX as u32 {
            return Err(ConfigError::Invalid(format!("the total number of reservation stations must not exceed {}", u16::MAX)));
        }
        if self.commit_n_wide == 0 {
            return Err(ConfigError::Invalid(String::from("commit_n_wide must be at least 1")));
        }
        if self.memory_size == 0 {
            return Err(ConfigError::Invalid(String::from("memory_size must be at least 1")));
        }
        Ok(())
    }

    pub(crate) fn rs_count(&self) -> u16 {
        self.add_rs_count + self.mul_rs_count + self.load_rs_count
    }
}

pub(crate) fn load_cpu_config(file_path: &str) -> Result<CPUConfig, ConfigError> {
    let yaml = fs::read_to_string(file_path).map_err(|source| ConfigError::IOError {
        path: String::from(file_path),
        source,
    })?;
    parse_cpu_config(&yaml)
}

pub(crate) fn parse_cpu_config(yaml: &str) -> Result<CPUConfig, ConfigError> {
    let config: CPUConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CycleStatus {
    Continuing,
    Complete,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RunOutcome {
    Complete { cycles: CycleType },
    // the cycle limit was hit before the program could complete
    Stalled { cycles: CycleType },
}

/// The clock. It owns the complete simulation state and is the only way to
/// mutate it.
pub(crate) struct CPU {
    backend: Backend,
    cycle_period: Option<Duration>,
    cycle_limit: u64,
    trace: Trace,
    perf_counters: PerfCounters,
    fault: Option<SimError>,
}

impl CPU {
    pub(crate) fn new(cpu_config: &CPUConfig, program: Program) -> CPU {
        let cycle_period = if cpu_config.frequency_hz == 0 {
            None
        } else {
            Some(Duration::from_micros(1_000_000 / cpu_config.frequency_hz))
        };

        CPU {
            backend: Backend::new(cpu_config, program),
            cycle_period,
            cycle_limit: cpu_config.cycle_limit,
            trace: cpu_config.trace.clone(),
            perf_counters: PerfCounters::default(),
            fault: None,
        }
    }

    /// Advances the simulation by a single clock cycle: issue, execute, commit.
    /// Once the program is complete this is a no-op.
    pub(crate) fn advance_cycle(&mut self) -> Result<CycleStatus, SimError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }

        if self.backend.is_done() {
            return Ok(CycleStatus::Complete);
        }

        self.perf_counters.cycle_cnt += 1;
        let cycle = self.perf_counters.cycle_cnt;

        if let Err(error) = self.backend.do_cycle(cycle, &mut self.perf_counters) {
            self.fault = Some(error.clone());
            return Err(error);
        }

        if self.trace.cycle {
            let perf_counters = &self.perf_counters;
            info!("[Cycles:{}][Issued={}][Stalls={}][Renamed={}][WrittenBack={}][Committed={}][IPC={:.2}]",
                  perf_counters.cycle_cnt,
                  perf_counters.issue_cnt,
                  perf_counters.issue_stall_cnt,
                  perf_counters.rename_cnt,
                  perf_counters.write_back_cnt,
                  perf_counters.commit_cnt,
                  perf_counters.ipc());
        }

        if self.backend.is_done() {
            Ok(CycleStatus::Complete)
        } else {
            Ok(CycleStatus::Continuing)
        }
    }

    /// Advances until the program completes or the cycle limit is reached.
    pub(crate) fn run(&mut self) -> Result<RunOutcome, SimError> {
        loop {
            if self.cycle_limit != 0 && self.current_cycle() >= self.cycle_limit && !self.backend.is_done() {
                return Ok(RunOutcome::Stalled { cycles: self.current_cycle() });
            }

            if self.advance_cycle()? == CycleStatus::Complete {
                return Ok(RunOutcome::Complete { cycles: self.current_cycle() });
            }

            if let Some(cycle_period) = self.cycle_period {
                thread::sleep(cycle_period);
            }
        }
    }

    pub(crate) fn current_cycle(&self) -> CycleType {
        self.perf_counters.cycle_cnt
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.backend.is_done()
    }

    pub(crate) fn perf_counters(&self) -> &PerfCounters {
        &self.perf_counters
    }

    pub(crate) fn queued(&self) -> usize {
        self.backend.queued()
    }

    pub(crate) fn in_flight(&self) -> u16 {
        self.backend.in_flight()
    }

    pub(crate) fn station_snapshot(&self) -> Vec<StationView> {
        self.backend.station_snapshot()
    }

    pub(crate) fn register_snapshot(&self) -> Vec<RegisterView> {
        self.backend.register_snapshot()
    }

    pub(crate) fn instruction_snapshot(&self) -> Vec<InstrView> {
        self.backend.instruction_snapshot()
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }
}
