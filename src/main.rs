use std::io;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

use lalrpop_util::lalrpop_mod;
use log::{error, info};
use structopt::StructOpt;

use crate::cpu::{CPU, CPUConfig, CycleStatus, load_cpu_config, RunOutcome};
use crate::error::SimError;
use crate::instructions::instructions::mnemonic;
use crate::loader::loader::{load, LoadError};

mod cpu;
mod error;
mod loader;
mod backend;
mod instructions;
mod memory_subsystem;

lalrpop_mod!(pub assembly, "/loader/assembly.rs");

#[derive(StructOpt, Debug)]
#[structopt(name = "Tomasulo Simulator")]
struct Opt {
    /// Path of the program to load
    #[structopt(short, long, parse(from_os_str))]
    file: PathBuf,

    /// Sets a custom config file; the built-in defaults are used otherwise
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Runs the program to completion and prints the final state
    #[structopt(short, long)]
    batch: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::from_args();

    let cpu_config = match &opt.config {
        Some(path) => {
            let cpu_config_path = path.to_string_lossy();
            match load_cpu_config(&cpu_config_path) {
                Ok(config) => config,
                Err(err) => {
                    error!("Failed to load {}. Cause: {}", cpu_config_path, err);
                    exit(1);
                }
            }
        }
        None => CPUConfig::default(),
    };

    let path = opt.file.to_string_lossy();
    info!("Loading {}", path);
    let program = match load(cpu_config.clone(), &path) {
        Ok(program) => program,
        Err(err) => {
            error!("Loading program '{}' failed.", path);
            match err {
                LoadError::AnalysisError(msg_vec) => {
                    for msg in msg_vec {
                        error!("{}", msg);
                    }
                }
                LoadError::ParseError(msg) |
                LoadError::NotFoundError(msg) |
                LoadError::IOError(msg) => error!("{}", msg),
            }
            exit(1);
        }
    };

    let mut cpu = CPU::new(&cpu_config, program);
    if opt.batch {
        run_batch(&mut cpu);
    } else {
        run_interactive(&mut cpu);
    }
}

fn run_batch(cpu: &mut CPU) {
    match cpu.run() {
        Ok(RunOutcome::Complete { cycles }) => {
            info!("All operations done in {} cycles", cycles);
            print_timeline(cpu);
            print_registers(cpu);
            print_stats(cpu);
        }
        Ok(RunOutcome::Stalled { cycles }) => {
            error!("Program did not complete within {} cycles", cycles);
            print_stations(cpu);
            print_timeline(cpu);
            exit(2);
        }
        Err(err) => {
            report_fault(cpu, &err);
            exit(2);
        }
    }
}

fn run_interactive(cpu: &mut CPU) {
    println!("Tomasulo simulator");
    print_menu();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(">");
        let _ = io::stdout().flush();

        let input = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        match input.trim() {
            "next" | "n" => match cpu.advance_cycle() {
                Ok(CycleStatus::Complete) => println!("All operations done"),
                Ok(CycleStatus::Continuing) => println!("Cycle: {}", cpu.current_cycle()),
                Err(err) => report_fault(cpu, &err),
            },
            "clock" | "c" => println!("Cycle: {}", cpu.current_cycle()),
            "registers" | "r" => print_registers(cpu),
            "fus" | "f" => print_stations(cpu),
            "timeline" | "t" => print_timeline(cpu),
            "stats" | "s" => print_stats(cpu),
            "run" => match cpu.run() {
                Ok(RunOutcome::Complete { cycles }) => println!("All operations done in {} cycles", cycles),
                Ok(RunOutcome::Stalled { cycles }) => println!("Gave up after {} cycles", cycles),
                Err(err) => report_fault(cpu, &err),
            },
            "exit" | "e" => break,
            _ => {
                println!("Invalid command");
                print_menu();
            }
        }
    }

    if cpu.is_complete() {
        println!("Simulation complete");
    }
}

fn report_fault(cpu: &CPU, err: &SimError) {
    error!("Simulation halted at cycle {}: {}", cpu.current_cycle(), err);
}

fn print_menu() {
    println!("Menu:");
    println!("\tNext (n)            advance one cycle");
    println!("\tClock (c)           show the current cycle");
    println!("\tRegisters (r)       show the register file");
    println!("\tFunctional units (f)");
    println!("\tTimeline (t)        show the cycle stamps per instruction");
    println!("\tStats (s)");
    println!("\tRun                 advance until the program completes");
    println!("\tExit (e)");
}

fn dash<T: ToString>(value: Option<T>) -> String {
    value.map_or(String::from("-"), |value| value.to_string())
}

fn print_stations(cpu: &CPU) {
    println!("Functional units:");
    println!("{:<6}{:<8}{:<6}{:<4}{:<6}{:<6}{:<10}{:<10}{:<8}{:<8}", "Time", "FU", "Busy", "#", "Op", "Dest", "Vj", "Vk", "Qj", "Qk");
    for station in cpu.station_snapshot() {
        println!("{:<6}{:<8}{:<6}{:<4}{:<6}{:<6}{:<10}{:<10}{:<8}{:<8}",
                 dash(station.time_left.filter(|_| station.busy)),
                 station.name,
                 if station.busy { 1 } else { 0 },
                 dash(station.instr),
                 dash(station.opcode.map(mnemonic)),
                 dash(station.dest),
                 dash(station.vj),
                 dash(station.vk),
                 dash(station.qj),
                 dash(station.qk));
    }
    println!();
}

fn print_registers(cpu: &CPU) {
    let registers = cpu.register_snapshot();
    let (arch, temps): (Vec<_>, Vec<_>) = registers.iter().partition(|register| !register.temp);

    println!("Registers:");
    println!("{:<26}| Temporaries", "Architectural");
    let rows = arch.len().max((temps.len() + 1) / 2);
    for row in 0..rows {
        let mut line = match arch.get(row) {
            Some(register) => format!("{:<5}{:<15}{:<6}", register.name, register.value, dash(register.renamed_to.as_ref())),
            None => format!("{:<26}", ""),
        };
        line.push('|');
        for temp in [temps.get(row), temps.get(row + rows)].into_iter().flatten() {
            line.push_str(&format!(" {:<4}{:<12}{:<13}{:<4}", temp.name, temp.value, format!("{:?}", temp.usage), temp.ref_count));
        }
        println!("{}", line);
    }
    println!();
}

fn print_timeline(cpu: &CPU) {
    println!("{:<4}{:<28}{:<8}{:<8}{:<8}{:<8}{:<8}", "#", "Instruction", "FU", "Issue", "Exec", "Write", "Commit");
    for instr in cpu.instruction_snapshot() {
        println!("{:<4}{:<28}{:<8}{:<8}{:<8}{:<8}{:<8}",
                 instr.index,
                 instr.text,
                 dash(instr.station),
                 dash(instr.issue),
                 dash(instr.exec),
                 dash(instr.write),
                 dash(instr.commit));
    }
    println!();
}

fn print_stats(cpu: &CPU) {
    let perf_counters = cpu.perf_counters();
    println!("Cycles:       {}", perf_counters.cycle_cnt);
    println!("Issued:       {}", perf_counters.issue_cnt);
    println!("Issue stalls: {}", perf_counters.issue_stall_cnt);
    println!("Renamed:      {}", perf_counters.rename_cnt);
    println!("Written back: {}", perf_counters.write_back_cnt);
    println!("Committed:    {}", perf_counters.commit_cnt);
    println!("Queued:       {}", cpu.queued());
    println!("In flight:    {}", cpu.in_flight());
    println!("IPC:          {:.2}", perf_counters.ipc());
    println!();
}
