pub mod memory_subsystem;
