pub mod backend;
pub mod execution_unit;
pub mod register_alias_table;
pub mod register_file;
pub mod reorder_buffer;
pub mod reservation_station;
