pub mod config_cmd;
pub mod events;
pub mod memory;
pub mod run;
pub mod storage;
