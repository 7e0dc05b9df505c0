pub mod log;
pub mod report;
pub mod signal;
pub mod trace;
