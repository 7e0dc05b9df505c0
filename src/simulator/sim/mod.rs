pub mod mode;
pub mod shell;
