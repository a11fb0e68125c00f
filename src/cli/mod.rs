pub mod args;
pub mod command_handlers;
pub mod exit_status;
