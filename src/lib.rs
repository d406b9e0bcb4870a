pub mod cli;
pub mod config;
pub mod index;
pub mod sink;
pub mod source;
