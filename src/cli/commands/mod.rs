pub mod batch;
pub mod config;
pub mod generate;
pub mod status;
