//! CSV adapters used by the command-line interface.

pub mod request_reader;
pub mod result_writer;
