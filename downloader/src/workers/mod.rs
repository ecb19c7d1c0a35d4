pub mod extractor;
pub mod transfer_runner;
