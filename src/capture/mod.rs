pub mod listener;
pub mod parser;
