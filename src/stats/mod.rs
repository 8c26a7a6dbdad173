pub mod collector;
pub mod parser;
