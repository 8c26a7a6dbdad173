pub mod engine;
pub mod installer;
pub mod registry;
pub mod stall;

#[cfg(test)]
pub(crate) mod testing;
