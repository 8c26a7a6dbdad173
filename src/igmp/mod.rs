pub mod manager;
pub mod message;
pub mod socket;
