pub mod mem;
pub mod sim;
