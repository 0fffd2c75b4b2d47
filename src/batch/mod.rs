pub mod aggregate;
pub mod runner;

pub use aggregate::*;
pub use runner::*;
