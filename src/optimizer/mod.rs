pub mod builder;
pub mod extract;
pub mod instance;
pub mod solver;

pub use builder::*;
pub use extract::*;
pub use instance::*;
pub use solver::*;
