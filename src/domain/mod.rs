pub mod device;
pub mod entity;
pub mod market;
pub mod portfolio;
pub mod scenario;
pub mod time_grid;

pub use device::*;
pub use entity::*;
pub use market::*;
pub use portfolio::*;
pub use scenario::*;
pub use time_grid::*;
