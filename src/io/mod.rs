pub mod loader;
pub mod writer;

pub use loader::{load_portfolio, DataFiles, DataNeeds, DataSource};
pub use writer::{write_costs, write_outputs, write_trajectory, ScenarioSummary};
