pub mod dataset;
pub mod merge;
pub mod plot;
pub mod sources;

pub use dataset::{paths, run_steps, Step};
pub use merge::merge;
pub use plot::plot;
pub use sources::sources;
