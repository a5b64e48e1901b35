pub mod analytics;
pub mod core;
pub mod evaluations;
pub mod frameworks;
pub mod setup;
pub mod students;
