//! Suite definition format: schema types and file discovery

pub mod loader;
pub mod schema;

pub use loader::{discover_suites, load_suite};
pub use schema::{Expectation, StepAction, TestCase, TestStep, TestSuite};
