//! Step execution engine: interprets test steps against a session

pub mod capabilities;
pub mod executor;
pub mod matcher;
pub mod report;
pub mod subst;

pub use capabilities::CapabilityManager;
pub use executor::{SideChannels, SuiteRunner};
pub use report::{Diagnostic, RunReport, SuiteReport, TestOutcome, TestReport};
pub use subst::VariableStore;
