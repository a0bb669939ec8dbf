pub mod alignment;
pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod diff;
pub mod drift;
pub mod drift_check;
pub mod error;
pub mod export;
pub mod governance;
pub mod import;
pub mod intelligence;
pub mod llm_settings;
pub mod model;
pub mod notify;
pub mod page;
pub mod proposal;
pub mod reality;
pub mod refinement;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod token;
pub mod types;

pub use error::{Result, SpecError};
pub use service::Service;
pub use store::Store;
