//! Database models and queries

pub mod analyses;
pub mod init;
pub mod models;
pub mod results;
pub mod users;
mod rows;

pub use init::*;
pub use models::*;
pub use analyses::NewAnalysis;
pub use results::ResultRef;
