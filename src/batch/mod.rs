pub mod coordinator;
pub mod types;

pub use coordinator::*;
pub use types::*;
