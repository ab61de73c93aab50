pub mod bootstrap;
pub mod data;

pub use bootstrap::*;
pub use data::*;
