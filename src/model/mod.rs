pub mod case;
pub mod common;
pub mod page;
pub mod product;
pub mod selection;
pub mod tags;
pub mod user_context;

pub use case::*;
pub use common::*;
pub use page::*;
pub use product::*;
pub use selection::*;
pub use tags::*;
pub use user_context::*;
