pub mod auth;
pub mod caseversion_handlers;
pub mod environment_handlers;
pub mod error;
pub mod handlers;
pub mod product_handlers;
pub mod routes;
pub mod schema;
pub mod tag_handlers;

pub use error::*;
pub use handlers::*;
pub use routes::*;
pub use schema::*;
