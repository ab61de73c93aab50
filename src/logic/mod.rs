pub mod authorize;
pub mod reconcile;
pub mod validate;

pub use authorize::*;
pub use reconcile::*;
pub use validate::*;
