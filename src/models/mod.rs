pub mod identity;
pub mod schema;

pub use identity::*;
pub use schema::*;
