// Application layer - the balance engine and its error taxonomy.
// Transport concerns (validation, status codes) live in `api`.

pub mod error;
pub mod service;

pub use error::*;
pub use service::*;
