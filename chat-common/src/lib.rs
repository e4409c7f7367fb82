pub mod constants;
pub mod error;
pub mod helpers;
pub mod protocol;
pub mod types;
pub mod validators;

pub use error::ChatError;
pub use types::Secret;
