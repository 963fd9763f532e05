//! Wire types and error taxonomy shared by the csvchat client modules.

pub mod error;
pub mod messages;

pub use error::ApiError;
pub use messages::*;
