pub mod announcement;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod types;

pub use announcement::Announcement;
pub use constants::*;
pub use envelope::{Envelope, MessageKind};
pub use error::ProtocolError;
pub use types::*;
