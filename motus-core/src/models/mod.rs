pub mod message;
pub mod session;

pub use message::{estimate_tokens, Message, MessageRole};
pub use session::Session;
