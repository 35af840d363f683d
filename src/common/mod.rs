pub mod commands;
pub mod protocol;
pub mod types;

pub use commands::SessionCommand;
pub use protocol::{Delivery, SessionAction};
pub use types::{ChatMessage, CounterState, SessionSnapshot, User, UserPatch};
