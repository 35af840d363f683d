pub mod gc;
pub mod identity;
pub mod runner;
pub mod state;
pub mod sync;

pub use identity::Identity;
pub use runner::{SessionHandle, SessionRunner};
pub use state::Session;
