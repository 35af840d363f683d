//! Serverless shared session: peers keep a converged roster, chat log, counter and typing set
//! by broadcasting actions on a bus, with join-time state transfer and local expiry.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod ui;

pub use error::{SessionError, SessionResult};
