pub mod chat;
pub mod chat_core;
pub mod database;
pub mod registry;
pub mod revision;
pub mod session;
pub mod store;
pub mod synchronizer;

pub use chat::SendOutcome;
pub use chat_core::{ChatCore, ChatSnapshot, SyncOutcome};
pub use database::Database;
pub use session::SessionGate;
