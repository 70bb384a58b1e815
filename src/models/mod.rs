pub mod conversation;
pub mod message;
pub mod notice;

pub use conversation::ConversationRecord;
pub use message::Message;
pub use notice::Notice;
