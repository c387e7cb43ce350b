pub mod api;
pub mod models;
pub mod policy;

pub use models::{
    Contact, ConversationSummary, LibraryId, Message, MessageId, RequestContext, Role, UserId,
};
pub use policy::AudienceSelector;
