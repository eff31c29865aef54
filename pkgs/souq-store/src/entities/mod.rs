//! Sea-ORM entities for souq-store

pub mod conversations;
pub mod messages;
pub mod participants;

pub use conversations::Entity as Conversations;
pub use messages::Entity as Messages;
pub use participants::Entity as Participants;
