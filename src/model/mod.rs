//! Domain model — endpoints, conversations, messages.

pub mod conversation;
pub mod endpoint;
pub mod message;

pub use conversation::{Conversation, ConversationId};
pub use endpoint::{Endpoint, EndpointKind, PhoneChannel};
pub use message::{
    DeliveryOutcome, Direction, Message, MessageId, MessageStatus, NewMessage, ProviderRef,
};
