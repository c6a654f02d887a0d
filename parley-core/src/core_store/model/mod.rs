/*
    Model subsystem - Data structures for conversations and messages
*/

pub mod types;
pub mod delivery;
pub mod message;
pub mod conversation;

pub use types::*;
pub use delivery::*;
pub use message::*;
pub use conversation::*;
