//! Assistant routing state machine
//!
//! Conversation data model plus the pure routing function that picks the
//! next step from the step that just ran and the resulting state.

mod dialog_stack;
pub mod event;
pub mod message;
pub mod state;
pub(crate) mod transition;


pub use dialog_stack::DialogStack;
pub use event::StepEvent;
pub use message::{ActionRequest, Message, Role};
pub use state::{ConversationState, Snapshot, Step};
pub use transition::{route_assistant, transition, TransitionError};
