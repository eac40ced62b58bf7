//! Conversation sessions for Lectern.
//!
//! [`SessionManager::advance`] moves a conversation forward by one learner
//! turn: it loads or opens the session (greeting new learners with a
//! synthesized [`Introduction`]), appends the turn, gathers learner
//! context, asks the model for a reply through the request-ledger path and
//! saves the result. Suggested follow-ups never reveal the answer to the
//! question being discussed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod intro;
mod locks;
mod manager;
mod quick_replies;
mod step;

pub use context::{ContextAssembler, TurnContext};
pub use intro::{Introduction, TopicGuess, guess_topic, synthesize_introduction};
pub use locks::ConversationLocks;
pub use manager::{SessionManager, TurnOutcome, TurnRequest, TurnRequestBuilder};
pub use quick_replies::{QuickReplyComposer, fallback_replies, normalize};
pub use step::{ConversationStep, ReplyInputs, ReplyOutput};
