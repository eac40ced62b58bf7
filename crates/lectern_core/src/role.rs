//! Role types for conversation participants.

use serde::{Deserialize, Serialize};

/// Author of a message sent to or received from a model.
///
/// # Examples
///
/// ```
/// use lectern_core::Role;
///
/// assert_ne!(Role::User, Role::Assistant);
/// assert_eq!(Role::System.to_string(), "system");
/// assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    /// System messages provide context and instructions
    System,
    /// User messages are from the learner
    User,
    /// Assistant messages are from the model
    Assistant,
}
