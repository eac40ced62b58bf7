//! Reasoning tiers used to pick model variants.

use serde::{Deserialize, Serialize};

/// Reasoning/quality tier a step asks for.
///
/// Tiers are configuration: they select which model name a step is sent to
/// and never change how the engine sequences steps.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelTier {
    /// Cheap, low-latency model for extraction and formatting
    Fast,
    /// General purpose model
    #[default]
    Balanced,
    /// Highest quality model for generation that needs reasoning
    Deep,
}
