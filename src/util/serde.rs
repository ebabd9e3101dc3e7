//! Serializable identifiers and enums shared across the loader.

use serde::{Deserialize, Serialize};

/// Process-scoped, monotonically increasing image task identifier.
pub type TaskId = u64;

/// Identifier of one physical transfer owned by the data loader.
pub type TransferId = u64;

/// Transport priority hint carried by image requests.
///
/// The admission queue itself is FIFO; priority is forwarded to the transport, which may use it
/// to order work on its side. Preheating requests are always issued at [`Priority::Low`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work such as preheating.
    Low,
    /// Regular on-screen requests.
    #[default]
    Normal,
    /// Latency-sensitive requests.
    High,
}
