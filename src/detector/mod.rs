pub mod alerts;
pub mod bonus;

pub use alerts::{evaluate, Evaluation, SkipReason};
pub use bonus::BonusCaps;
