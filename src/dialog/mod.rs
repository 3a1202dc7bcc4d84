//! Guided multi-step voice dialog.
//!
//! Walks the user through an ordered list of questions. Every answer is read
//! back and must be confirmed with a spoken yes/no before it is committed.

mod machine;
mod matching;

pub use machine::{Dialog, DialogEffect, DialogState, DialogStep, Phase};
