//! Global command routing.
//!
//! Decides, for every recognized utterance, whether it is an emergency call, a
//! stop request or a navigation command, and arbitrates the interruptible
//! emergency mode.

mod lexicon;
#[allow(clippy::module_inception)]
mod router;

pub use lexicon::View;
pub use router::{CommandRouter, Decision, EmergencyState, Mode, RouteContext, Routed, RouterEffect, route};
