//! Generic finite state machine.
//!
//! A [`StateMachine`] owns a registry of [`StateNode`]s keyed by a caller
//! chosen type, a shared context value and the active key. Nodes request
//! transitions through the [`Transition`] returned from their callbacks.
//! [`Blackboard`] is a loosely-typed context for machines that have no
//! dedicated one.

mod blackboard;
mod machine;

pub use blackboard::Blackboard;
pub use machine::{FsmError, StateMachine, StateNode, Transition};
