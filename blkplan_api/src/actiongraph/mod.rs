//! # Action graph
//!
//! Actions are the committable steps that turn the LHS devicegraph into the
//! RHS devicegraph. The action graph orders them: an edge means "commit
//! before".

mod action;
mod builder;
mod commit;
mod graph;

#[cfg(test)]
mod scenario_tests;

pub use action::{
    Action, ActionContext, ActionKind, ActionTag, ReallotMode, ResizeMode, Side, Tense,
};
pub use builder::{ActionGraphBuilder, ActionIndex};
pub use commit::{render_command, CommandRunner, RecordingRunner};
pub use graph::ActionGraph;
