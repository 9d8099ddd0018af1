use std::fmt::Write;

use log::debug;
use petgraph::{
    algo::has_path_connecting,
    graph::DiGraph,
    Direction,
};

use crate::{
    devicegraph::{DeviceGraph, Sid},
    error::{ActionGraphError, CommitError},
};

use super::{
    action::{Action, ActionContext, Tense},
    builder::{ActionGraphBuilder, ActionIndex},
    commit::CommandRunner,
};

/// DAG of actions. An edge from one action to another means the first must
/// be committed before the second.
#[derive(Debug)]
pub struct ActionGraph<'g> {
    ctx: ActionContext<'g>,
    inner: DiGraph<Action, ()>,
    order: Vec<ActionIndex>,
}

impl<'g> ActionGraph<'g> {
    pub(crate) fn new(
        ctx: ActionContext<'g>,
        inner: DiGraph<Action, ()>,
        order: Vec<ActionIndex>,
    ) -> Self {
        ActionGraph { ctx, inner, order }
    }

    /// Diffs `lhs` (before) against `rhs` (after).
    pub fn build(lhs: &'g DeviceGraph, rhs: &'g DeviceGraph) -> Result<Self, ActionGraphError> {
        ActionGraphBuilder::new(lhs, rhs).build()
    }

    pub fn context(&self) -> ActionContext<'g> {
        self.ctx
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn num_actions(&self) -> usize {
        self.inner.node_count()
    }

    pub fn num_dependencies(&self) -> usize {
        self.inner.edge_count()
    }

    /// Actions in the order they were added.
    pub fn actions(&self) -> impl Iterator<Item = &Action> + '_ {
        self.inner.node_weights()
    }

    /// Actions in a valid commit order.
    pub fn commit_order(&self) -> impl Iterator<Item = &Action> + '_ {
        self.order.iter().map(|index| &self.inner[*index])
    }

    pub fn actions_with_sid(&self, sid: Sid) -> Vec<&Action> {
        self.actions().filter(|action| action.sid == sid).collect()
    }

    pub fn find(&self, action: &Action) -> Option<ActionIndex> {
        self.inner
            .node_indices()
            .find(|index| self.inner[*index] == *action)
    }

    /// Whether there is a direct edge from `before` to `after`.
    pub fn has_dependency(&self, before: &Action, after: &Action) -> bool {
        match (self.find(before), self.find(after)) {
            (Some(before), Some(after)) => self.inner.contains_edge(before, after),
            _ => false,
        }
    }

    /// Whether `before` is committed before `after` in every commit order.
    pub fn precedes(&self, before: &Action, after: &Action) -> bool {
        match (self.find(before), self.find(after)) {
            (Some(before), Some(after)) => {
                before != after && has_path_connecting(&self.inner, before, after, None)
            }
            _ => false,
        }
    }

    /// Describes every action in commit order.
    pub fn text(&self, tense: Tense) -> Result<Vec<String>, ActionGraphError> {
        self.commit_order()
            .map(|action| action.text(&self.ctx, tense))
            .collect()
    }

    /// Commits every action in commit order, stopping at the first failure.
    pub fn commit(&self, runner: &mut dyn CommandRunner) -> Result<(), CommitError> {
        let total = self.order.len();
        for (position, action) in self.commit_order().enumerate() {
            debug!(
                "[{}/{total}] {}",
                position + 1,
                action.text(&self.ctx, Tense::PresentContinuous)?
            );
            action.commit(&self.ctx, runner)?;
        }
        Ok(())
    }

    /// Renders every action with its successors, for logging.
    pub fn describe(&self) -> String {
        let mut result = String::new();
        for index in &self.order {
            let _ = write!(result, "{}", self.inner[*index]);
            let successors: Vec<String> = self
                .inner
                .neighbors_directed(*index, Direction::Outgoing)
                .map(|next| self.inner[next].to_string())
                .collect();
            if !successors.is_empty() {
                let _ = write!(result, " -> [{}]", successors.join(", "));
            }
            result.push('\n');
        }
        result
    }
}
