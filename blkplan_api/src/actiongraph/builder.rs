//! # Action graph builder
//!
//! Diffs two devicegraphs into an action graph:
//!
//! - Devices only in the RHS get their create chain, devices only in the LHS
//!   their delete chain, and devices on both sides whatever modify actions
//!   their variant derives from the two states (resize, rename, reallot...).
//! - Once every action exists, each action adds the ordering edges of its
//!   kind, then the ones specific to its device variant.
//! - The result must be acyclic. Every topological order of it is a valid
//!   commit order.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};
use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    devicegraph::{DeviceGraph, DeviceRef, Sid},
    error::ActionGraphError,
};

use super::{
    action::{Action, ActionContext, ActionKind, ActionTag, ReallotMode, ResizeMode, Side},
    graph::ActionGraph,
};

/// Index of an action in an action graph.
pub type ActionIndex = NodeIndex;

pub struct ActionGraphBuilder<'g> {
    ctx: ActionContext<'g>,
    inner: DiGraph<Action, ()>,
    /// Actions of each device, in insertion order.
    by_sid: BTreeMap<Sid, Vec<ActionIndex>>,
    by_tag: BTreeMap<ActionTag, Vec<ActionIndex>>,
    /// Reallot(Reduce) actions by the device they remove.
    reducers: BTreeMap<Sid, Vec<ActionIndex>>,
}

impl<'g> ActionGraphBuilder<'g> {
    pub fn new(lhs: &'g DeviceGraph, rhs: &'g DeviceGraph) -> Self {
        ActionGraphBuilder {
            ctx: ActionContext { lhs, rhs },
            inner: DiGraph::new(),
            by_sid: BTreeMap::new(),
            by_tag: BTreeMap::new(),
            reducers: BTreeMap::new(),
        }
    }

    pub fn lhs(&self) -> &'g DeviceGraph {
        self.ctx.lhs
    }

    pub fn rhs(&self) -> &'g DeviceGraph {
        self.ctx.rhs
    }

    pub fn device(&self, sid: Sid, side: Side) -> Result<DeviceRef<'g>, ActionGraphError> {
        self.ctx.device(sid, side)
    }

    pub fn add_action(&mut self, action: Action) -> ActionIndex {
        let index = self.inner.add_node(action);
        self.by_sid.entry(action.sid).or_default().push(index);
        self.by_tag.entry(action.tag()).or_default().push(index);
        if let ActionKind::Reallot {
            mode: ReallotMode::Reduce,
            peer,
        } = action.kind
        {
            self.reducers.entry(peer).or_default().push(index);
        }

        trace!("Added action '{action}'");
        index
    }

    /// Adds actions on one device that must be committed in the given order.
    pub fn add_chain(
        &mut self,
        sid: Sid,
        kinds: impl IntoIterator<Item = ActionKind>,
    ) -> Vec<ActionIndex> {
        let mut chain: Vec<ActionIndex> = Vec::new();
        for kind in kinds {
            let index = self.add_action(Action::new(sid, kind));
            if let Some(previous) = chain.last() {
                self.add_edge(*previous, index);
            }
            chain.push(index);
        }
        chain
    }

    /// Requires `before` to be committed before `after`.
    pub fn add_edge(&mut self, before: ActionIndex, after: ActionIndex) {
        if before != after {
            self.inner.update_edge(before, after, ());
        }
    }

    pub fn action(&self, index: ActionIndex) -> &Action {
        &self.inner[index]
    }

    pub fn actions_with_sid(&self, sid: Sid) -> &[ActionIndex] {
        self.by_sid.get(&sid).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn actions_with_tag(&self, tag: ActionTag) -> &[ActionIndex] {
        self.by_tag.get(&tag).map(Vec::as_slice).unwrap_or_default()
    }

    /// First action added for a device.
    pub fn first_action(&self, sid: Sid) -> Option<ActionIndex> {
        self.actions_with_sid(sid).first().copied()
    }

    /// Last action added for a device.
    pub fn last_action(&self, sid: Sid) -> Option<ActionIndex> {
        self.actions_with_sid(sid).last().copied()
    }

    /// Reallot(Reduce) actions that remove `peer` from its owner.
    pub fn reducers_of(&self, peer: Sid) -> &[ActionIndex] {
        self.reducers.get(&peer).map(Vec::as_slice).unwrap_or_default()
    }

    /// Adds a Reallot action for every parent added to or removed from a
    /// device.
    pub fn add_reallot_actions(&mut self, lhs: DeviceRef<'g>, rhs: DeviceRef<'g>) {
        let lhs_parents = lhs.parent_sids();
        let rhs_parents = rhs.parent_sids();

        for peer in rhs_parents.difference(&lhs_parents) {
            self.add_action(Action::new(
                rhs.sid(),
                ActionKind::Reallot {
                    mode: ReallotMode::Extend,
                    peer: *peer,
                },
            ));
        }

        for peer in lhs_parents.difference(&rhs_parents) {
            self.add_action(Action::new(
                lhs.sid(),
                ActionKind::Reallot {
                    mode: ReallotMode::Reduce,
                    peer: *peer,
                },
            ));
        }
    }

    pub fn build(mut self) -> Result<ActionGraph<'g>, ActionGraphError> {
        debug!("Building action graph");

        trace!("Adding actions");
        self.add_actions()?;

        trace!("Adding dependencies");
        self.add_dependencies()?;

        let order = toposort(&self.inner, None).map_err(|cycle| {
            ActionGraphError::CyclicActionGraph(self.inner[cycle.node_id()].to_string())
        })?;

        debug!(
            "Action graph built successfully with {} actions and {} dependencies",
            self.inner.node_count(),
            self.inner.edge_count()
        );
        Ok(ActionGraph::new(self.ctx, self.inner, order))
    }

    fn add_actions(&mut self) -> Result<(), ActionGraphError> {
        let lhs = self.lhs();
        let rhs = self.rhs();
        let lhs_sids: BTreeSet<Sid> = lhs.sids().collect();
        let rhs_sids: BTreeSet<Sid> = rhs.sids().collect();

        for sid in rhs_sids.difference(&lhs_sids) {
            let dev = self.device(*sid, Side::Rhs)?;
            dev.imp().add_create_actions(dev, self)?;
        }

        for sid in lhs_sids.intersection(&rhs_sids) {
            let lhs_dev = self.device(*sid, Side::Lhs)?;
            let rhs_dev = self.device(*sid, Side::Rhs)?;
            if lhs_dev.device_type() != rhs_dev.device_type() {
                return Err(ActionGraphError::UnsupportedAction {
                    sid: *sid,
                    class: lhs_dev.device_type(),
                    action: "change device type",
                });
            }
            rhs_dev.imp().add_modify_actions(lhs_dev, rhs_dev, self)?;
        }

        for sid in lhs_sids.difference(&rhs_sids) {
            let dev = self.device(*sid, Side::Lhs)?;
            dev.imp().add_delete_actions(dev, self)?;
        }

        Ok(())
    }

    fn add_dependencies(&mut self) -> Result<(), ActionGraphError> {
        let indices: Vec<ActionIndex> = self.inner.node_indices().collect();
        for index in indices {
            let action = self.inner[index];
            self.check_references(&action)?;
            self.add_base_dependencies(index, &action)?;

            let dev = self.device(action.sid, action.side())?;
            dev.imp().add_dependencies(index, self)?;
        }
        Ok(())
    }

    /// Every device an action reads must exist on the side it reads it from.
    fn check_references(&self, action: &Action) -> Result<(), ActionGraphError> {
        for side in action.sides() {
            self.device(action.sid, side)?;
        }

        if let ActionKind::Reallot { peer, .. } = action.kind {
            self.device(peer, action.side())?;
        }
        Ok(())
    }

    fn add_base_dependencies(
        &mut self,
        index: ActionIndex,
        action: &Action,
    ) -> Result<(), ActionGraphError> {
        if action.is_modify() {
            self.add_modify_dependencies(index, action);
        }

        match action.kind {
            ActionKind::Create => {
                // Parents must be complete, and cleared of the devices removed
                // from them, before a device is created on them.
                let dev = self.device(action.sid, Side::Rhs)?;
                for parent in dev.parents() {
                    if let Some(last) = self.last_action(parent.sid()) {
                        self.add_edge(last, index);
                    }

                    let Some(old_parent) = self.lhs().find_device(parent.sid()) else {
                        continue;
                    };
                    for old_child in old_parent.children() {
                        if self.rhs().device_exists(old_child.sid()) {
                            continue;
                        }
                        if let Some(last) = self.last_action(old_child.sid()) {
                            self.add_edge(last, index);
                        }
                    }
                }
            }

            ActionKind::Delete { .. } => {
                // Deleted children go before the first action of the delete
                // chain.
                let dev = self.device(action.sid, Side::Lhs)?;
                if let Some(first) = self.first_action(action.sid) {
                    for child in dev.children() {
                        if self.rhs().device_exists(child.sid()) {
                            continue;
                        }
                        if let Some(last) = self.last_action(child.sid()) {
                            self.add_edge(last, first);
                        }
                    }
                }
            }

            ActionKind::Resize { mode, side } => {
                // Children shrink before and grow after their parent.
                let dev = self.device(action.sid, side)?;
                for child in dev.children() {
                    let resizes: Vec<ActionIndex> = self
                        .actions_with_sid(child.sid())
                        .iter()
                        .copied()
                        .filter(|other| self.inner[*other].tag() == ActionTag::Resize)
                        .collect();
                    for other in resizes {
                        match mode {
                            ResizeMode::Shrink => self.add_edge(other, index),
                            ResizeMode::Grow => self.add_edge(index, other),
                        }
                    }
                }
            }

            ActionKind::Reallot {
                mode: ReallotMode::Reduce,
                peer,
            } => {
                // A device is removed from its owner before anything else
                // happens to it.
                if let Some(first) = self.first_action(peer) {
                    self.add_edge(index, first);
                }
            }

            ActionKind::Reallot {
                mode: ReallotMode::Extend,
                peer,
            } => {
                // A device is added to its owner once it is complete, and
                // after it was removed from a previous owner.
                if let Some(last) = self.last_action(peer) {
                    self.add_edge(last, index);
                }

                // Only the first reducer is considered.
                if let Some(reducer) = self.reducers_of(peer).first().copied() {
                    self.add_edge(reducer, index);
                }
            }

            _ => {}
        }

        Ok(())
    }

    /// Modifications of a device happen while it is active.
    fn add_modify_dependencies(&mut self, index: ActionIndex, action: &Action) {
        let siblings: Vec<ActionIndex> = self.actions_with_sid(action.sid).to_vec();
        for other in siblings {
            match self.inner[other].kind {
                ActionKind::Activate { .. } => self.add_edge(other, index),
                ActionKind::Deactivate { .. } => self.add_edge(index, other),
                _ => {}
            }
        }
    }
}
