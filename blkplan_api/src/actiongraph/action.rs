use std::fmt::Display;

use strum_macros::{Display, EnumDiscriminants, IntoStaticStr};

use crate::{
    devicegraph::{DeviceGraph, DeviceRef, Sid},
    error::{ActionGraphError, CommitError},
};

use super::commit::CommandRunner;

/// Side of the diff a device is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Side {
    /// The devicegraph before the change, usually the probed one.
    #[strum(serialize = "LHS")]
    Lhs,
    /// The devicegraph after the change, usually the staging one.
    #[strum(serialize = "RHS")]
    Rhs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tense {
    /// "Create partition /dev/sda1"
    SimplePresent,
    /// "Creating partition /dev/sda1"
    PresentContinuous,
}

impl Tense {
    pub fn pick<'a>(self, simple_present: &'a str, present_continuous: &'a str) -> &'a str {
        match self {
            Tense::SimplePresent => simple_present,
            Tense::PresentContinuous => present_continuous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResizeMode {
    Shrink,
    Grow,
}

impl ResizeMode {
    /// Direction of a size change, `None` if the size stays the same.
    pub fn between(lhs_size: u64, rhs_size: u64) -> Option<ResizeMode> {
        match lhs_size.cmp(&rhs_size) {
            std::cmp::Ordering::Less => Some(ResizeMode::Grow),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(ResizeMode::Shrink),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReallotMode {
    /// A parent is removed from the device.
    Reduce,
    /// A parent is added to the device.
    Extend,
}

/// Kinds of committable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumDiscriminants)]
#[strum_discriminants(name(ActionTag), derive(Hash, PartialOrd, Ord, Display, IntoStaticStr))]
pub enum ActionKind {
    Create,
    Delete { only_in_devicegraph: bool },
    Activate { side: Side },
    Deactivate { side: Side },
    Resize { mode: ResizeMode, side: Side },
    Reallot { mode: ReallotMode, peer: Sid },
    Rename,
    SetLabel,
    SetPartitionId,
    Mount { side: Side },
    Unmount { side: Side },
}

impl ActionKind {
    /// Resize reading the device from the side where it is smaller: before
    /// the change when shrinking, after it when growing.
    pub fn resize(mode: ResizeMode) -> Self {
        let side = match mode {
            ResizeMode::Shrink => Side::Lhs,
            ResizeMode::Grow => Side::Rhs,
        };
        ActionKind::Resize { mode, side }
    }
}

/// A single committable operation on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    pub sid: Sid,
    pub kind: ActionKind,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ActionKind::Resize { mode, .. } => write!(f, "Resize({mode}) {}", self.sid),
            ActionKind::Reallot { mode, peer } => {
                write!(f, "Reallot({mode} {peer}) {}", self.sid)
            }
            _ => write!(f, "{} {}", self.tag(), self.sid),
        }
    }
}

impl Action {
    pub fn new(sid: Sid, kind: ActionKind) -> Self {
        Action { sid, kind }
    }

    pub fn tag(&self) -> ActionTag {
        ActionTag::from(&self.kind)
    }

    pub fn is_create(&self) -> bool {
        matches!(self.kind, ActionKind::Create)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.kind, ActionKind::Delete { .. })
    }

    /// Whether the action changes a device present on both sides.
    pub fn is_modify(&self) -> bool {
        !matches!(
            self.kind,
            ActionKind::Create
                | ActionKind::Delete { .. }
                | ActionKind::Activate { .. }
                | ActionKind::Deactivate { .. }
        )
    }

    /// Side the device itself is read from.
    pub fn side(&self) -> Side {
        match self.kind {
            ActionKind::Create => Side::Rhs,
            ActionKind::Delete { .. } => Side::Lhs,
            ActionKind::Activate { side }
            | ActionKind::Deactivate { side }
            | ActionKind::Resize { side, .. }
            | ActionKind::Mount { side }
            | ActionKind::Unmount { side } => side,
            ActionKind::Reallot {
                mode: ReallotMode::Reduce,
                ..
            } => Side::Lhs,
            ActionKind::Reallot {
                mode: ReallotMode::Extend,
                ..
            } => Side::Rhs,
            ActionKind::Rename | ActionKind::SetLabel | ActionKind::SetPartitionId => Side::Rhs,
        }
    }

    /// Every side the action reads the device from.
    pub fn sides(&self) -> Vec<Side> {
        match self.kind {
            ActionKind::Resize { .. }
            | ActionKind::Reallot { .. }
            | ActionKind::Rename
            | ActionKind::SetLabel
            | ActionKind::SetPartitionId => vec![Side::Lhs, Side::Rhs],
            _ => vec![self.side()],
        }
    }

    /// Performs the effect of the action through the device's `do_*`
    /// operation.
    pub fn commit(
        &self,
        ctx: &ActionContext<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        match self.kind {
            ActionKind::Create => {
                let dev = ctx.device(self.sid, Side::Rhs)?;
                dev.imp().do_create(dev, runner)
            }
            ActionKind::Delete {
                only_in_devicegraph,
            } => {
                let dev = ctx.device(self.sid, Side::Lhs)?;
                if only_in_devicegraph {
                    Ok(())
                } else {
                    dev.imp().do_delete(dev, runner)
                }
            }
            ActionKind::Activate { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_activate(dev, runner)
            }
            ActionKind::Deactivate { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_deactivate(dev, runner)
            }
            ActionKind::Resize { mode, .. } => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_resize(lhs, rhs, mode, runner)
            }
            ActionKind::Reallot { mode, peer } => {
                let side = self.side();
                let dev = ctx.device(self.sid, side)?;
                let peer = ctx.device(peer, side)?;
                dev.imp().do_reallot(dev, mode, peer, runner)
            }
            ActionKind::Rename => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_rename(lhs, rhs, runner)
            }
            ActionKind::SetLabel => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_set_label(lhs, rhs, runner)
            }
            ActionKind::SetPartitionId => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_set_partition_id(lhs, rhs, runner)
            }
            ActionKind::Mount { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_mount(dev, runner)
            }
            ActionKind::Unmount { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_unmount(dev, runner)
            }
        }
    }

    /// Human readable description of the action.
    pub fn text(&self, ctx: &ActionContext<'_>, tense: Tense) -> Result<String, ActionGraphError> {
        Ok(match self.kind {
            ActionKind::Create => {
                let dev = ctx.device(self.sid, Side::Rhs)?;
                dev.imp().do_create_text(dev, tense)
            }
            ActionKind::Delete { .. } => {
                let dev = ctx.device(self.sid, Side::Lhs)?;
                dev.imp().do_delete_text(dev, tense)
            }
            ActionKind::Activate { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_activate_text(dev, tense)
            }
            ActionKind::Deactivate { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_deactivate_text(dev, tense)
            }
            ActionKind::Resize { mode, .. } => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_resize_text(lhs, rhs, mode, tense)
            }
            ActionKind::Reallot { mode, peer } => {
                let side = self.side();
                let dev = ctx.device(self.sid, side)?;
                let peer = ctx.device(peer, side)?;
                dev.imp().do_reallot_text(dev, mode, peer, tense)
            }
            ActionKind::Rename => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_rename_text(lhs, rhs, tense)
            }
            ActionKind::SetLabel => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_set_label_text(lhs, rhs, tense)
            }
            ActionKind::SetPartitionId => {
                let (lhs, rhs) = ctx.both(self.sid)?;
                rhs.imp().do_set_partition_id_text(lhs, rhs, tense)
            }
            ActionKind::Mount { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_mount_text(dev, tense)
            }
            ActionKind::Unmount { side } => {
                let dev = ctx.device(self.sid, side)?;
                dev.imp().do_unmount_text(dev, tense)
            }
        })
    }
}

/// The two devicegraphs an action graph is built from.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'g> {
    pub lhs: &'g DeviceGraph,
    pub rhs: &'g DeviceGraph,
}

impl<'g> ActionContext<'g> {
    pub fn graph(&self, side: Side) -> &'g DeviceGraph {
        match side {
            Side::Lhs => self.lhs,
            Side::Rhs => self.rhs,
        }
    }

    /// Resolves the device an action refers to on one side.
    pub fn device(&self, sid: Sid, side: Side) -> Result<DeviceRef<'g>, ActionGraphError> {
        self.graph(side)
            .find_device(sid)
            .ok_or(ActionGraphError::DanglingReference { sid, side })
    }

    fn both(&self, sid: Sid) -> Result<(DeviceRef<'g>, DeviceRef<'g>), ActionGraphError> {
        Ok((self.device(sid, Side::Lhs)?, self.device(sid, Side::Rhs)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sides() {
        let sid = Sid(7);
        assert_eq!(Action::new(sid, ActionKind::Create).side(), Side::Rhs);
        assert_eq!(
            Action::new(
                sid,
                ActionKind::Delete {
                    only_in_devicegraph: true
                }
            )
            .sides(),
            vec![Side::Lhs]
        );
        assert_eq!(
            ActionKind::resize(ResizeMode::Shrink),
            ActionKind::Resize {
                mode: ResizeMode::Shrink,
                side: Side::Lhs
            }
        );
        let extend = Action::new(
            sid,
            ActionKind::Reallot {
                mode: ReallotMode::Extend,
                peer: Sid(9),
            },
        );
        assert_eq!(extend.side(), Side::Rhs);
        assert_eq!(extend.sides(), vec![Side::Lhs, Side::Rhs]);
        assert!(extend.is_modify());
        assert!(!Action::new(sid, ActionKind::Activate { side: Side::Rhs }).is_modify());
    }

    #[test]
    fn test_display() {
        assert_eq!(Action::new(Sid(42), ActionKind::Create).to_string(), "Create 42");
        assert_eq!(
            Action::new(Sid(42), ActionKind::resize(ResizeMode::Grow)).to_string(),
            "Resize(grow) 42"
        );
        assert_eq!(
            Action::new(
                Sid(42),
                ActionKind::Reallot {
                    mode: ReallotMode::Reduce,
                    peer: Sid(44)
                }
            )
            .to_string(),
            "Reallot(reduce 44) 42"
        );
        assert_eq!(ResizeMode::between(1, 2), Some(ResizeMode::Grow));
        assert_eq!(ResizeMode::between(2, 2), None);
        assert_eq!(Tense::PresentContinuous.pick("Create", "Creating"), "Creating");
    }
}
