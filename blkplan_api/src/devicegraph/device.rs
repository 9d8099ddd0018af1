use std::fmt::Debug;

use crate::{
    actiongraph::{
        ActionGraphBuilder, ActionIndex, ActionKind, CommandRunner, ReallotMode, ResizeMode,
        Tense,
    },
    devices::{DeviceKind, DeviceType},
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::region::Region,
};

use super::{
    graph::{DeviceIndex, DeviceRef, Holder},
    probe::{ProbeContext, ProbeKey, SystemInfo},
    resize::{ResizeInfo, ResizeReasons},
    sid::{GraphId, Sid, SidAllocator},
};

/// Position of a device inside a devicegraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub graph: GraphId,
    pub vertex: DeviceIndex,
}

/// A device: its identity, its graph membership and its variant data.
#[derive(Debug, Clone)]
pub struct Device {
    sid: Sid,
    membership: Option<Membership>,
    kind: DeviceKind,
}

impl Device {
    /// Creates a device with a fresh sid from `allocator`.
    pub fn new(
        allocator: &SidAllocator,
        kind: impl Into<DeviceKind>,
    ) -> Result<Self, DeviceGraphError> {
        Ok(Self::with_sid(allocator.next_sid()?, kind))
    }

    /// Creates a device with a known sid, e.g. when loading a saved graph.
    pub(crate) fn with_sid(sid: Sid, kind: impl Into<DeviceKind>) -> Self {
        Device {
            sid,
            membership: None,
            kind: kind.into(),
        }
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn membership(&self) -> Option<Membership> {
        self.membership
    }

    pub(crate) fn set_membership(&mut self, membership: Option<Membership>) {
        self.membership = membership;
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut DeviceKind {
        &mut self.kind
    }

    pub fn device_type(&self) -> DeviceType {
        DeviceType::from(&self.kind)
    }

    pub fn imp(&self) -> &dyn DeviceImpl {
        self.kind.imp()
    }
}

/// Devices are equal when they are the same variant with the same sid and
/// equal variant attributes. Graph membership is not compared.
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.device_type() == other.device_type()
            && self.sid == other.sid
            && self.kind == other.kind
    }
}

pub(crate) fn stub(dev: DeviceRef<'_>, verb: &'static str) -> CommitError {
    CommitError::StubCalled {
        class: dev.device_type(),
        verb,
    }
}

pub(crate) fn stub_text(verb: &str) -> String {
    format!("error: stub {verb}_text called")
}

/// Capabilities shared by all device variants.
///
/// Action effects (`do_*`) default to stubs that fail with
/// [`CommitError::StubCalled`]: a variant whose action chains use a verb must
/// override it.
pub trait DeviceImpl: Debug {
    /// Name used in logs and action descriptions, e.g. `/dev/sda1`.
    fn displayname(&self, dev: DeviceRef<'_>) -> String;

    /// Extent of block devices, `None` for other devices.
    fn region(&self, _dev: DeviceRef<'_>) -> Option<Region> {
        None
    }

    /// Fills attributes derivable from the device's own system information.
    fn probe_pass_1(&mut self, _key: &ProbeKey, _info: &SystemInfo) -> Result<(), ProbeError> {
        Ok(())
    }

    /// Resolves the parents of the device once every device exists.
    fn probe_pass_2(
        &self,
        _key: &ProbeKey,
        _ctx: &ProbeContext<'_>,
    ) -> Result<Vec<(DeviceIndex, Holder)>, ProbeError> {
        Ok(Vec::new())
    }

    fn detect_resize_info(&self, _dev: DeviceRef<'_>) -> ResizeInfo {
        ResizeInfo::unsupported(ResizeReasons::NO_SUPPORT)
    }

    fn add_create_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        builder.add_chain(dev.sid(), [ActionKind::Create]);
        Ok(())
    }

    /// Adds the actions turning `lhs` into `rhs`. Overrides keep the
    /// reallot diff by calling `add_reallot_actions` themselves.
    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    fn add_delete_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        builder.add_chain(
            dev.sid(),
            [ActionKind::Delete {
                only_in_devicegraph: false,
            }],
        );
        Ok(())
    }

    /// Adds ordering rules specific to the variant, on top of the rules every
    /// action kind has.
    fn add_dependencies(
        &self,
        _action: ActionIndex,
        _builder: &mut ActionGraphBuilder<'_>,
    ) -> Result<(), ActionGraphError> {
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_create"))
    }

    fn do_create_text(&self, _dev: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_create")
    }

    fn do_delete(
        &self,
        dev: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_delete"))
    }

    fn do_delete_text(&self, _dev: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_delete")
    }

    fn do_activate(
        &self,
        dev: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_activate"))
    }

    fn do_activate_text(&self, _dev: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_activate")
    }

    fn do_deactivate(
        &self,
        dev: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_deactivate"))
    }

    fn do_deactivate_text(&self, _dev: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_deactivate")
    }

    fn do_resize(
        &self,
        lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _mode: ResizeMode,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(lhs, "do_resize"))
    }

    fn do_resize_text(
        &self,
        _lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _mode: ResizeMode,
        _tense: Tense,
    ) -> String {
        stub_text("do_resize")
    }

    fn do_reallot(
        &self,
        dev: DeviceRef<'_>,
        _mode: ReallotMode,
        _peer: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_reallot"))
    }

    fn do_reallot_text(
        &self,
        _dev: DeviceRef<'_>,
        _mode: ReallotMode,
        _peer: DeviceRef<'_>,
        _tense: Tense,
    ) -> String {
        stub_text("do_reallot")
    }

    fn do_rename(
        &self,
        lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(lhs, "do_rename"))
    }

    fn do_rename_text(&self, _lhs: DeviceRef<'_>, _rhs: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_rename")
    }

    fn do_set_label(
        &self,
        lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(lhs, "do_set_label"))
    }

    fn do_set_label_text(
        &self,
        _lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _tense: Tense,
    ) -> String {
        stub_text("do_set_label")
    }

    fn do_set_partition_id(
        &self,
        lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(lhs, "do_set_partition_id"))
    }

    fn do_set_partition_id_text(
        &self,
        _lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _tense: Tense,
    ) -> String {
        stub_text("do_set_partition_id")
    }

    fn do_mount(
        &self,
        dev: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_mount"))
    }

    fn do_mount_text(&self, _dev: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_mount")
    }

    fn do_unmount(
        &self,
        dev: DeviceRef<'_>,
        _runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        Err(stub(dev, "do_unmount"))
    }

    fn do_unmount_text(&self, _dev: DeviceRef<'_>, _tense: Tense) -> String {
        stub_text("do_unmount")
    }
}
