use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt::{Debug, Write},
    sync::Arc,
};

use log::trace;
use petgraph::{
    algo::{has_path_connecting, is_cyclic_directed},
    stable_graph::{NodeIndex, StableGraph},
    visit::{EdgeRef, IntoEdgeReferences},
    Direction,
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{
    devices::{DeviceKind, DeviceType, DeviceVariant},
    error::DeviceGraphError,
    primitives::region::Region,
};

use super::{
    device::{Device, DeviceImpl, Membership},
    resize::ResizeInfo,
    sid::{GraphId, Sid, SidAllocator},
};

/// Index of a vertex in a devicegraph. Stays valid across removal of other
/// vertices.
pub type DeviceIndex = NodeIndex;

/// Kind of the relation between a device and the device that uses it.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString,
)]
pub enum Holder {
    /// The child is carved out of the parent, e.g. a partition of a
    /// partition table.
    Subdevice,
    /// The child uses the whole parent, e.g. a filesystem on a partition.
    User,
}

/// Directed acyclic graph of devices. Edges point from a device to the
/// devices using it.
#[derive(Debug)]
pub struct DeviceGraph {
    id: GraphId,
    allocator: Arc<SidAllocator>,
    inner: StableGraph<Device, Holder>,
    sid_index: BTreeMap<Sid, DeviceIndex>,
}

impl DeviceGraph {
    pub fn new(allocator: Arc<SidAllocator>) -> Self {
        DeviceGraph {
            id: GraphId::next(),
            allocator,
            inner: StableGraph::new(),
            sid_index: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn allocator(&self) -> &Arc<SidAllocator> {
        &self.allocator
    }

    pub fn is_empty(&self) -> bool {
        self.sid_index.is_empty()
    }

    pub fn num_devices(&self) -> usize {
        self.inner.node_count()
    }

    pub fn num_holders(&self) -> usize {
        self.inner.edge_count()
    }

    /// Inserts a device that does not belong to any devicegraph yet and
    /// records its position in it.
    pub fn add_vertex(&mut self, device: Device) -> Result<DeviceIndex, DeviceGraphError> {
        let sid = device.sid();
        if device.membership().is_some() {
            return Err(DeviceGraphError::InvariantViolation {
                sid,
                body: "device already belongs to a devicegraph".into(),
            });
        }

        if self.sid_index.contains_key(&sid) {
            return Err(DeviceGraphError::DuplicateSid(sid));
        }

        let index = self.inner.add_node(device);
        self.inner[index].set_membership(Some(Membership {
            graph: self.id,
            vertex: index,
        }));
        self.sid_index.insert(sid, index);
        self.check_back_reference(index)?;

        trace!(
            "Added {} {sid} at vertex {}",
            self.inner[index].device_type(),
            index.index()
        );
        Ok(index)
    }

    /// Creates a device with a fresh sid and inserts it.
    pub fn create_device(
        &mut self,
        kind: impl Into<DeviceKind>,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        let device = Device::new(&self.allocator, kind)?;
        self.add_vertex(device)
    }

    /// Removes a device and all its holders. Descendants are kept.
    pub fn remove_vertex(&mut self, index: DeviceIndex) -> Result<Device, DeviceGraphError> {
        let mut device = self
            .inner
            .remove_node(index)
            .ok_or(DeviceGraphError::InvalidVertex(index.index()))?;
        self.sid_index.remove(&device.sid());
        device.set_membership(None);

        trace!("Removed {} {}", device.device_type(), device.sid());
        Ok(device)
    }

    /// Removes every device reachable from `index`, excluding `index` itself.
    pub fn remove_descendants(&mut self, index: DeviceIndex) -> Result<(), DeviceGraphError> {
        for descendant in self.descendants(index, false)? {
            self.remove_vertex(descendant)?;
        }
        Ok(())
    }

    /// Adds a holder from `parent` to `child`. Holders that would close a
    /// cycle are rejected.
    pub fn add_edge(
        &mut self,
        parent: DeviceIndex,
        child: DeviceIndex,
        holder: Holder,
    ) -> Result<(), DeviceGraphError> {
        let parent_sid = self.vertex(parent)?.sid();
        let child_sid = self.vertex(child)?.sid();

        if self.inner.find_edge(parent, child).is_some() {
            return Err(DeviceGraphError::DuplicateHolder {
                parent: parent_sid,
                child: child_sid,
            });
        }

        if parent == child || has_path_connecting(&self.inner, child, parent, None) {
            return Err(DeviceGraphError::WouldCreateCycle {
                parent: parent_sid,
                child: child_sid,
            });
        }

        self.inner.add_edge(parent, child, holder);
        Ok(())
    }

    pub fn remove_edge(
        &mut self,
        parent: DeviceIndex,
        child: DeviceIndex,
    ) -> Result<Holder, DeviceGraphError> {
        let parent_sid = self.vertex(parent)?.sid();
        let child_sid = self.vertex(child)?.sid();

        self.inner
            .find_edge(parent, child)
            .and_then(|edge| self.inner.remove_edge(edge))
            .ok_or(DeviceGraphError::HolderNotFound {
                parent: parent_sid,
                child: child_sid,
            })
    }

    pub fn holder(&self, parent: DeviceIndex, child: DeviceIndex) -> Option<Holder> {
        self.inner
            .find_edge(parent, child)
            .and_then(|edge| self.inner.edge_weight(edge))
            .copied()
    }

    /// All holders as `(parent sid, child sid, holder)`, ordered by sids.
    pub fn holders(&self) -> Vec<(Sid, Sid, Holder)> {
        let mut holders: Vec<_> = self
            .inner
            .edge_references()
            .map(|edge| {
                (
                    self.inner[edge.source()].sid(),
                    self.inner[edge.target()].sid(),
                    *edge.weight(),
                )
            })
            .collect();
        holders.sort_by_key(|(parent, child, _)| (*parent, *child));
        holders
    }

    fn vertex(&self, index: DeviceIndex) -> Result<&Device, DeviceGraphError> {
        self.inner
            .node_weight(index)
            .ok_or(DeviceGraphError::InvalidVertex(index.index()))
    }

    pub fn device(&self, index: DeviceIndex) -> Result<DeviceRef<'_>, DeviceGraphError> {
        self.vertex(index)?;
        Ok(DeviceRef { graph: self, index })
    }

    pub fn find_device(&self, sid: Sid) -> Option<DeviceRef<'_>> {
        self.find_index(sid)
            .map(|index| DeviceRef { graph: self, index })
    }

    /// Same as [`Self::find_device`] but fails for unknown sids.
    pub fn device_by_sid(&self, sid: Sid) -> Result<DeviceRef<'_>, DeviceGraphError> {
        self.find_device(sid)
            .ok_or(DeviceGraphError::DeviceNotFound(sid))
    }

    pub fn find_index(&self, sid: Sid) -> Option<DeviceIndex> {
        self.sid_index.get(&sid).copied()
    }

    pub fn device_exists(&self, sid: Sid) -> bool {
        self.sid_index.contains_key(&sid)
    }

    /// Gives mutable access to the attributes of a device. Identity and
    /// membership stay untouched.
    pub fn device_kind_mut(&mut self, sid: Sid) -> Result<&mut DeviceKind, DeviceGraphError> {
        let index = self
            .find_index(sid)
            .ok_or(DeviceGraphError::DeviceNotFound(sid))?;
        Ok(self.inner[index].kind_mut())
    }

    /// Typed variant of [`Self::device_kind_mut`].
    pub fn variant_mut<T: DeviceVariant>(&mut self, sid: Sid) -> Result<&mut T, DeviceGraphError> {
        let kind = self.device_kind_mut(sid)?;
        let actual = DeviceType::from(&*kind);
        T::from_kind_mut(kind).ok_or(DeviceGraphError::WrongDeviceType {
            sid,
            expected: T::DEVICE_TYPE.to_string(),
            actual,
        })
    }

    fn neighbors(&self, index: DeviceIndex, direction: Direction) -> Vec<DeviceIndex> {
        let mut neighbors: Vec<_> = self.inner.neighbors_directed(index, direction).collect();
        neighbors.sort_by_key(|neighbor| self.inner[*neighbor].sid());
        neighbors
    }

    /// Parents ordered by sid.
    pub fn parents(&self, index: DeviceIndex) -> Vec<DeviceIndex> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Children ordered by sid.
    pub fn children(&self, index: DeviceIndex) -> Vec<DeviceIndex> {
        self.neighbors(index, Direction::Outgoing)
    }

    pub fn num_parents(&self, index: DeviceIndex) -> usize {
        self.inner
            .neighbors_directed(index, Direction::Incoming)
            .count()
    }

    pub fn num_children(&self, index: DeviceIndex) -> usize {
        self.inner
            .neighbors_directed(index, Direction::Outgoing)
            .count()
    }

    /// All devices ordered by sid.
    pub fn devices(&self) -> impl Iterator<Item = DeviceRef<'_>> + '_ {
        self.sid_index
            .values()
            .map(move |index| DeviceRef {
                graph: self,
                index: *index,
            })
    }

    pub fn sids(&self) -> impl Iterator<Item = Sid> + '_ {
        self.sid_index.keys().copied()
    }

    /// Devices without parents, ordered by sid.
    pub fn roots(&self) -> Vec<DeviceRef<'_>> {
        self.devices()
            .filter(|device| device.num_parents() == 0)
            .collect()
    }

    fn walk(
        &self,
        index: DeviceIndex,
        direction: Direction,
        include_self: bool,
    ) -> Result<Vec<DeviceIndex>, DeviceGraphError> {
        self.vertex(index)?;
        let mut visited = BTreeSet::from([index]);
        let mut queue = VecDeque::from([index]);
        let mut result = Vec::new();
        while let Some(next) = queue.pop_front() {
            if include_self || next != index {
                result.push(next);
            }
            for neighbor in self.neighbors(next, direction) {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        Ok(result)
    }

    /// Devices reachable from `index` in breadth-first order, siblings
    /// ordered by sid.
    pub fn descendants(
        &self,
        index: DeviceIndex,
        include_self: bool,
    ) -> Result<Vec<DeviceIndex>, DeviceGraphError> {
        self.walk(index, Direction::Outgoing, include_self)
    }

    /// Devices from which `index` is reachable, in breadth-first order.
    pub fn ancestors(
        &self,
        index: DeviceIndex,
        include_self: bool,
    ) -> Result<Vec<DeviceIndex>, DeviceGraphError> {
        self.walk(index, Direction::Incoming, include_self)
    }

    fn check_back_reference(&self, index: DeviceIndex) -> Result<(), DeviceGraphError> {
        let device = self.vertex(index)?;
        match device.membership() {
            Some(membership) if membership.graph == self.id && membership.vertex == index => {
                Ok(())
            }
            _ => Err(DeviceGraphError::InvariantViolation {
                sid: device.sid(),
                body: "recorded devicegraph position does not match its vertex".into(),
            }),
        }
    }

    /// Verifies back-references, the sid index and acyclicity.
    pub fn check(&self) -> Result<(), DeviceGraphError> {
        let mut seen = BTreeSet::new();
        for index in self.inner.node_indices() {
            self.check_back_reference(index)?;

            let sid = self.inner[index].sid();
            if !seen.insert(sid) {
                return Err(DeviceGraphError::DuplicateSid(sid));
            }

            if self.find_index(sid) != Some(index) {
                return Err(DeviceGraphError::InvariantViolation {
                    sid,
                    body: "sid index points to another vertex".into(),
                });
            }
        }

        if seen.len() != self.sid_index.len() {
            return Err(DeviceGraphError::InvariantViolation {
                sid: self
                    .sids()
                    .find(|sid| !seen.contains(sid))
                    .unwrap_or(Sid(0)),
                body: "sid index refers to a removed device".into(),
            });
        }

        if is_cyclic_directed(&self.inner) {
            let sid = self
                .inner
                .node_indices()
                .find(|index| {
                    self.inner
                        .neighbors_directed(*index, Direction::Outgoing)
                        .any(|child| has_path_connecting(&self.inner, child, *index, None))
                })
                .map(|index| self.inner[index].sid())
                .unwrap_or(Sid(0));
            return Err(DeviceGraphError::Cycle(sid));
        }

        Ok(())
    }

    /// Renders the graph structure for logging.
    pub fn describe(&self) -> String {
        let mut result = String::new();
        for device in self.devices() {
            let _ = write!(
                result,
                "{} {} '{}'",
                device.sid(),
                device.device_type(),
                device.displayname()
            );
            let children = device.children();
            if !children.is_empty() {
                let _ = write!(
                    result,
                    " -> [{}]",
                    children
                        .iter()
                        .map(|child| child.sid().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            result.push('\n');
        }
        result
    }
}

/// Copies every device by value into a new devicegraph with its own
/// [`GraphId`]. Vertex indices are preserved.
impl Clone for DeviceGraph {
    fn clone(&self) -> Self {
        let id = GraphId::next();
        let mut inner = self.inner.clone();
        for index in self.inner.node_indices() {
            inner[index].set_membership(Some(Membership { graph: id, vertex: index }));
        }

        DeviceGraph {
            id,
            allocator: self.allocator.clone(),
            inner,
            sid_index: self.sid_index.clone(),
        }
    }
}

/// Graphs are equal when they hold equal devices and the same holders.
impl PartialEq for DeviceGraph {
    fn eq(&self, other: &Self) -> bool {
        self.num_devices() == other.num_devices()
            && self.devices().all(|device| {
                other
                    .find_device(device.sid())
                    .is_some_and(|found| found.device() == device.device())
            })
            && self.holders() == other.holders()
    }
}

/// Borrowed view of a device together with its position in a devicegraph.
#[derive(Clone, Copy)]
pub struct DeviceRef<'g> {
    graph: &'g DeviceGraph,
    index: DeviceIndex,
}

impl Debug for DeviceRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRef")
            .field("sid", &self.sid())
            .field("type", &self.device_type())
            .field("index", &self.index.index())
            .finish()
    }
}

impl<'g> DeviceRef<'g> {
    pub fn graph(&self) -> &'g DeviceGraph {
        self.graph
    }

    pub fn index(&self) -> DeviceIndex {
        self.index
    }

    pub fn device(&self) -> &'g Device {
        &self.graph.inner[self.index]
    }

    pub fn sid(&self) -> Sid {
        self.device().sid()
    }

    pub fn device_type(&self) -> DeviceType {
        self.device().device_type()
    }

    pub fn kind(&self) -> &'g DeviceKind {
        self.device().kind()
    }

    pub fn imp(&self) -> &'g dyn DeviceImpl {
        self.device().imp()
    }

    pub fn as_variant<T: DeviceVariant>(&self) -> Option<&'g T> {
        T::from_kind(self.kind())
    }

    /// Like [`Self::as_variant`] but fails for other device types.
    pub fn variant<T: DeviceVariant>(&self) -> Result<&'g T, DeviceGraphError> {
        self.as_variant().ok_or(DeviceGraphError::WrongDeviceType {
            sid: self.sid(),
            expected: T::DEVICE_TYPE.to_string(),
            actual: self.device_type(),
        })
    }

    pub fn is<T: DeviceVariant>(&self) -> bool {
        self.as_variant::<T>().is_some()
    }

    pub fn displayname(&self) -> String {
        self.imp().displayname(*self)
    }

    fn wrap(&self, indices: Vec<DeviceIndex>) -> Vec<DeviceRef<'g>> {
        indices
            .into_iter()
            .map(|index| DeviceRef {
                graph: self.graph,
                index,
            })
            .collect()
    }

    pub fn parents(&self) -> Vec<DeviceRef<'g>> {
        self.wrap(self.graph.parents(self.index))
    }

    pub fn children(&self) -> Vec<DeviceRef<'g>> {
        self.wrap(self.graph.children(self.index))
    }

    /// The parent with the lowest sid. Most devices have exactly one.
    pub fn parent(&self) -> Option<DeviceRef<'g>> {
        self.parents().into_iter().next()
    }

    pub fn parent_sids(&self) -> BTreeSet<Sid> {
        self.parents().iter().map(DeviceRef::sid).collect()
    }

    pub fn num_parents(&self) -> usize {
        self.graph.num_parents(self.index)
    }

    pub fn num_children(&self) -> usize {
        self.graph.num_children(self.index)
    }

    /// Devices reachable from this one, in breadth-first order.
    pub fn descendants(&self, include_self: bool) -> Vec<DeviceRef<'g>> {
        self.wrap(
            self.graph
                .descendants(self.index, include_self)
                .unwrap_or_default(),
        )
    }

    /// Region of block devices, `None` for other devices.
    pub fn region(&self) -> Option<Region> {
        self.imp().region(*self)
    }

    /// Size in bytes of block devices, `None` for other devices.
    pub fn size(&self) -> Option<u64> {
        self.region().map(|region| region.size())
    }

    pub fn detect_resize_info(&self) -> ResizeInfo {
        self.imp().detect_resize_info(*self)
    }
}
