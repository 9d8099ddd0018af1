//! Saving and loading devicegraphs as YAML documents.
//!
//! ```yaml
//! devices:
//!   - type: Disk
//!     sid: 42
//!     name: /dev/sda
//!     region: { start: 0, length: 2097152, block-size: 512 }
//!   - type: PartitionTable
//!     sid: 43
//!     pt-type: gpt
//! holders:
//!   - source: 42
//!     target: 43
//!     type: Subdevice
//! ```

use std::{fs, path::Path, str::FromStr, sync::Arc};

use log::debug;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::{
    devices::{DeviceKind, DeviceType},
    error::{DeviceGraphError, PersistenceError},
};

use super::{
    device::Device,
    graph::{DeviceGraph, Holder},
    sid::{Sid, SidAllocator},
};

const DEVICES: &str = "devices";
const HOLDERS: &str = "holders";
const TYPE: &str = "type";
const SID: &str = "sid";
const SOURCE: &str = "source";
const TARGET: &str = "target";

/// Reads and deserializes a mandatory field of a record.
fn field<T: DeserializeOwned>(node: &Mapping, name: &str) -> Result<T, PersistenceError> {
    let value = node
        .get(name)
        .ok_or_else(|| PersistenceError::MissingField(name.to_string()))?;
    serde_yaml::from_value(value.clone()).map_err(|source| PersistenceError::InvalidField {
        field: name.to_string(),
        source,
    })
}

fn records<'a>(root: &'a Mapping, name: &str) -> Result<&'a [Value], PersistenceError> {
    match root.get(name) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Sequence(records)) => Ok(records),
        Some(_) => Err(PersistenceError::NotAMapping),
    }
}

fn save_device(device: &Device) -> Result<Value, PersistenceError> {
    let mut node = Mapping::new();
    node.insert(TYPE.into(), device.device_type().to_string().into());
    node.insert(SID.into(), device.sid().0.into());
    match device.kind().to_value()? {
        Value::Mapping(fields) => node.extend(fields),
        Value::Null => {}
        _ => return Err(PersistenceError::NotAMapping),
    }
    Ok(Value::Mapping(node))
}

fn load_device(node: &Value) -> Result<Device, PersistenceError> {
    let node = node.as_mapping().ok_or(PersistenceError::NotAMapping)?;

    let type_name: String = field(node, TYPE)?;
    let device_type = DeviceType::from_str(&type_name)
        .map_err(|_| PersistenceError::UnknownDeviceType(type_name))?;
    let sid: Sid = field(node, SID)?;

    let mut fields = node.clone();
    fields.remove(TYPE);
    fields.remove(SID);
    let kind = DeviceKind::from_value(device_type, Value::Mapping(fields))
        .map_err(|source| PersistenceError::InvalidDevice { sid, source })?;

    Ok(Device::with_sid(sid, kind))
}

impl DeviceGraph {
    /// Saves every device and holder into a YAML value.
    pub fn save(&self) -> Result<Value, PersistenceError> {
        let devices = self
            .devices()
            .map(|device| save_device(device.device()))
            .collect::<Result<Vec<_>, _>>()?;

        let holders = self
            .holders()
            .into_iter()
            .map(|(parent, child, holder)| {
                let mut node = Mapping::new();
                node.insert(SOURCE.into(), parent.0.into());
                node.insert(TARGET.into(), child.0.into());
                node.insert(TYPE.into(), holder.to_string().into());
                Value::Mapping(node)
            })
            .collect();

        let mut root = Mapping::new();
        root.insert(DEVICES.into(), Value::Sequence(devices));
        root.insert(HOLDERS.into(), Value::Sequence(holders));
        Ok(Value::Mapping(root))
    }

    /// Loads a devicegraph saved with [`Self::save`]. Nothing is returned
    /// unless every record is valid. The allocator is advanced past the
    /// highest loaded sid.
    pub fn load(allocator: Arc<SidAllocator>, value: &Value) -> Result<Self, PersistenceError> {
        let root = value.as_mapping().ok_or(PersistenceError::NotAMapping)?;
        let mut graph = DeviceGraph::new(allocator);

        for node in records(root, DEVICES)? {
            let device = load_device(node)?;
            graph.add_vertex(device)?;
        }

        for node in records(root, HOLDERS)? {
            let node = node.as_mapping().ok_or(PersistenceError::NotAMapping)?;
            let parent: Sid = field(node, SOURCE)?;
            let child: Sid = field(node, TARGET)?;
            let holder: Holder = field(node, TYPE)?;

            let parent = graph
                .find_index(parent)
                .ok_or(DeviceGraphError::DeviceNotFound(parent))?;
            let child = graph
                .find_index(child)
                .ok_or(DeviceGraphError::DeviceNotFound(child))?;
            graph.add_edge(parent, child, holder)?;
        }

        if let Some(last) = graph.sids().last() {
            graph.allocator().reserve_past(last);
        }

        graph.check()?;
        Ok(graph)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        debug!("Saving devicegraph to '{}'", path.display());
        let contents = serde_yaml::to_string(&self.save()?)?;
        fs::write(path, contents).map_err(|source| PersistenceError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn load_from_file(
        allocator: Arc<SidAllocator>,
        path: impl AsRef<Path>,
    ) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        debug!("Loading devicegraph from '{}'", path.display());
        let contents = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_owned(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&contents)?;
        let graph = Self::load(allocator, &value)?;
        debug!(
            "Loaded devicegraph with {} devices and {} holders",
            graph.num_devices(),
            graph.num_holders()
        );
        Ok(graph)
    }
}
