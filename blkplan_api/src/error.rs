use std::path::PathBuf;

use crate::{
    actiongraph::Side,
    devicegraph::Sid,
    devices::DeviceType,
};

/// Violation of a devicegraph invariant. These are programming errors of the
/// caller and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceGraphError {
    #[error("Invariant violated for device {sid}: {body}")]
    InvariantViolation { sid: Sid, body: String },

    #[error("Sid {0} is already used in this devicegraph")]
    DuplicateSid(Sid),

    #[error("Device {0} not found in devicegraph")]
    DeviceNotFound(Sid),

    #[error("Vertex {0} is not part of this devicegraph")]
    InvalidVertex(usize),

    #[error("Holder from {parent} to {child} would create a cycle")]
    WouldCreateCycle { parent: Sid, child: Sid },

    #[error("Holder from {parent} to {child} already exists")]
    DuplicateHolder { parent: Sid, child: Sid },

    #[error("No holder from {parent} to {child}")]
    HolderNotFound { parent: Sid, child: Sid },

    #[error("Device {sid} is a {actual}, expected {expected}")]
    WrongDeviceType {
        sid: Sid,
        expected: String,
        actual: DeviceType,
    },

    #[error("Device {0} is already in use")]
    DeviceInUse(Sid),

    #[error("Invalid device name '{0}'")]
    InvalidName(String),

    #[error("Devicegraph contains a cycle through device {0}")]
    Cycle(Sid),

    #[error("No sids left to allocate")]
    SidsExhausted,
}

/// Failure to save or load a devicegraph.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("Invalid value for field '{field}'")]
    InvalidField {
        field: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unknown device type '{0}'")]
    UnknownDeviceType(String),

    #[error("Invalid attributes for device {sid}")]
    InvalidDevice {
        sid: Sid,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Devicegraph document is not a mapping")]
    NotAMapping,

    #[error("Failed to access '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Graph(#[from] DeviceGraphError),
}

/// Failure to build a devicegraph from system information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Block device '{0}' is reported more than once")]
    DuplicateBlockDevice(String),

    #[error("Block device '{0}' is not part of the system information")]
    UnknownBlockDevice(String),

    #[error("Block device '{name}' references unknown device '{parent}'")]
    UnknownParent { name: String, parent: String },

    #[error("Block device '{name}' has no {attribute}")]
    MissingAttribute {
        name: String,
        attribute: &'static str,
    },

    #[error("Cannot split device mapper name '{0}' into volume group and logical volume")]
    InvalidLvmName(String),

    #[error(transparent)]
    Graph(#[from] DeviceGraphError),
}

/// Failure to build an action graph from two devicegraphs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionGraphError {
    #[error("Device {sid} not found in {side} devicegraph")]
    DanglingReference { sid: Sid, side: Side },

    #[error("Action '{action}' is not supported for {class} {sid}")]
    UnsupportedAction {
        sid: Sid,
        class: DeviceType,
        action: &'static str,
    },

    #[error("Action graph contains a cycle through '{0}'")]
    CyclicActionGraph(String),

    #[error(transparent)]
    Graph(#[from] DeviceGraphError),
}

/// Failure to commit a single action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("Stub {verb} called for {class}")]
    StubCalled { class: DeviceType, verb: &'static str },

    #[error("Command '{command}' failed: {body}")]
    CommandFailed { command: String, body: String },

    #[error(transparent)]
    ActionGraph(#[from] ActionGraphError),
}
