use std::process::Command;

use anyhow::{Context, Error};
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use sysdefs::units::SECTOR_SIZE;

use blkplan_api::{
    devicegraph::{BlockDeviceInfo, BlockDeviceKind, SystemInfo},
    devices::PtType,
};

use crate::exe::RunAndCheck;

/// Columns requested from lsblk. Must match the fields of [`BlockDevice`].
const COLUMNS: &[&str] = &[
    "NAME",
    "TYPE",
    "SIZE",
    "LOG-SEC",
    "START",
    "ROTA",
    "VENDOR",
    "MODEL",
    "TRAN",
    "PTTYPE",
    "PARTTYPE",
    "FSTYPE",
    "LABEL",
    "UUID",
    "MOUNTPOINT",
];

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LsBlkOutput {
    pub blockdevices: Vec<BlockDevice>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlockDevice {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub size: u64,
    #[serde(rename = "log-sec")]
    pub logical_sector_size: Option<u64>,
    pub start: Option<u64>,
    #[serde(rename = "rota", default)]
    pub rotational: bool,
    pub vendor: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "tran")]
    pub transport: Option<String>,
    #[serde(rename = "pttype")]
    pub pt_type: Option<String>,
    #[serde(rename = "parttype")]
    pub part_type: Option<String>,
    #[serde(rename = "fstype")]
    pub fs_type: Option<String>,
    pub label: Option<String>,
    pub uuid: Option<String>,
    #[serde(rename = "mountpoint")]
    pub mount_point: Option<String>,
    pub children: Option<Vec<BlockDevice>>,
}

/// Lists every block device of the host, as a tree.
pub fn run() -> Result<Vec<BlockDevice>, Error> {
    let output = Command::new("lsblk")
        .arg("--json")
        .arg("--bytes")
        .arg("--paths")
        .arg("--output")
        .arg(COLUMNS.join(","))
        .output_and_check()
        .context("Failed to execute lsblk")?;

    let parsed = parse_lsblk_output(&output);
    if parsed.is_err() {
        warn!("lsblk output: {output}");
    }
    parsed
}

/// Probes the host into the snapshot the devicegraph is populated from.
pub fn system_info() -> Result<SystemInfo, Error> {
    Ok(to_system_info(&run()?))
}

fn parse_lsblk_output(output: &str) -> Result<Vec<BlockDevice>, Error> {
    let parsed: LsBlkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;
    Ok(parsed.blockdevices)
}

/// Flattens the lsblk tree. Devices with several parents (multipath maps,
/// logical volumes spanning several physical volumes) show up once under
/// each parent and are merged into a single entry.
pub fn to_system_info(devices: &[BlockDevice]) -> SystemInfo {
    let mut info = SystemInfo::default();
    for device in devices {
        flatten(device, None, &mut info.block_devices);
    }
    info
}

fn flatten(device: &BlockDevice, parent: Option<&str>, out: &mut Vec<BlockDeviceInfo>) {
    match out.iter_mut().find(|blk| blk.name == device.name) {
        Some(existing) => {
            trace!("Merging repeated lsblk entry '{}'", device.name);
            if let Some(parent) = parent {
                if !existing.parents.iter().any(|name| name == parent) {
                    existing.parents.push(parent.to_string());
                }
            }
        }
        None => out.push(convert(device, parent)),
    }

    for child in device.children.iter().flatten() {
        flatten(child, Some(&device.name), out);
    }
}

fn convert(device: &BlockDevice, parent: Option<&str>) -> BlockDeviceInfo {
    let kind = match device.device_type.as_str() {
        "disk" => BlockDeviceKind::Disk,
        "part" => BlockDeviceKind::Part,
        "mpath" => BlockDeviceKind::Mpath,
        "crypt" => BlockDeviceKind::Crypt,
        "lvm" => BlockDeviceKind::Lvm,
        _ => BlockDeviceKind::Other,
    };

    let pt_type = match device.pt_type.as_deref() {
        Some("gpt") => Some(PtType::Gpt),
        Some("dos") | Some("msdos") => Some(PtType::Msdos),
        _ => None,
    };

    let dm_name = matches!(
        kind,
        BlockDeviceKind::Mpath | BlockDeviceKind::Crypt | BlockDeviceKind::Lvm
    )
    .then(|| device.name.strip_prefix("/dev/mapper/"))
    .flatten()
    .map(str::to_string);

    BlockDeviceInfo {
        name: device.name.clone(),
        kind,
        size: device.size,
        logical_block_size: device.logical_sector_size.unwrap_or(SECTOR_SIZE),
        start: device.start,
        rotational: device.rotational,
        vendor: trimmed(&device.vendor),
        model: trimmed(&device.model),
        transport: trimmed(&device.transport),
        pt_type,
        partition_type_id: device.part_type.clone(),
        signature: device.fs_type.clone(),
        fs_label: device.label.clone(),
        fs_uuid: device.uuid.clone(),
        mount_point: device.mount_point.as_deref().map(|path| match path {
            "[SWAP]" => "swap".to_string(),
            path => path.to_string(),
        }),
        dm_name,
        parents: parent.map(|name| vec![name.to_string()]).unwrap_or_default(),
    }
}

/// lsblk pads some identification strings with spaces.
fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
