use std::process::Command;

use anyhow::{Context, Error};
use log::debug;

use crate::exe::RunAndCheck;

/// Waits until udev has processed the events of committed changes, so that
/// a probe afterwards sees the new device nodes.
pub fn settle() -> Result<(), Error> {
    debug!("Waiting for udev to settle");
    Command::new("udevadm")
        .arg("settle")
        .arg("--timeout=120")
        .run_and_check()
        .context("Failed to settle udev")
}
