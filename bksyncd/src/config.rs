// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `bksyncd`.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use bksync::attrs::AttrSetting;
use bksync::{InitData, SubsystemConfig};
use common::logging::LogFormat;

/// The run-time settings of the daemon.  Defaults are overridden by the
/// config file, if there is one, and then by command-line options.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Settings shared by every device.
    pub subsystem: SubsystemConfig,

    /// Platform backend settings.
    pub asic: asic::Config,

    /// Bring-up parameters, one entry per device.  Devices without an entry
    /// are brought up with the subsystem-wide `pci_cos` and `fw_core`.
    pub init: Vec<InitData>,

    /// Attribute rows applied once every device is up.
    pub attrs: Vec<AttrSetting>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&txt)
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// The bring-up parameters for device `dev_no`.
    pub fn init_data(&self, dev_no: usize) -> InitData {
        self.init.get(dev_no).copied().unwrap_or(InitData {
            pci_cos: self.subsystem.pci_cos,
            fw_core: self.subsystem.fw_core,
            ..Default::default()
        })
    }
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &crate::Opt, config: &mut Config) {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(debug) = opts.debug {
        config.subsystem.debug = debug;
    }

    if let Some(fw_abi) = opts.fw_abi {
        config.subsystem.fw_abi = fw_abi;
    }

    if let Some(master_core) = opts.master_core {
        config.subsystem.master_core = master_core;
    }

    if opts.shared_phc {
        config.subsystem.shared_phc = true;
    }

    if let Some(ms) = opts.phc_update_interval {
        config.subsystem.phc_update_interval_ms = ms;
    }

    if let Some(transport) = opts.network_transport {
        config.subsystem.network_transport = transport;
    }
}

/// Build the daemon's configuration from the defaults, the config file
/// named on the command line, and the remaining command-line options.
pub(crate) fn build_config(opts: &crate::Opt) -> anyhow::Result<Config> {
    let mut config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    update_from_cli(opts, &mut config);
    Ok(config)
}
