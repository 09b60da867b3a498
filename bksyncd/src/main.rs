// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `bksyncd`, which brings up the switch
//! devices' hardware clocks and keeps them serviced until told to stop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::stream::StreamExt;
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::consts::SIGUSR1;
use signal_hook_tokio::Signals;
use slog::debug;
use slog::error;
use slog::info;
use slog::Logger;
use structopt::StructOpt;

use aal::fw::FwAbi;
use aal::PhcEvent;
use bksync::Subsystem;

mod config;

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "bksyncd", about = "switch PTP hardware clock daemon")]
pub(crate) struct Opt {
    #[structopt(long, about = "TOML file with the daemon's configuration")]
    config: Option<PathBuf>,

    #[structopt(
        long,
        about = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(long, help = "debug classes to enable, as a bitmask")]
    debug: Option<u32>,

    #[structopt(
        long,
        help = "firmware generation: 'legacy' or 'edk'",
        parse(try_from_str = parse_fw_abi)
    )]
    fw_abi: Option<FwAbi>,

    #[structopt(long, help = "device whose firmware owns the time of day")]
    master_core: Option<usize>,

    #[structopt(long, help = "register one clock for every device")]
    shared_phc: bool,

    #[structopt(long, help = "clock refresh interval, in milliseconds")]
    phc_update_interval: Option<u64>,

    #[structopt(
        long,
        help = "force the PTP transport: 2 (IPv4), 4 (IPv6) or 6 (L2)"
    )]
    network_transport: Option<u32>,
}

fn parse_fw_abi(s: &str) -> Result<FwAbi, String> {
    match s.to_lowercase().as_str() {
        "legacy" => Ok(FwAbi::Legacy),
        "edk" => Ok(FwAbi::Edk),
        x => Err(format!("invalid firmware ABI: {x}")),
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "mmio")] {
        fn build_platform(
            log: &Logger,
            config: &mut config::Config,
        ) -> anyhow::Result<asic::Handle> {
            asic::Handle::new(log, &config.asic).context("mapping devices")
        }

        // The command block address has to come from the config file.
        fn fw_comm_addr(_hdl: &asic::Handle, _dev_no: usize) -> anyhow::Result<Option<u64>> {
            Ok(None)
        }
    } else {
        fn build_platform(
            log: &Logger,
            config: &mut config::Config,
        ) -> anyhow::Result<asic::Handle> {
            // The simulated firmware speaks whichever ABI we expect.
            config.asic.fw_abi = config.subsystem.fw_abi;
            asic::Handle::new(log, &config.asic)
                .context("starting simulated switch")
        }

        fn fw_comm_addr(hdl: &asic::Handle, dev_no: usize) -> anyhow::Result<Option<u64>> {
            Ok(Some(hdl.fw_comm_addr(dev_no)?))
        }
    }
}

fn bring_up(
    sub: &Subsystem,
    hdl: &asic::Handle,
    config: &config::Config,
) -> anyhow::Result<()> {
    for dev_no in 0..sub.devices().len() {
        let mut init = config.init_data(dev_no);
        if init.fw_comm_phys == 0 {
            if let Some(addr) = fw_comm_addr(hdl, dev_no)? {
                init.fw_comm_phys = addr;
            }
        }
        sub.hw_init(dev_no, init)
            .with_context(|| format!("bringing up device {dev_no}"))?;
    }
    sub.apply_attrs(&config.attrs)
        .context("applying attribute settings")?;
    Ok(())
}

async fn forward_events(
    log: Logger,
    mut events: tokio::sync::mpsc::UnboundedReceiver<PhcEvent>,
) {
    while let Some(ev) = events.recv().await {
        match ev {
            PhcEvent::Extts {
                index,
                timestamp_ns,
            } => {
                info!(log, "external timestamp";
                    "channel" => index, "timestamp_ns" => timestamp_ns);
            }
        }
    }
    debug!(log, "event queue closed");
}

async fn handle_signals(sub: &Subsystem, log: &Logger, mut signals: Signals) {
    let log = log.new(slog::o!("unit" => "signal_handler"));
    let handle = signals.handle();

    while let Some(signal) = signals.next().await {
        match signal {
            SIGTERM | SIGQUIT | SIGINT | SIGHUP => {
                info!(log, "received signal"; "sig" => signal);
                handle.close();
                return;
            }
            SIGUSR1 => {
                info!(log, "{}", sub.dev_info_report());
                info!(log, "{}", sub.stats_report());
            }
            _ => unreachable!(),
        }
    }
}

async fn run_bksyncd(opt: Opt) -> anyhow::Result<()> {
    let mut config = config::build_config(&opt)?;

    let log =
        common::logging::init("bksyncd", &config.log_file, config.log_format)?;
    info!(log, "bksyncd config: {config:#?}");

    let hdl = build_platform(&log, &mut config)?;
    let sub: Arc<Subsystem> =
        Subsystem::new(&log, config.subsystem.clone(), &hdl)?;
    if let Err(e) = bring_up(&sub, &hdl, &config) {
        error!(log, "startup failed: {e:#}");
        sub.teardown().await;
        hdl.fini();
        return Err(e);
    }

    if let Some(events) = sub.take_events() {
        let log = log.new(slog::o!("unit" => "events"));
        tokio::spawn(forward_events(log, events));
    }
    sub.start()?;

    const SIGNALS: &[c_int] = &[SIGTERM, SIGQUIT, SIGINT, SIGHUP, SIGUSR1];
    let signals = Signals::new(SIGNALS).context("installing signal handlers")?;
    handle_signals(&sub, &log, signals).await;

    info!(log, "shutting down clock subsystem");
    sub.teardown().await;
    hdl.fini();

    info!(log, "done");
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    run_bksyncd(Opt::from_args()).await
}
