// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The subsystem's periodic background work: keeping each clock's cached
//! sample fresh and draining the EXTTS rings.  Mailbox commands block, so
//! every tick of work runs on the blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use slog::{debug, error, info, o, Logger};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use aal::{AsicError, AsicResult};

use crate::Subsystem;

/// How often the EXTTS rings are drained.
pub const EXTTS_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct Workers {
    log: Logger,
    runtime: Mutex<Option<tokio::runtime::Handle>>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    extts_started: AtomicBool,
    time_keep_wanted: AtomicBool,
    time_keep_started: AtomicBool,
}

impl Workers {
    pub fn new(log: &Logger) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Workers {
            log: log.new(o!("unit" => "workers")),
            runtime: Mutex::new(None),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            extts_started: AtomicBool::new(false),
            time_keep_wanted: AtomicBool::new(false),
            time_keep_started: AtomicBool::new(false),
        }
    }

    fn spawn<F>(&self, fut: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let rt = self.runtime.lock().unwrap();
        match rt.as_ref() {
            Some(handle) => {
                self.tasks.lock().unwrap().push(handle.spawn(fut));
                true
            }
            None => false,
        }
    }

    /// Record the runtime the workers run on and start the EXTTS consumer,
    /// along with the clock refresh if it was asked for before now.
    pub fn start(&self, sub: Weak<Subsystem>, interval: Duration) -> AsicResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            AsicError::Uninitialized(format!("no async runtime: {e}"))
        })?;
        *self.runtime.lock().unwrap() = Some(handle);

        if !self.extts_started.swap(true, Ordering::AcqRel) {
            let stop = self.stop_tx.subscribe();
            self.spawn(extts_task(sub.clone(), stop));
            info!(self.log, "extts consumer started";
                "interval_ms" => EXTTS_POLL_INTERVAL.as_millis() as u64);
        }
        if self.time_keep_wanted.load(Ordering::Acquire) {
            self.start_time_keep(sub, interval);
        }
        Ok(())
    }

    /// Start the clock refresh.  Only the first call has any effect.  If
    /// the workers have not been started yet, the refresh begins when they
    /// are.
    pub fn start_time_keep(&self, sub: Weak<Subsystem>, interval: Duration) {
        self.time_keep_wanted.store(true, Ordering::Release);
        if self.time_keep_started.load(Ordering::Acquire) {
            return;
        }
        if self.runtime.lock().unwrap().is_none() {
            debug!(self.log, "clock refresh deferred until start");
            return;
        }
        if self.time_keep_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let stop = self.stop_tx.subscribe();
        self.spawn(time_keep_task(sub, stop, interval));
        info!(self.log, "clock refresh started";
            "interval_ms" => interval.as_millis() as u64);
    }

    pub fn time_keep_running(&self) -> bool {
        self.time_keep_started.load(Ordering::Acquire)
    }

    /// Stop every worker and wait for any tick in progress to finish.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(self.log, "worker failed"; "error" => %e);
            }
        }
        self.extts_started.store(false, Ordering::Release);
        self.time_keep_started.store(false, Ordering::Release);
        info!(self.log, "workers stopped");
    }
}

/// Sleep for `period`, returning false if the workers were told to stop
/// first.
async fn tick(stop: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        res = stop.changed() => res.is_ok() && !*stop.borrow(),
        _ = tokio::time::sleep(period) => true,
    }
}

async fn extts_task(sub: Weak<Subsystem>, mut stop: watch::Receiver<bool>) {
    while tick(&mut stop, EXTTS_POLL_INTERVAL).await {
        let Some(sub) = sub.upgrade() else {
            break;
        };
        if tokio::task::spawn_blocking(move || sub.extts_poll())
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn time_keep_task(
    sub: Weak<Subsystem>,
    mut stop: watch::Receiver<bool>,
    interval: Duration,
) {
    while tick(&mut stop, interval).await {
        let Some(sub) = sub.upgrade() else {
            break;
        };
        if tokio::task::spawn_blocking(move || sub.time_keep_tick())
            .await
            .is_err()
        {
            break;
        }
    }
}
