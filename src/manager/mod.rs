//! Tunnel lifecycle management.
//!
//! The [`Manager`] is the public facade of the crate and the sole owner
//! of the registry of active tunnels, keyed by the SSH child's PID. It
//! drives the other components in order for each create request: alias
//! resolution, then port probing, then the supervisor spawn. Its job is
//! keeping the forked child and the kernel rule state consistent with
//! the registry across crashes, user-initiated closes, and signals.
//!
//! # Concurrency
//!
//! All operations serialize behind one internal mutex covering the
//! registry, tunnel state transitions, and the observer lists, so a
//! `Manager` can be shared across threads. Creation and removal run
//! inside a critical section with the termination signals masked: an
//! external SIGTERM cannot interleave between fork and registry
//! insertion, or between registry removal and rule teardown.
//!
//! # Reaping
//!
//! Children that die on their own (hop rebooted, network dropped, exec
//! failed) are observed by the reaper: [`Manager::reap_exited`] is a
//! plain callable any host loop can schedule, and a built-in thread
//! ticker is armed on the first create for embedders without a loop.
//! The ticker holds only a weak reference and disarms itself once the
//! registry drains; [`Manager::wait_for_all`] offers blocking-wait
//! semantics for non-interactive hosts. Both paths converge on the same
//! registry invariants.

mod signals;

pub use signals::shutdown_signals;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::wait::{wait, WaitStatus};
use tracing::{debug, info, warn};

use crate::addr::{Forwarding, HostAddr};
use crate::error::Error;
use crate::probe;
use crate::redirect::RuleDriver;
use crate::settings::Settings;
use crate::ssh_config;
use crate::tunnel::Tunnel;
use signals::SignalGuard;

/// Immutable identifying fields of a tunnel, as seen by observers.
#[derive(Debug, Clone)]
pub struct TunnelEvent {
    /// The hop alias the tunnel connects through.
    pub hop: String,
    /// The SSH child's process id.
    pub pid: u32,
    /// The forwardings carried by the tunnel, in creation order.
    pub forwardings: Vec<Forwarding>,
}

/// Observer invoked on tunnel creation or close.
pub type TunnelCallback = Box<dyn Fn(&TunnelEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    registry: HashMap<u32, Tunnel>,
    on_create: Vec<TunnelCallback>,
    on_close: Vec<TunnelCallback>,
    reaper_armed: bool,
}

/// Coordinates tunnels: creates them, registers them, reaps them.
pub struct Manager {
    settings: Settings,
    driver: RuleDriver,
    inner: Mutex<Inner>,
    // Handed to the reaper ticker so it never keeps the manager alive.
    weak_self: Weak<Manager>,
}

impl Manager {
    /// Create a manager with the given settings.
    ///
    /// Returns an `Arc` because the built-in reaper ticker needs a weak
    /// handle back to the manager. Multiple managers can coexist; there
    /// is no process-wide state.
    pub fn new(settings: Settings) -> Arc<Self> {
        for tool in [&settings.ssh_binary, &settings.rule_tool] {
            if !tool.contains('/') {
                if let Err(e) = which::which(tool) {
                    warn!("'{}' not found in PATH: {}", tool, e);
                }
            }
        }

        Arc::new_cyclic(|weak_self| Self {
            driver: RuleDriver::new(&settings.rule_tool),
            settings,
            inner: Mutex::new(Inner::default()),
            weak_self: weak_self.clone(),
        })
    }

    /// Register an observer fired after each successful create.
    ///
    /// Observers run synchronously on the thread driving the operation
    /// and must not call back into the manager.
    pub fn on_create(&self, callback: impl Fn(&TunnelEvent) + Send + Sync + 'static) {
        self.inner().on_create.push(Box::new(callback));
    }

    /// Register an observer fired after each tunnel closes.
    ///
    /// Same discipline as [`Manager::on_create`]: synchronous, and no
    /// re-entry into the manager.
    pub fn on_close(&self, callback: impl Fn(&TunnelEvent) + Send + Sync + 'static) {
        self.inner().on_close.push(Box::new(callback));
    }

    /// Create a tunnel through `hop_alias` carrying one forwarding per
    /// target, and return the SSH child's PID.
    ///
    /// The alias is resolved through the configured SSH config files to
    /// pick local ports bound to the right route; the alias itself is
    /// passed to the SSH client verbatim, which resolves it again with
    /// its full option set. Create observers fire after the registry
    /// holds the new tunnel. On any failure nothing is recorded and no
    /// rule survives.
    pub fn create_tunnel(&self, hop_alias: &str, targets: &[HostAddr]) -> Result<u32, Error> {
        info!(
            "Creating tunnel via hop {} with {} target(s)",
            hop_alias,
            targets.len()
        );

        let hop_addr = ssh_config::resolve(hop_alias, &self.settings.config_files);
        let locals =
            probe::probe_local_endpoints(&hop_addr, targets.len(), self.settings.probe_timeout())?;
        let forwardings: Vec<Forwarding> = locals
            .into_iter()
            .zip(targets.iter().cloned())
            .map(|(local, target)| Forwarding::new(local, target))
            .collect();

        let mut tunnel = Tunnel::new(
            hop_alias.to_string(),
            forwardings,
            self.driver.clone(),
            PathBuf::from(&self.settings.ssh_binary),
            self.settings.keepalive_secs,
        );

        let _guard = SignalGuard::block(&shutdown_signals());
        let pid = tunnel.connect()?;
        let event = TunnelEvent {
            hop: tunnel.hop().to_string(),
            pid,
            forwardings: tunnel.forwardings().to_vec(),
        };

        let mut inner = self.inner();
        inner.registry.insert(pid, tunnel);
        self.arm_reaper(&mut inner);
        for callback in &inner.on_create {
            callback(&event);
        }
        Ok(pid)
    }

    /// Disconnect the tunnel with the given PID and return it.
    ///
    /// Returns `None` if no active tunnel has that PID, which makes the
    /// operation idempotent. Close observers fire after the registry
    /// entry is gone and the rules are torn down.
    pub fn remove_tunnel(&self, pid: u32) -> Option<Tunnel> {
        self.close_and_notify(pid, false)
    }

    /// Disconnect every active tunnel.
    pub fn close_all(&self) {
        let pids: Vec<u32> = self.inner().registry.keys().copied().collect();
        info!("Closing all tunnels ({})", pids.len());
        for pid in pids {
            self.remove_tunnel(pid);
        }
    }

    /// Snapshot the active tunnels.
    pub fn active(&self) -> Vec<TunnelEvent> {
        self.inner()
            .registry
            .iter()
            .map(|(pid, tunnel)| TunnelEvent {
                hop: tunnel.hop().to_string(),
                pid: *pid,
                forwardings: tunnel.forwardings().to_vec(),
            })
            .collect()
    }

    /// Whether no tunnels are active.
    pub fn is_empty(&self) -> bool {
        self.inner().registry.is_empty()
    }

    /// Reaper tick: poll every registered child without blocking and
    /// close the tunnels whose child has exited. Returns how many closed.
    ///
    /// This is the callable to schedule from a host event loop; the
    /// built-in thread ticker calls it once per configured interval.
    pub fn reap_exited(&self) -> usize {
        let pids: Vec<u32> = self.inner().registry.keys().copied().collect();
        let mut closed = 0;
        for pid in pids {
            let exited = self
                .inner()
                .registry
                .get_mut(&pid)
                .map(|tunnel| tunnel.try_reap())
                .unwrap_or(false);
            if exited {
                debug!("Reaper observed exit of PID {}", pid);
                if self.close_and_notify(pid, true).is_some() {
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Block until every tunnel has closed.
    ///
    /// This is the path for non-interactive hosts that can dedicate a
    /// thread: it sleeps in a child wait, ignores transient stops, and
    /// drives the same close path as the reaper for each actual
    /// termination of a registered PID.
    pub fn wait_for_all(&self) {
        loop {
            if self.inner().registry.is_empty() {
                return;
            }

            match wait() {
                Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                    let pid = pid.as_raw() as u32;
                    // PIDs we don't know (an embedder's own child) are
                    // left alone.
                    self.close_and_notify(pid, true);
                }
                // Traced or continued children are transient states.
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    // Nothing waitable: some other path reaped our
                    // children. Fall back to polling the registry.
                    self.reap_exited();
                    if self.inner().registry.is_empty() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("Child wait failed: {}", e);
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Common close path: drop from the registry, tear down, notify.
    ///
    /// `reaped` records that the child's exit was already collected, so
    /// teardown won't signal a PID that may have been recycled.
    fn close_and_notify(&self, pid: u32, reaped: bool) -> Option<Tunnel> {
        let _guard = SignalGuard::block(&shutdown_signals());
        let mut inner = self.inner();
        let mut tunnel = inner.registry.remove(&pid)?;
        if reaped {
            tunnel.mark_reaped();
        }
        let event = TunnelEvent {
            hop: tunnel.hop().to_string(),
            pid,
            forwardings: tunnel.forwardings().to_vec(),
        };
        tunnel.disconnect();
        for callback in &inner.on_close {
            callback(&event);
        }
        Some(tunnel)
    }

    /// Start the reaper ticker thread if it isn't running.
    fn arm_reaper(&self, inner: &mut Inner) {
        if inner.reaper_armed {
            return;
        }

        let interval = self.settings.reaper_interval();
        let weak = self.weak_self.clone();
        let spawned = thread::Builder::new()
            .name("hoptun-reaper".to_string())
            .spawn(move || {
                debug!("Reaper armed");
                loop {
                    thread::sleep(interval);
                    let Some(manager) = weak.upgrade() else {
                        return;
                    };
                    manager.reap_exited();
                    let mut inner = manager.inner();
                    if inner.registry.is_empty() {
                        inner.reaper_armed = false;
                        debug!("Reaper disarmed: no active tunnels");
                        return;
                    }
                }
            });

        match spawned {
            Ok(_) => inner.reaper_armed = true,
            Err(e) => warn!("Failed to start reaper thread: {}", e),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // Last line of cooperative cleanup; rules leak only on SIGKILL.
        let pids: Vec<u32> = self.inner().registry.keys().copied().collect();
        for pid in pids {
            if let Some(mut tunnel) = self.inner().registry.remove(&pid) {
                tunnel.disconnect();
            }
        }
    }
}
