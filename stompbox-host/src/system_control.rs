//! Concrete `SystemControl`: the MIDI
//! system-binding dispatch ladder in `Model` decides *when* to shut down,
//! restart, or toggle the hotspot; this module is the opaque call into the
//! external collaborator that actually does it. No Wi-Fi/network-manager
//! integration ships here (§1 non-goal) — the hotspot toggle logs and
//! stops there, same as `NullSystemControl`, but shutdown/restart hand off
//! to `systemctl` so the binding ladder has a real effect on a deployed
//! host.

use std::process::Command;

use log::{error, info, warn};

use stompbox_core::host::SystemControl;

pub struct ProcessSystemControl;

impl ProcessSystemControl {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, args: &[&str]) {
        match Command::new("systemctl").args(args).status() {
            Ok(status) if status.success() => info!(target: "system_control", "systemctl {} succeeded", args.join(" ")),
            Ok(status) => warn!(target: "system_control", "systemctl {} exited with {status}", args.join(" ")),
            Err(e) => error!(target: "system_control", "failed to invoke systemctl {}: {e}", args.join(" ")),
        }
    }
}

impl Default for ProcessSystemControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemControl for ProcessSystemControl {
    fn shutdown(&self) {
        self.run(&["poweroff"]);
    }

    fn restart(&self) {
        self.run(&["reboot"]);
    }

    fn set_hotspot_enabled(&self, enabled: bool) {
        warn!(target: "system_control", "hotspot {} requested; no hotspot controller wired up", if enabled { "enable" } else { "disable" });
    }
}
