//! systemd notification support
//!
//! Lets the host run as a `Type=notify` service: READY once the listener is
//! bound, STOPPING when shutdown begins, and free-form status lines.

/// Notify systemd that the listener is bound and accepting connections.
#[cfg(feature = "systemd")]
pub fn notify_ready() {
    // false keeps NOTIFY_SOCKET around for the later STATUS/STOPPING messages
    match sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        Ok(()) => log::debug!("Sent READY notification to systemd"),
        Err(e) => log::debug!("Failed to notify systemd (not running under systemd?): {}", e),
    }
}

#[cfg(not(feature = "systemd"))]
pub fn notify_ready() {
    log::debug!("systemd notify support not compiled in");
}

/// Tell systemd that shutdown has started.
#[cfg(feature = "systemd")]
pub fn notify_stopping() {
    match sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        Ok(()) => log::debug!("Sent STOPPING notification to systemd"),
        Err(e) => log::debug!("Failed to send STOPPING notification: {}", e),
    }
}

#[cfg(not(feature = "systemd"))]
pub fn notify_stopping() {}

/// Update the status line shown by `systemctl status`.
#[cfg(feature = "systemd")]
pub fn notify_status(status: &str) {
    match sd_notify::notify(false, &[sd_notify::NotifyState::Status(status)]) {
        Ok(()) => log::trace!("Updated systemd status: {}", status),
        Err(e) => log::trace!("Failed to update status: {}", e),
    }
}

#[cfg(not(feature = "systemd"))]
pub fn notify_status(_status: &str) {}
