// Centralised default values for all configuration keys.
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Config parsing, the CLI and the sample gpio-shutdown.conf all fall back to
// these values, so they are kept in one place.

// ── Line ─────────────────────────────────────────────────────────────────────

/// BCM line 3 doubles as the Raspberry Pi wake line.
pub const PIN: u32 = 3;
pub const IDLE_LEVEL: &str = "high";
pub const BIAS: &str = "auto";
pub const SYSFS_ROOT: &str = "/sys/class/gpio";
pub const EXPORT_SETTLE_MS: u64 = 1000;

// ── Timing ───────────────────────────────────────────────────────────────────

pub const POLL_INTERVAL_MS: u64 = 100;
pub const HOLD_DURATION_MS: u64 = 2000;

// ── Halt ─────────────────────────────────────────────────────────────────────

pub const HALT_COMMAND: &str = "shutdown -h now";

// ── Logging ──────────────────────────────────────────────────────────────────

pub const CONFIG_FILE: &str = "/etc/gpio-shutdown.conf";
pub const LOG_FILE: &str = "/var/log/gpio-shutdown.log";
pub const LOG_MAX_SIZE: u64 = 1024 * 1024;
pub const LOG_KEEP: u32 = 3;
/// Consecutive read failures between repeated warnings.
pub const READ_ERROR_LOG_EVERY: u64 = 50;

// ── Exit status ──────────────────────────────────────────────────────────────

/// Stopped by a termination signal, or a dry-run halt.
pub const EXIT_OK: i32 = 0;
/// Startup failure or failed halt; the unit manager restarts us.
pub const EXIT_FATAL: i32 = 1;
/// Halt handed to the OS. Listed in RestartPreventExitStatus= of the unit.
pub const EXIT_HALT_REQUESTED: i32 = 10;
