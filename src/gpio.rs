// GPIO line access through the Linux sysfs interface
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{Bias, IdleLevel, MonitorConfig};
use crate::defaults;
use crate::helpers::{find_executable, read_file, run_cmd, write_sysfs};
use crate::{debug, info, warn};

#[derive(Error, Debug)]
pub enum GpioError {
    /// The line could not be claimed; fatal at startup
    #[error("Cannot claim GPIO {pin}: {reason}")]
    Claim { pin: u32, reason: String },
    #[error("Read of GPIO {pin} failed: {source}")]
    Read {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("GPIO {pin} returned unexpected value '{value}'")]
    BadValue { pin: u32, value: String },
}

impl GpioError {
    /// Per-sample failures that the monitor recovers from
    pub fn is_transient(&self) -> bool {
        matches!(self, GpioError::Read { .. } | GpioError::BadValue { .. })
    }
}

pub type Result<T> = std::result::Result<T, GpioError>;

/// A single input line reporting whether the button is actuated
pub trait LineReader {
    /// `true` when the line is away from its idle level
    fn read(&mut self) -> Result<bool>;

    /// Give up the line claim. Idempotent and infallible.
    fn release(&mut self);
}

/// Input line claimed through /sys/class/gpio
#[derive(Debug)]
pub struct SysfsLine {
    pin: u32,
    line: u32,
    idle: IdleLevel,
    root: PathBuf,
    value: Option<File>,
    claimed: bool,
}

impl SysfsLine {
    /// Export the line, configure it as a biased input and open its value file
    pub fn open(config: &MonitorConfig) -> Result<Self> {
        let pin = config.pin;
        let root = config.sysfs_root.clone();

        if !root.join("export").exists() {
            return Err(GpioError::Claim {
                pin,
                reason: format!("sysfs GPIO interface not available at {}", root.display()),
            });
        }

        let line = resolve_line(&root, pin, config.sysfs_base);
        let gpio_dir = root.join(format!("gpio{}", line));
        debug!("GPIO {}: kernel line {}", pin, line);

        export(&root, pin, line, &gpio_dir)?;

        // From here on Drop unexports the line if setup fails
        let mut this = Self {
            pin,
            line,
            idle: config.idle_level,
            root,
            value: None,
            claimed: true,
        };

        let settle = Duration::from_millis(defaults::EXPORT_SETTLE_MS);
        set_direction_input(pin, &gpio_dir, settle)?;
        apply_bias(config.bias, pin, config.idle_level);

        let value_path = gpio_dir.join("value");
        let file = File::open(&value_path).map_err(|e| GpioError::Claim {
            pin,
            reason: format!("cannot open {}: {}", value_path.display(), e),
        })?;
        this.value = Some(file);

        info!(
            "GPIO {}: claimed as input (line {}, idle {}, bias {})",
            pin, line, config.idle_level, config.bias
        );
        Ok(this)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Raw electrical level, 0 or 1
    pub fn read_raw(&self) -> Result<u8> {
        let file = self.value.as_ref().ok_or_else(|| GpioError::Read {
            pin: self.pin,
            source: io::Error::new(io::ErrorKind::NotConnected, "line released"),
        })?;

        let mut buf = [0u8; 8];
        let n = file.read_at(&mut buf, 0).map_err(|source| GpioError::Read {
            pin: self.pin,
            source,
        })?;

        match String::from_utf8_lossy(&buf[..n]).trim() {
            "0" => Ok(0),
            "1" => Ok(1),
            other => Err(GpioError::BadValue {
                pin: self.pin,
                value: other.to_string(),
            }),
        }
    }
}

impl LineReader for SysfsLine {
    fn read(&mut self) -> Result<bool> {
        Ok(self.read_raw()? != self.idle.raw())
    }

    fn release(&mut self) {
        if !self.claimed {
            return;
        }
        self.claimed = false;
        self.value = None;

        match write_sysfs(self.root.join("unexport"), &self.line.to_string()) {
            Ok(()) => info!("GPIO {}: released", self.pin),
            Err(e) => warn!("GPIO {}: unexport failed: {}", self.pin, e),
        }
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Map a BCM pin number to the kernel's global line number.
/// Newer kernels place the SoC controller at a non-zero base (512 on
/// Pi 4, 571 for RP1 on Pi 5), so prefer the pinctrl chip's base.
pub fn resolve_line(root: &Path, pin: u32, base: Option<u32>) -> u32 {
    if let Some(base) = base {
        return base + pin;
    }

    let mut chips: Vec<(String, u32)> = Vec::new();
    if let Ok(entries) = glob::glob(&format!("{}/gpiochip*", root.display())) {
        for entry in entries.flatten() {
            let label = read_file(entry.join("label")).unwrap_or_default();
            let label = label.trim();
            if !label.starts_with("pinctrl-") {
                continue;
            }
            if let Some(base) = read_file(entry.join("base"))
                .ok()
                .and_then(|b| b.trim().parse().ok())
            {
                chips.push((label.to_string(), base));
            }
        }
    }

    let base = chips
        .iter()
        .find(|(label, _)| label == "pinctrl-rp1")
        .or_else(|| chips.iter().min_by_key(|(_, base)| *base))
        .map(|(_, base)| *base)
        .unwrap_or(0);
    base + pin
}

fn export(root: &Path, pin: u32, line: u32, gpio_dir: &Path) -> Result<()> {
    match write_sysfs(root.join("export"), &line.to_string()) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) && gpio_dir.exists() => {
            // Left behind by an instance that did not get to unexport
            warn!("GPIO {}: already exported, adopting stale claim", pin);
            Ok(())
        }
        Err(e) => {
            let reason = match e.raw_os_error() {
                Some(libc::EBUSY) => "line is in use by another driver".to_string(),
                Some(libc::EINVAL) => format!("line {} does not exist", line),
                Some(libc::EACCES) | Some(libc::EPERM) => "permission denied".to_string(),
                _ => e.to_string(),
            };
            Err(GpioError::Claim { pin, reason })
        }
    }
}

/// udev may still be fixing permissions right after export, so retry
fn set_direction_input(pin: u32, gpio_dir: &Path, settle: Duration) -> Result<()> {
    let direction = gpio_dir.join("direction");
    let deadline = Instant::now() + settle;

    loop {
        match write_sysfs(&direction, "in") {
            Ok(()) => return Ok(()),
            Err(e) if Instant::now() < deadline => {
                debug!("GPIO {}: direction not ready: {}", pin, e);
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(GpioError::Claim {
                    pin,
                    reason: format!("cannot set {} to input: {}", direction.display(), e),
                })
            }
        }
    }
}

/// Pull the line toward its idle level. Sysfs has no bias control, so this
/// goes through the platform's pin tool; absence is not fatal because the
/// pull may come from an external resistor or a device tree overlay.
fn apply_bias(bias: Bias, pin: u32, idle: IdleLevel) {
    let tools: &[&str] = match bias {
        Bias::None => return,
        Bias::Auto => &["pinctrl", "raspi-gpio"],
        Bias::Pinctrl => &["pinctrl"],
        Bias::RaspiGpio => &["raspi-gpio"],
    };
    let pull = match idle {
        IdleLevel::High => "pu",
        IdleLevel::Low => "pd",
    };

    let Some(tool) = tools.iter().copied().find(|t| find_executable(t).is_some()) else {
        warn!(
            "GPIO {}: no bias tool found ({}), relying on external pull resistor",
            pin,
            tools.join(", ")
        );
        return;
    };

    let pin_str = pin.to_string();
    match run_cmd(&[tool, "set", &pin_str, "ip", pull]) {
        Ok(true) => debug!("GPIO {}: {} set ip {}", pin, tool, pull),
        Ok(false) => warn!("GPIO {}: {} could not set pull {}", pin, tool, pull),
        Err(e) => warn!("GPIO {}: {} failed: {}", pin, tool, e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    use crate::config::Config;

    pub(crate) fn fake_sysfs(line: u32, value: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        let gpio = dir.path().join(format!("gpio{}", line));
        fs::create_dir(&gpio).unwrap();
        fs::write(gpio.join("direction"), "").unwrap();
        fs::write(gpio.join("value"), value).unwrap();
        dir
    }

    pub(crate) fn config_for(root: &Path, pin: u32, idle: &str) -> MonitorConfig {
        let mut config = Config::default();
        config.set("pin", pin.to_string());
        config.set("idle_level", idle);
        config.set("bias", "none");
        config.set("sysfs_root", root.display().to_string());
        MonitorConfig::from_config(&config).unwrap()
    }

    fn add_chip(root: &Path, name: &str, label: &str, base: u32) {
        let chip = root.join(name);
        fs::create_dir(&chip).unwrap();
        fs::write(chip.join("label"), format!("{}\n", label)).unwrap();
        fs::write(chip.join("base"), format!("{}\n", base)).unwrap();
    }

    #[test]
    fn test_open_exports_and_configures_input() {
        let sysfs = fake_sysfs(3, "1\n");
        let line = SysfsLine::open(&config_for(sysfs.path(), 3, "high")).unwrap();

        assert_eq!(line.pin(), 3);
        assert_eq!(fs::read_to_string(sysfs.path().join("export")).unwrap(), "3");
        assert_eq!(
            fs::read_to_string(sysfs.path().join("gpio3/direction")).unwrap(),
            "in"
        );
    }

    #[test]
    fn test_read_maps_level_against_idle() {
        let sysfs = fake_sysfs(3, "1\n");
        let value = sysfs.path().join("gpio3/value");
        let mut line = SysfsLine::open(&config_for(sysfs.path(), 3, "high")).unwrap();

        assert!(!line.read().unwrap());
        fs::write(&value, "0\n").unwrap();
        assert!(line.read().unwrap());
        assert_eq!(line.read_raw().unwrap(), 0);

        fs::write(&value, "x\n").unwrap();
        let err = line.read().unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_read_with_idle_low() {
        let sysfs = fake_sysfs(5, "0\n");
        let mut line = SysfsLine::open(&config_for(sysfs.path(), 5, "low")).unwrap();
        assert!(!line.read().unwrap());
        fs::write(sysfs.path().join("gpio5/value"), "1\n").unwrap();
        assert!(line.read().unwrap());
    }

    #[test]
    fn test_release_is_idempotent() {
        let sysfs = fake_sysfs(3, "1\n");
        let mut line = SysfsLine::open(&config_for(sysfs.path(), 3, "high")).unwrap();

        line.release();
        line.release();
        drop(line);

        // Only the first release writes to unexport
        assert_eq!(
            fs::read_to_string(sysfs.path().join("unexport")).unwrap(),
            "3"
        );
    }

    #[test]
    fn test_read_after_release_is_transient_error() {
        let sysfs = fake_sysfs(3, "1\n");
        let mut line = SysfsLine::open(&config_for(sysfs.path(), 3, "high")).unwrap();
        line.release();
        assert!(line.read().unwrap_err().is_transient());
    }

    #[test]
    fn test_drop_releases_claim() {
        let sysfs = fake_sysfs(3, "1\n");
        {
            let _line = SysfsLine::open(&config_for(sysfs.path(), 3, "high")).unwrap();
        }
        assert_eq!(
            fs::read_to_string(sysfs.path().join("unexport")).unwrap(),
            "3"
        );
    }

    #[test]
    fn test_missing_sysfs_is_claim_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SysfsLine::open(&config_for(dir.path(), 3, "high")).unwrap_err();
        assert!(matches!(err, GpioError::Claim { pin: 3, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_resolve_line_uses_pinctrl_base() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_line(dir.path(), 3, None), 3);

        add_chip(dir.path(), "gpiochip0", "raspberrypi-exp-gpio", 0);
        add_chip(dir.path(), "gpiochip512", "pinctrl-bcm2711", 512);
        assert_eq!(resolve_line(dir.path(), 3, None), 515);

        add_chip(dir.path(), "gpiochip571", "pinctrl-rp1", 571);
        assert_eq!(resolve_line(dir.path(), 3, None), 574);

        assert_eq!(resolve_line(dir.path(), 3, Some(0)), 3);
    }
}
