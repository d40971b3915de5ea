// gpio-shutdown - Long-press GPIO shutdown button monitor
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod defaults;
pub mod gpio;
pub mod halt;
pub mod helpers;
pub mod hold;
pub mod logger;
pub mod monitor;
pub mod signals;
pub mod systemd;
