// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Support for debug output from capsules and chip drivers.
//!
//! The macros forward to the [`log`] facade. A board installs whatever logger
//! suits its console (UART, RTT, semihosting); with no logger installed the
//! output is discarded.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! debug!("Yes the code gets here with value {}", i);
//! debug_warn!("unexpected packet on endpoint {}", ep);
//! ```

/// In-kernel debug output at `Debug` level.
#[macro_export]
macro_rules! debug {
    () => ({
        $crate::debug!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::log::debug!("{}", $msg)
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::log::debug!($fmt, $($arg)+)
    });
}

/// Output for conditions that are recoverable but indicate a misbehaving
/// peer or device.
#[macro_export]
macro_rules! debug_warn {
    ($msg:expr $(,)?) => ({
        $crate::log::warn!("{}", $msg)
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::log::warn!($fmt, $($arg)+)
    });
}
