// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Data structure for storing compile-time configuration options.
//!
//! Configuration is a typed `const` object rather than `#[cfg]` blocks so that
//! disabled code paths are still type-checked; the compiler folds the
//! constants and removes the dead branches.

/// Data structure holding compile-time configuration options.
///
/// To change the configuration, enable the matching feature of the `kernel`
/// crate from the board crate.
pub struct Config {
    /// Whether the mass storage transport should log each command block
    /// wrapper it accepts and each status wrapper it sends.
    pub trace_msc: bool,

    /// Whether the flash block store should log cache loads, evictions and
    /// write-backs.
    pub debug_block_cache: bool,
}

/// A unique instance of `Config` where compile-time configuration options are
/// defined.
pub const CONFIG: Config = Config {
    trace_msc: cfg!(feature = "trace_msc"),
    debug_block_cache: cfg!(feature = "debug_block_cache"),
};
