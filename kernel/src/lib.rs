// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Core types shared by the storage capsules and the chip drivers.
//!
//! This crate holds the Hardware Interface Layer (HIL) traits that separate
//! hardware-independent capsules from chip-specific register code, the
//! common [`ErrorCode`] type, compile-time configuration and the debug
//! output macros.

#![cfg_attr(not(test), no_std)]

pub mod config;
#[macro_use]
pub mod debug;
pub mod errorcode;
pub mod hil;
pub mod utilities;

pub use crate::errorcode::ErrorCode;

// Used by the `debug!` macros.
#[doc(hidden)]
pub use log;
