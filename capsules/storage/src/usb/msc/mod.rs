// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! USB Mass Storage Class, Bulk-Only Transport with the SCSI transparent
//! command set.
//!
//! - [`bot`]: command and status wrappers exchanged on the bulk pipes.
//! - [`scsi`]: command opcodes, sense data and fixed response payloads.
//! - [`transport`]: the per-command state machine driven by controller
//!   events.

pub mod bot;
pub mod scsi;
pub mod transport;

pub use self::transport::{MassStorage, MscConfig, TransportState};

#[cfg(test)]
mod tests;
