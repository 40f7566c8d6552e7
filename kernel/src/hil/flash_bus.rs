// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface for a serial NOR flash behind a bus controller.
//!
//! Unlike the split-phase flash interfaces used for on-chip flash, every
//! operation here blocks until the controller has finished its transfer. The
//! flash itself may still be busy after an erase or program completes on the
//! bus; callers use [`FlashBus::wait_ready`] to poll for that.
//!
//! NOR semantics apply: an erase sets every byte of a block to `0xFF` and a
//! program can only clear bits, so a block must be erased before it is
//! rewritten.

use crate::ErrorCode;

/// Size of an erase block in bytes.
pub const ERASE_BLOCK_SIZE: usize = 4096;

pub trait FlashBus {
    /// Largest amount of data a single `program_page` may write. Programs
    /// must not cross a page boundary.
    const PAGE_SIZE: usize;

    /// Bring up the controller and identify the attached device.
    ///
    /// Returns `NODEVICE` if no device answers the identification command.
    fn init(&self) -> Result<(), ErrorCode>;

    /// Read `buf.len()` bytes starting at `address`.
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), ErrorCode>;

    /// Program `data` at `address`. `data` must fit in one page.
    fn program_page(&self, address: usize, data: &[u8]) -> Result<(), ErrorCode>;

    /// Erase the [`ERASE_BLOCK_SIZE`] block starting at `address`.
    fn erase_block(&self, address: usize) -> Result<(), ErrorCode>;

    /// Spin until the device reports it is no longer busy.
    ///
    /// Returns `BUSY` if the device never becomes ready.
    fn wait_ready(&self) -> Result<(), ErrorCode>;
}
