// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Error type shared by the HILs, the capsules and the chip drivers.

/// Reasons an operation can fail.
///
/// Discriminants are never zero, so an error converted with
/// `usize::from` doubles as a failure status for foreign callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// The device or bus reported a failure, or a transfer timed out.
    FAIL = 1,
    /// The device stayed busy past its polling budget.
    BUSY = 2,
    /// Argument out of range, for example a sector past the end of the disk.
    INVAL = 6,
    /// A buffer or packet has the wrong length.
    SIZE = 7,
    /// Unknown request, ioctl or command.
    NOSUPPORT = 10,
    /// No device answered.
    NODEVICE = 11,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}
