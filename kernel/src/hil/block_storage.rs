// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface for sector-addressed block devices.
//!
//! A block device exposes its storage as an array of equally sized sectors.
//! It is the surface shared by the USB mass storage transport and the
//! filesystem layer, which also reaches the device through
//! [`BlockDevice::ioctl`].

use crate::ErrorCode;

/// Control operations of the filesystem block-device protocol.
///
/// The discriminants are the operation numbers used by the filesystem layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockIoctl {
    Init = 1,
    Deinit = 2,
    Sync = 3,
    BlockCount = 4,
    BlockSize = 5,
}

impl BlockIoctl {
    /// Decode a raw operation number.
    ///
    /// Unknown operations, including block erase (6), are not supported.
    pub fn from_raw(op: u32) -> Result<BlockIoctl, ErrorCode> {
        match op {
            1 => Ok(BlockIoctl::Init),
            2 => Ok(BlockIoctl::Deinit),
            3 => Ok(BlockIoctl::Sync),
            4 => Ok(BlockIoctl::BlockCount),
            5 => Ok(BlockIoctl::BlockSize),
            _ => Err(ErrorCode::NOSUPPORT),
        }
    }
}

pub trait BlockDevice {
    /// Prepare the device for use. May be called again to reset it.
    fn init(&self) -> Result<(), ErrorCode>;

    /// Size of one sector in bytes.
    fn sector_size(&self) -> usize;

    /// Number of sectors on the device.
    fn sector_count(&self) -> usize;

    /// Read `count` sectors starting at `start` into `buf`.
    ///
    /// `buf` must hold at least `count * sector_size()` bytes. Fails with
    /// `INVAL` if `count` is zero or the range runs past the device.
    fn read_sectors(&self, start: usize, count: usize, buf: &mut [u8]) -> Result<(), ErrorCode>;

    /// Write `count` sectors starting at `start` from `buf`.
    ///
    /// The data may stay buffered until [`BlockDevice::flush`] is called.
    fn write_sectors(&self, start: usize, count: usize, buf: &[u8]) -> Result<(), ErrorCode>;

    /// Make all previously written sectors durable.
    fn flush(&self) -> Result<(), ErrorCode>;

    /// Perform a control operation. Returns the operation's value, `0` for
    /// operations that only report success.
    fn ioctl(&self, op: BlockIoctl) -> Result<usize, ErrorCode> {
        match op {
            BlockIoctl::Init => self.init().map(|()| 0),
            BlockIoctl::Deinit | BlockIoctl::Sync => self.flush().map(|()| 0),
            BlockIoctl::BlockCount => Ok(self.sector_count()),
            BlockIoctl::BlockSize => Ok(self.sector_size()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_operation_numbers() {
        assert_eq!(BlockIoctl::from_raw(1), Ok(BlockIoctl::Init));
        assert_eq!(BlockIoctl::from_raw(3), Ok(BlockIoctl::Sync));
        assert_eq!(BlockIoctl::from_raw(5), Ok(BlockIoctl::BlockSize));
        assert_eq!(BlockIoctl::from_raw(6), Err(ErrorCode::NOSUPPORT));
        assert_eq!(BlockIoctl::from_raw(0), Err(ErrorCode::NOSUPPORT));
    }
}
