// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Peripheral drivers for the Nuvoton M480 (Cortex-M4) family.

#![cfg_attr(not(test), no_std)]

pub mod spim;
pub mod usbd;

/// Byte range of the external SPI NOR flash used as the USB/FAT disk. The
/// first 2 MiB are left to firmware images.
pub const FLASH_STORAGE_START: usize = 0x20_0000;
pub const FLASH_STORAGE_END: usize = 0x80_0000;
