// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Storage capsules: a write-back block cache over SPI NOR flash and a USB
//! mass storage class driver that exports it to a host.

#![cfg_attr(not(test), no_std)]

pub mod spi_nor_block_store;
pub mod usb;

#[cfg(test)]
mod test;
