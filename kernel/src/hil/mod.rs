// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Public traits for interfaces between capsules and chip implementations.

pub mod block_storage;
pub mod flash_bus;
pub mod usb;
