// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Typed handle on a peripheral register block at a fixed address.

use core::ops::Deref;
use core::ptr::NonNull;

/// Reference to a memory mapped register block.
///
/// Chip crates declare one `const` per peripheral instance and hand copies to
/// their drivers; dereferencing yields the `register_structs!` type.
#[derive(Debug)]
pub struct StaticRef<T> {
    ptr: NonNull<T>,
}

impl<T> StaticRef<T> {
    /// ## Safety
    ///
    /// `ptr` must be non-null, aligned for `T` and point at memory (usually
    /// MMIO) that stays valid as a `T` for the life of the program.
    pub const unsafe fn new(ptr: *const T) -> StaticRef<T> {
        // SAFETY: non-null per the caller.
        StaticRef {
            ptr: NonNull::new_unchecked(ptr.cast_mut()),
        }
    }

    /// Base address of the register block.
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl<T> Clone for StaticRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StaticRef<T> {}

impl<T> Deref for StaticRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: valid for the program duration per `StaticRef::new`.
        unsafe { self.ptr.as_ref() }
    }
}
