// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Sector-addressed block device on top of SPI NOR flash.
//!
//! The flash can only be erased in 4 KiB blocks, while hosts and filesystems
//! address 512 byte sectors. This capsule keeps one erase block in a RAM
//! cache. Sector reads and writes are served from the cache; switching to a
//! different block first writes the cached block back if it was modified
//! (erase, then program it page by page), then loads the new block.
//!
//! Writes are not durable until the block is evicted or [`flush`] is called.
//!
//! ```text
//!   sector:  0 1 2 3 4 5 6 7 | 8 9 ...
//!   block:   0               | 1
//!   address: base            | base + 4096
//! ```
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! let store = SpiNorBlockStore::new(
//!     spim,
//!     static_init!(BlockBuffer, BlockBuffer::new()),
//!     m480::FLASH_STORAGE_START..m480::FLASH_STORAGE_END,
//! )?;
//! store.init()?;
//! ```
//!
//! [`flush`]: SpiNorBlockStore::flush

use core::cell::Cell;
use core::ops::Range;

use kernel::config::CONFIG;
use kernel::debug;
use kernel::hil::block_storage::BlockDevice;
use kernel::hil::flash_bus::{FlashBus, ERASE_BLOCK_SIZE};
use kernel::utilities::cells::{OptionalCell, TakeCell};
use kernel::ErrorCode;

/// Size of the sectors presented to the host.
pub const SECTOR_SIZE: usize = 512;
/// Size of the cached erase block.
pub const BLOCK_SIZE: usize = ERASE_BLOCK_SIZE;
pub const SECTORS_PER_BLOCK: usize = BLOCK_SIZE / SECTOR_SIZE;

/// RAM copy of one erase block.
///
/// Word aligned, so the flash controller can move it by DMA.
#[repr(C, align(4))]
pub struct BlockBuffer(pub [u8; BLOCK_SIZE]);

impl BlockBuffer {
    pub const fn new() -> BlockBuffer {
        BlockBuffer([0; BLOCK_SIZE])
    }
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C, align(4))]
struct SectorBuffer([u8; SECTOR_SIZE]);

pub struct SpiNorBlockStore<'a, F: FlashBus> {
    flash: &'a F,
    cache: TakeCell<'a, BlockBuffer>,
    /// Index of the block held in `cache`, relative to `base`.
    cached_block: OptionalCell<usize>,
    /// The cache holds data that is not on the flash yet. Only ever set while
    /// `cached_block` is `Some`.
    dirty: Cell<bool>,
    base: usize,
    sector_count: usize,
}

impl<'a, F: FlashBus> SpiNorBlockStore<'a, F> {
    /// Create a store over the flash byte range `region`.
    ///
    /// Both ends of `region` must be aligned to [`BLOCK_SIZE`].
    pub fn new(
        flash: &'a F,
        cache: &'a mut BlockBuffer,
        region: Range<usize>,
    ) -> Result<SpiNorBlockStore<'a, F>, ErrorCode> {
        if region.start % BLOCK_SIZE != 0
            || region.end % BLOCK_SIZE != 0
            || region.end <= region.start
        {
            return Err(ErrorCode::INVAL);
        }
        Ok(SpiNorBlockStore {
            flash,
            cache: TakeCell::new(cache),
            cached_block: OptionalCell::empty(),
            dirty: Cell::new(false),
            base: region.start,
            sector_count: (region.end - region.start) / SECTOR_SIZE,
        })
    }

    /// Initialize the flash controller and reset the cache.
    ///
    /// Any unflushed data in the cache is discarded.
    pub fn init(&self) -> Result<(), ErrorCode> {
        self.flash.init()?;
        self.cache
            .map(|cache| cache.0.fill(0))
            .ok_or(ErrorCode::BUSY)?;
        self.cached_block.clear();
        self.dirty.set(false);
        Ok(())
    }

    pub fn sector_count(&self) -> usize {
        self.sector_count
    }

    /// Copy `count` sectors starting at `start` into `buf`.
    pub fn read(&self, start: usize, count: usize, buf: &mut [u8]) -> Result<(), ErrorCode> {
        let len = self.check_range(start, count, buf.len())?;
        self.cache.map_or(Err(ErrorCode::BUSY), |cache| {
            for (i, sector) in buf[..len].chunks_exact_mut(SECTOR_SIZE).enumerate() {
                let offset = self.select_sector(cache, start + i)?;
                sector.copy_from_slice(&cache.0[offset..offset + SECTOR_SIZE]);
            }
            Ok(())
        })
    }

    /// Copy `count` sectors from `buf` into the cache, starting at `start`.
    pub fn write(&self, start: usize, count: usize, buf: &[u8]) -> Result<(), ErrorCode> {
        let len = self.check_range(start, count, buf.len())?;
        self.cache.map_or(Err(ErrorCode::BUSY), |cache| {
            for (i, sector) in buf[..len].chunks_exact(SECTOR_SIZE).enumerate() {
                let offset = self.select_sector(cache, start + i)?;
                cache.0[offset..offset + SECTOR_SIZE].copy_from_slice(sector);
                self.dirty.set(true);
            }
            Ok(())
        })
    }

    /// Write the cached block back to the flash if it was modified.
    ///
    /// Calling this with a clean cache does not touch the flash.
    pub fn flush(&self) -> Result<(), ErrorCode> {
        self.cache
            .map_or(Err(ErrorCode::BUSY), |cache| self.write_back(cache))
    }

    /// Destructive check of the first block of the region.
    ///
    /// Erases the block, checks that the first sector reads back erased,
    /// programs a counting pattern and verifies it. Returns `true` on
    /// success.
    pub fn self_test(&self) -> bool {
        if self.cached_block.map_or(false, |block| *block == 0) {
            self.cached_block.clear();
            self.dirty.set(false);
        }
        match self.run_self_test() {
            Ok(()) => true,
            Err(e) => {
                debug!("spi nor self test failed: {:?}", e);
                false
            }
        }
    }

    fn run_self_test(&self) -> Result<(), ErrorCode> {
        let mut sector = SectorBuffer([0; SECTOR_SIZE]);
        let buf = &mut sector.0;

        self.flash.erase_block(self.base)?;
        self.flash.wait_ready()?;
        self.flash.read(self.base, buf)?;
        if buf.iter().any(|&b| b != 0xFF) {
            return Err(ErrorCode::FAIL);
        }

        for (i, b) in buf.iter_mut().enumerate() {
            *b = i as u8;
        }
        self.program(self.base, buf)?;

        buf.fill(0);
        self.flash.read(self.base, buf)?;
        if buf.iter().enumerate().any(|(i, &b)| b != i as u8) {
            return Err(ErrorCode::FAIL);
        }
        Ok(())
    }

    /// Validate a sector range and return its length in bytes.
    fn check_range(&self, start: usize, count: usize, buf_len: usize) -> Result<usize, ErrorCode> {
        if count == 0 || start.checked_add(count).map_or(true, |end| end > self.sector_count) {
            return Err(ErrorCode::INVAL);
        }
        let len = count * SECTOR_SIZE;
        if buf_len < len {
            return Err(ErrorCode::SIZE);
        }
        Ok(len)
    }

    /// Make sure the block holding `sector` is cached and return the sector's
    /// byte offset in the cache.
    fn select_sector(&self, cache: &mut BlockBuffer, sector: usize) -> Result<usize, ErrorCode> {
        let block = sector / SECTORS_PER_BLOCK;
        if !self.cached_block.map_or(false, |cached| *cached == block) {
            // On failure the previous block stays cached and dirty.
            self.write_back(cache)?;

            if CONFIG.debug_block_cache {
                debug!("block cache: load block {}", block);
            }
            if let Err(e) = self.flash.read(self.block_address(block), &mut cache.0) {
                self.cached_block.clear();
                return Err(e);
            }
            self.cached_block.set(block);
        }
        Ok((sector % SECTORS_PER_BLOCK) * SECTOR_SIZE)
    }

    fn write_back(&self, cache: &BlockBuffer) -> Result<(), ErrorCode> {
        let block = match self.cached_block.map(|block| *block) {
            Some(block) if self.dirty.get() => block,
            _ => return Ok(()),
        };
        let address = self.block_address(block);

        if CONFIG.debug_block_cache {
            debug!("block cache: write back block {} at {:#x}", block, address);
        }
        self.flash.erase_block(address)?;
        self.flash.wait_ready()?;
        self.program(address, &cache.0)?;
        self.dirty.set(false);
        Ok(())
    }

    fn program(&self, address: usize, data: &[u8]) -> Result<(), ErrorCode> {
        for (i, page) in data.chunks(F::PAGE_SIZE).enumerate() {
            self.flash.program_page(address + i * F::PAGE_SIZE, page)?;
            self.flash.wait_ready()?;
        }
        Ok(())
    }

    fn block_address(&self, block: usize) -> usize {
        self.base + block * BLOCK_SIZE
    }
}

impl<F: FlashBus> BlockDevice for SpiNorBlockStore<'_, F> {
    fn init(&self) -> Result<(), ErrorCode> {
        SpiNorBlockStore::init(self)
    }

    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read_sectors(&self, start: usize, count: usize, buf: &mut [u8]) -> Result<(), ErrorCode> {
        self.read(start, count, buf)
    }

    fn write_sectors(&self, start: usize, count: usize, buf: &[u8]) -> Result<(), ErrorCode> {
        self.write(start, count, buf)
    }

    fn flush(&self) -> Result<(), ErrorCode> {
        SpiNorBlockStore::flush(self)
    }
}
