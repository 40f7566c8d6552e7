// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! SPI flash memory controller (SPIM) driving a Winbond W25Q-class quad SPI
//! NOR flash.
//!
//! Register commands (JEDEC ID, status, write enable, erase) go through the
//! controller's normal I/O mode one byte at a time. Bulk data uses the DMA
//! modes: fast quad I/O read (0xEB) and quad page program (0x32). DMA needs a
//! word-aligned buffer; unaligned buffers fall back to single-bit I/O.
//!
//! All operations block until the controller is idle.

use kernel::hil::flash_bus::FlashBus;
use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{
    register_bitfields, register_structs, FieldValue, ReadOnly, ReadWrite, WriteOnly,
};
use kernel::utilities::StaticRef;
use kernel::{debug, ErrorCode};

register_structs! {
    pub SpimRegisters {
        (0x00 => ctl0: ReadWrite<u32, CTL0::Register>),
        (0x04 => ctl1: ReadWrite<u32, CTL1::Register>),
        (0x08 => _reserved0),
        (0x0C => rxclkdly: ReadWrite<u32, RXCLKDLY::Register>),
        (0x10 => rx: [ReadOnly<u32>; 4]),
        (0x20 => tx: [ReadWrite<u32>; 4]),
        (0x30 => sramaddr: ReadWrite<u32>),
        (0x34 => dmacnt: ReadWrite<u32, DMACNT::Register>),
        (0x38 => faddr: ReadWrite<u32>),
        (0x3C => key1: WriteOnly<u32>),
        (0x40 => key2: WriteOnly<u32>),
        (0x44 => dmmctl: ReadWrite<u32, DMMCTL::Register>),
        (0x48 => ctl2: ReadWrite<u32, CTL2::Register>),
        (0x4C => @END),
    }
}

register_bitfields![u32,
    CTL0 [
        /// Disable the on-the-fly cipher.
        CIPHOFF OFFSET(0) NUMBITS(1) [],
        BALEN OFFSET(2) NUMBITS(1) [],
        /// Use 4-byte flash addresses.
        B4ADDREN OFFSET(5) NUMBITS(1) [],
        IEN OFFSET(6) NUMBITS(1) [],
        IF OFFSET(7) NUMBITS(1) [],
        /// Bits per transfer minus one (normal I/O mode).
        DWIDTH OFFSET(8) NUMBITS(5) [],
        /// Transfers per GO minus one (normal I/O mode).
        BURSTNUM OFFSET(13) NUMBITS(2) [],
        QDIODIR OFFSET(15) NUMBITS(1) [],
        SUSPITV OFFSET(16) NUMBITS(4) [],
        BITMODE OFFSET(20) NUMBITS(2) [
            Standard = 0,
            Dual = 1,
            Quad = 2
        ],
        OPMODE OFFSET(22) NUMBITS(2) [
            NormalIo = 0,
            DmaWrite = 1,
            DmaRead = 2,
            DirectMap = 3
        ],
        /// Flash command issued by the DMA and direct-map modes.
        CMDCODE OFFSET(24) NUMBITS(8) []
    ],
    CTL1 [
        /// Start a transfer; cleared by hardware when done.
        SPIMEN OFFSET(0) NUMBITS(1) [],
        CACHEOFF OFFSET(1) NUMBITS(1) [],
        CCMEN OFFSET(2) NUMBITS(1) [],
        CDINVAL OFFSET(3) NUMBITS(1) [],
        SS OFFSET(4) NUMBITS(1) [
            Active = 0,
            Inactive = 1
        ],
        SSACTPOL OFFSET(5) NUMBITS(1) [],
        IDLETIME OFFSET(8) NUMBITS(4) [],
        /// SPI clock = HCLK / (2 * DIVIDER).
        DIVIDER OFFSET(16) NUMBITS(16) []
    ],
    RXCLKDLY [
        DWDELSEL OFFSET(0) NUMBITS(8) [],
        RDDLYSEL OFFSET(16) NUMBITS(3) [],
        RDEDGE OFFSET(20) NUMBITS(1) []
    ],
    DMACNT [
        DMACNT OFFSET(0) NUMBITS(24) []
    ],
    DMMCTL [
        CRMDAT OFFSET(8) NUMBITS(8) [],
        DESELTIM OFFSET(16) NUMBITS(5) [],
        BWEN OFFSET(24) NUMBITS(1) [],
        CREN OFFSET(25) NUMBITS(1) [],
        UACTSCLK OFFSET(26) NUMBITS(1) [],
        ACTSCLKT OFFSET(28) NUMBITS(4) []
    ],
    CTL2 [
        /// Take the dummy cycle count from DCNUM.
        USETEN OFFSET(16) NUMBITS(1) [],
        DTRMPOFF OFFSET(20) NUMBITS(1) [],
        DCNUM OFFSET(24) NUMBITS(5) []
    ]
];

pub const SPIM_BASE: StaticRef<SpimRegisters> =
    unsafe { StaticRef::new(0x4000_7000 as *const SpimRegisters) };

/// 192 MHz / (2 * 2) = 48 MHz.
const CLOCK_DIVIDER: u32 = 2;
/// Dummy cycles of the 0xEB fast read on W25Q parts.
const DUMMY_CYCLES: u32 = 4;

/// Spins waiting for one controller transfer.
const TRANSFER_SPINS: usize = 100_000;
/// Status polls before giving up on a busy flash. A 4 KiB erase can take
/// several hundred milliseconds.
const READY_POLLS: usize = 2_000_000;

const CMD_WRITE_STATUS: u8 = 0x01;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_READ_DATA: u8 = 0x03;
const CMD_READ_STATUS1: u8 = 0x05;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_SECTOR_ERASE_4K: u8 = 0x20;
const CMD_QUAD_PAGE_PROGRAM: u8 = 0x32;
const CMD_READ_STATUS2: u8 = 0x35;
const CMD_ENABLE_RESET: u8 = 0x66;
const CMD_RESET: u8 = 0x99;
const CMD_READ_JEDEC_ID: u8 = 0x9F;
const CMD_FAST_READ_QUAD_IO: u8 = 0xEB;

const STATUS1_BUSY: u8 = 1 << 0;
const STATUS2_QE: u8 = 1 << 1;
/// Complement protect; with QE it would write-protect part of the array.
const STATUS2_CMP: u8 = 1 << 6;

/// 24-bit flash address, most significant byte first.
fn address_bytes(address: usize) -> [u8; 3] {
    [(address >> 16) as u8, (address >> 8) as u8, address as u8]
}

/// A floating or grounded bus reads back as all ones or all zeros.
fn check_jedec_id(id: [u8; 3]) -> Result<(), ErrorCode> {
    match id[0] {
        0x00 | 0xFF => Err(ErrorCode::NODEVICE),
        _ => Ok(()),
    }
}

/// Status register values enabling the quad I/O pins.
fn quad_enable_status(status1: u8, status2: u8) -> [u8; 2] {
    [status1, (status2 | STATUS2_QE) & !STATUS2_CMP]
}

fn dma_capable(buf: &[u8]) -> bool {
    !buf.is_empty() && buf.as_ptr() as usize % 4 == 0
}

pub struct Spim {
    registers: StaticRef<SpimRegisters>,
}

impl Spim {
    pub const fn new(base: StaticRef<SpimRegisters>) -> Spim {
        Spim { registers: base }
    }

    fn configure(&self) {
        let regs = &*self.registers;
        regs.ctl0.modify(CTL0::CIPHOFF::SET + CTL0::B4ADDREN::CLEAR);
        regs.key1.set(0);
        regs.key2.set(0);
        // Continuous read mode would leave the flash ignoring opcodes.
        regs.dmmctl.modify(DMMCTL::CREN::CLEAR);
        regs.ctl1.modify(
            CTL1::DIVIDER.val(CLOCK_DIVIDER)
                + CTL1::SS::Inactive
                + CTL1::SSACTPOL::CLEAR
                + CTL1::CACHEOFF::SET,
        );
        // No sampling delay, sample on the rising edge.
        regs.rxclkdly
            .modify(RXCLKDLY::RDDLYSEL.val(0) + RXCLKDLY::RDEDGE::SET);
        regs.ctl2
            .modify(CTL2::USETEN::SET + CTL2::DCNUM.val(DUMMY_CYCLES));
    }

    /// Start the programmed transfer and wait for the controller.
    fn go(&self) -> Result<(), ErrorCode> {
        let regs = &*self.registers;
        regs.ctl1.modify(CTL1::SPIMEN::SET);
        for _ in 0..TRANSFER_SPINS {
            if !regs.ctl1.is_set(CTL1::SPIMEN) {
                return Ok(());
            }
        }
        Err(ErrorCode::FAIL)
    }

    fn io_byte(&self, byte: u8) -> Result<u8, ErrorCode> {
        let regs = &*self.registers;
        regs.ctl0.modify(
            CTL0::OPMODE::NormalIo
                + CTL0::BITMODE::Standard
                + CTL0::DWIDTH.val(7)
                + CTL0::BURSTNUM.val(0),
        );
        regs.tx[0].set(byte as u32);
        self.go()?;
        Ok(regs.rx[0].get() as u8)
    }

    /// One chip-select frame: send `command`, then clock in `response`.
    fn transaction(&self, command: &[u8], response: &mut [u8]) -> Result<(), ErrorCode> {
        self.registers.ctl1.modify(CTL1::SS::Active);
        let result = command
            .iter()
            .try_for_each(|byte| self.io_byte(*byte).map(|_| ()))
            .and_then(|()| {
                response.iter_mut().try_for_each(|byte| {
                    *byte = self.io_byte(0xFF)?;
                    Ok(())
                })
            });
        self.registers.ctl1.modify(CTL1::SS::Inactive);
        result
    }

    fn command(&self, opcode: u8) -> Result<(), ErrorCode> {
        self.transaction(&[opcode], &mut [])
    }

    fn command_with_address(&self, opcode: u8, address: usize) -> Result<(), ErrorCode> {
        let [a2, a1, a0] = address_bytes(address);
        self.transaction(&[opcode, a2, a1, a0], &mut [])
    }

    fn read_register(&self, opcode: u8) -> Result<u8, ErrorCode> {
        let mut value = [0];
        self.transaction(&[opcode], &mut value)?;
        Ok(value[0])
    }

    fn read_jedec_id(&self) -> Result<[u8; 3], ErrorCode> {
        let mut id = [0; 3];
        self.transaction(&[CMD_READ_JEDEC_ID], &mut id)?;
        Ok(id)
    }

    fn write_enable(&self) -> Result<(), ErrorCode> {
        self.command(CMD_WRITE_ENABLE)
    }

    fn enable_quad(&self) -> Result<(), ErrorCode> {
        let status1 = self.read_register(CMD_READ_STATUS1)?;
        let status2 = self.read_register(CMD_READ_STATUS2)?;
        let [status1, status2] = quad_enable_status(status1, status2);
        self.write_enable()?;
        self.transaction(&[CMD_WRITE_STATUS, status1, status2], &mut [])?;
        self.wait_ready()
    }

    /// Run a DMA transfer between flash `address` and system memory.
    fn dma(
        &self,
        mode: FieldValue<u32, CTL0::Register>,
        opcode: u8,
        address: usize,
        memory: usize,
        len: usize,
    ) -> Result<(), ErrorCode> {
        let regs = &*self.registers;
        regs.ctl0
            .modify(mode + CTL0::CMDCODE.val(opcode as u32) + CTL0::B4ADDREN::CLEAR);
        regs.sramaddr.set(memory as u32);
        regs.dmacnt.write(DMACNT::DMACNT.val(len as u32));
        regs.faddr.set(address as u32);
        self.go()
    }
}

impl FlashBus for Spim {
    const PAGE_SIZE: usize = 256;

    fn init(&self) -> Result<(), ErrorCode> {
        self.configure();
        self.command(CMD_ENABLE_RESET)?;
        self.command(CMD_RESET)?;
        let id = self.read_jedec_id()?;
        check_jedec_id(id)?;
        debug!(
            "spim: flash {:02x} {:02x} {:02x}",
            id[0], id[1], id[2]
        );
        self.wait_ready()?;
        self.enable_quad()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), ErrorCode> {
        if buf.is_empty() {
            return Ok(());
        }
        if dma_capable(buf) {
            let memory = buf.as_mut_ptr() as usize;
            self.dma(
                CTL0::OPMODE::DmaRead,
                CMD_FAST_READ_QUAD_IO,
                address,
                memory,
                buf.len(),
            )
        } else {
            let [a2, a1, a0] = address_bytes(address);
            self.transaction(&[CMD_READ_DATA, a2, a1, a0], buf)
        }
    }

    fn program_page(&self, address: usize, data: &[u8]) -> Result<(), ErrorCode> {
        if data.is_empty() {
            return Ok(());
        }
        if address / Self::PAGE_SIZE != (address + data.len() - 1) / Self::PAGE_SIZE {
            return Err(ErrorCode::SIZE);
        }
        self.write_enable()?;
        if dma_capable(data) {
            self.dma(
                CTL0::OPMODE::DmaWrite,
                CMD_QUAD_PAGE_PROGRAM,
                address,
                data.as_ptr() as usize,
                data.len(),
            )
        } else {
            let regs = &*self.registers;
            regs.ctl1.modify(CTL1::SS::Active);
            let [a2, a1, a0] = address_bytes(address);
            let result = [CMD_PAGE_PROGRAM, a2, a1, a0]
                .iter()
                .chain(data)
                .try_for_each(|byte| self.io_byte(*byte).map(|_| ()));
            regs.ctl1.modify(CTL1::SS::Inactive);
            result
        }
    }

    fn erase_block(&self, address: usize) -> Result<(), ErrorCode> {
        self.write_enable()?;
        self.command_with_address(CMD_SECTOR_ERASE_4K, address)
    }

    fn wait_ready(&self) -> Result<(), ErrorCode> {
        for _ in 0..READY_POLLS {
            if self.read_register(CMD_READ_STATUS1)? & STATUS1_BUSY == 0 {
                return Ok(());
            }
        }
        Err(ErrorCode::BUSY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_block_size() {
        assert_eq!(SPIM_BASE.address(), 0x4000_7000);
        assert_eq!(core::mem::size_of::<SpimRegisters>(), 0x4C);
    }

    #[test]
    fn address_is_big_endian_24_bit() {
        assert_eq!(address_bytes(0x20_1234), [0x20, 0x12, 0x34]);
        assert_eq!(address_bytes(0x7F_F000), [0x7F, 0xF0, 0x00]);
    }

    #[test]
    fn jedec_id_must_come_from_a_device() {
        assert_eq!(check_jedec_id([0xEF, 0x40, 0x17]), Ok(()));
        assert_eq!(check_jedec_id([0xFF, 0xFF, 0xFF]), Err(ErrorCode::NODEVICE));
        assert_eq!(check_jedec_id([0x00, 0x00, 0x00]), Err(ErrorCode::NODEVICE));
    }

    #[test]
    fn quad_enable_clears_complement_protect() {
        assert_eq!(quad_enable_status(0x00, 0x00), [0x00, 0x02]);
        assert_eq!(quad_enable_status(0x1C, 0x40), [0x1C, 0x02]);
        assert_eq!(quad_enable_status(0x00, 0x43), [0x00, 0x03]);
    }

    #[test]
    fn dma_needs_word_alignment() {
        #[repr(align(4))]
        struct Aligned([u8; 8]);
        let buf = Aligned([0; 8]);
        assert!(dma_capable(&buf.0));
        assert!(!dma_capable(&buf.0[1..]));
        assert!(!dma_capable(&buf.0[..0]));
    }
}
