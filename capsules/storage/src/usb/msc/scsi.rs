// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! SCSI (UFI subset) commands understood by the transport and the fixed
//! payloads it returns.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    TestUnitReady = 0x00,
    RequestSense = 0x03,
    Inquiry = 0x12,
    ModeSelect6 = 0x15,
    ModeSense6 = 0x1A,
    StartStopUnit = 0x1B,
    PreventAllowMediumRemoval = 0x1E,
    ReadFormatCapacities = 0x23,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2A,
    Verify10 = 0x2F,
    ModeSelect10 = 0x55,
    ModeSense10 = 0x5A,
    Read12 = 0xA8,
    Write12 = 0xAA,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        match byte {
            0x00 => Some(Opcode::TestUnitReady),
            0x03 => Some(Opcode::RequestSense),
            0x12 => Some(Opcode::Inquiry),
            0x15 => Some(Opcode::ModeSelect6),
            0x1A => Some(Opcode::ModeSense6),
            0x1B => Some(Opcode::StartStopUnit),
            0x1E => Some(Opcode::PreventAllowMediumRemoval),
            0x23 => Some(Opcode::ReadFormatCapacities),
            0x25 => Some(Opcode::ReadCapacity10),
            0x28 => Some(Opcode::Read10),
            0x2A => Some(Opcode::Write10),
            0x2F => Some(Opcode::Verify10),
            0x55 => Some(Opcode::ModeSelect10),
            0x5A => Some(Opcode::ModeSense10),
            0xA8 => Some(Opcode::Read12),
            0xAA => Some(Opcode::Write12),
            _ => None,
        }
    }
}

/// Sense key with additional sense code and qualifier, reported by REQUEST
/// SENSE for the most recent failed command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenseData {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub const NO_SENSE: SenseData = SenseData::new(0x00, 0x00, 0x00);
    pub const MEDIUM_NOT_PRESENT: SenseData = SenseData::new(0x02, 0x3A, 0x00);
    pub const WRITE_FAULT: SenseData = SenseData::new(0x03, 0x03, 0x00);
    pub const UNRECOVERED_READ_ERROR: SenseData = SenseData::new(0x03, 0x11, 0x00);
    pub const INVALID_COMMAND: SenseData = SenseData::new(0x05, 0x20, 0x00);
    pub const LBA_OUT_OF_RANGE: SenseData = SenseData::new(0x05, 0x21, 0x00);

    pub const fn new(key: u8, asc: u8, ascq: u8) -> SenseData {
        SenseData { key, asc, ascq }
    }

    /// Fixed format sense data, current error.
    pub fn to_bytes(&self) -> [u8; REQUEST_SENSE_LEN] {
        let mut data = [0; REQUEST_SENSE_LEN];
        data[0] = 0x70;
        data[2] = self.key;
        data[7] = 0x0A; // additional sense length
        data[12] = self.asc;
        data[13] = self.ascq;
        data
    }
}

pub const REQUEST_SENSE_LEN: usize = 18;
pub const INQUIRY_LEN: usize = 36;

/// Standard INQUIRY data: direct access device, removable medium.
#[rustfmt::skip]
pub const INQUIRY_DATA: [u8; INQUIRY_LEN] = [
    0x00, 0x80, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00,
    b'N', b'u', b'v', b'o', b't', b'o', b'n', b' ',
    b'U', b'S', b'B', b' ', b'M', b'a', b's', b's',
    b' ', b'S', b't', b'o', b'r', b'a', b'g', b'e',
    b'1', b'.', b'0', b'0',
];

/// READ CAPACITY(10): last LBA and block length, big-endian.
pub fn read_capacity_data(sector_count: u32, sector_size: u32) -> [u8; 8] {
    let mut data = [0; 8];
    data[0..4].copy_from_slice(&sector_count.saturating_sub(1).to_be_bytes());
    data[4..8].copy_from_slice(&sector_size.to_be_bytes());
    data
}

/// READ FORMAT CAPACITIES: capacity list with the current/maximum descriptor
/// (formatted media) and one formattable descriptor.
pub fn format_capacity_data(sector_count: u32, sector_size: u32) -> [u8; 20] {
    let mut data = [0; 20];
    data[3] = 0x10; // capacity list length
    data[4..8].copy_from_slice(&sector_count.to_be_bytes());
    data[8..12].copy_from_slice(&sector_size.to_be_bytes());
    data[8] = 0x02; // formatted media
    data[12..16].copy_from_slice(&sector_count.to_be_bytes());
    data[16..20].copy_from_slice(&sector_size.to_be_bytes());
    data[16] = 0x00;
    data
}

/// MODE SENSE(6) header without block descriptors or pages.
pub fn mode_sense6_data(write_protected: bool) -> [u8; 4] {
    [0x03, 0x00, if write_protected { 0x80 } else { 0x00 }, 0x00]
}

/// MODE SENSE(10) header without block descriptors or pages.
pub fn mode_sense10_data(write_protected: bool) -> [u8; 8] {
    [0x00, 0x06, 0x00, if write_protected { 0x80 } else { 0x00 }, 0, 0, 0, 0]
}
