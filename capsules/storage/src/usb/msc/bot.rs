// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Bulk-Only Transport wrappers.
//!
//! Every command starts with a 31 byte Command Block Wrapper (CBW) on the
//! bulk OUT pipe and ends with a 13 byte Command Status Wrapper (CSW) on the
//! bulk IN pipe. All multi-byte fields are little-endian.
//!
//! ```text
//! CBW: signature(4) tag(4) data_transfer_length(4) flags(1) lun(1)
//!      cb_length(1) cb(16)
//! CSW: signature(4) tag(4) data_residue(4) status(1)
//! ```

use kernel::ErrorCode;

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CSW_SIGNATURE: u32 = 0x5342_5355;
pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

/// Direction bit of the CBW flags byte.
const FLAG_DATA_IN: u8 = 1 << 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataDirection {
    /// No data phase.
    None,
    /// Host to device, bulk OUT.
    Out,
    /// Device to host, bulk IN.
    In,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandBlockWrapper {
    pub tag: u32,
    pub data_transfer_length: u32,
    pub flags: u8,
    pub lun: u8,
    pub command_length: u8,
    /// Command block. Byte 0 is the opcode, byte 1 carries the LUN for
    /// legacy hosts and the remaining 14 bytes are command data.
    pub command: [u8; 16],
}

impl CommandBlockWrapper {
    /// Parse a CBW. The packet must be exactly [`CBW_LEN`] bytes.
    pub fn decode(packet: &[u8]) -> Result<CommandBlockWrapper, ErrorCode> {
        if packet.len() != CBW_LEN {
            return Err(ErrorCode::SIZE);
        }
        if read_u32(packet, 0) != CBW_SIGNATURE {
            return Err(ErrorCode::INVAL);
        }
        let mut command = [0; 16];
        command.copy_from_slice(&packet[15..31]);
        Ok(CommandBlockWrapper {
            tag: read_u32(packet, 4),
            data_transfer_length: read_u32(packet, 8),
            flags: packet[12],
            lun: packet[13] & 0x0f,
            command_length: packet[14] & 0x1f,
            command,
        })
    }

    /// Serialize as a host would send it.
    pub fn encode(&self) -> [u8; CBW_LEN] {
        let mut packet = [0; CBW_LEN];
        packet[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        packet[4..8].copy_from_slice(&self.tag.to_le_bytes());
        packet[8..12].copy_from_slice(&self.data_transfer_length.to_le_bytes());
        packet[12] = self.flags;
        packet[13] = self.lun;
        packet[14] = self.command_length;
        packet[15..31].copy_from_slice(&self.command);
        packet
    }

    pub fn opcode(&self) -> u8 {
        self.command[0]
    }

    /// The 14 command bytes following the opcode and LUN bytes.
    pub fn command_data(&self) -> &[u8] {
        &self.command[2..]
    }

    /// Logical block address of READ/WRITE/VERIFY commands (big-endian).
    pub fn logical_block_address(&self) -> u32 {
        u32::from_be_bytes([self.command[2], self.command[3], self.command[4], self.command[5]])
    }

    pub fn direction(&self) -> DataDirection {
        if self.data_transfer_length == 0 {
            DataDirection::None
        } else if self.flags & FLAG_DATA_IN != 0 {
            DataDirection::In
        } else {
            DataDirection::Out
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Passed = 0,
    Failed = 1,
    PhaseError = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandStatusWrapper {
    /// Copied from the CBW this status answers.
    pub tag: u32,
    /// Bytes of the declared data phase that were not transferred.
    pub data_residue: u32,
    pub status: CommandStatus,
}

impl CommandStatusWrapper {
    pub fn encode(&self) -> [u8; CSW_LEN] {
        let mut packet = [0; CSW_LEN];
        packet[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        packet[4..8].copy_from_slice(&self.tag.to_le_bytes());
        packet[8..12].copy_from_slice(&self.data_residue.to_le_bytes());
        packet[12] = self.status as u8;
        packet
    }

    /// Parse a CSW as a host would receive it.
    pub fn decode(packet: &[u8]) -> Result<CommandStatusWrapper, ErrorCode> {
        if packet.len() != CSW_LEN {
            return Err(ErrorCode::SIZE);
        }
        if read_u32(packet, 0) != CSW_SIGNATURE {
            return Err(ErrorCode::INVAL);
        }
        let status = match packet[12] {
            0 => CommandStatus::Passed,
            1 => CommandStatus::Failed,
            2 => CommandStatus::PhaseError,
            _ => return Err(ErrorCode::INVAL),
        };
        Ok(CommandStatusWrapper {
            tag: read_u32(packet, 4),
            data_residue: read_u32(packet, 8),
            status,
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_read10() {
        let packet = [
            0x55, 0x53, 0x42, 0x43, // signature
            0x78, 0x56, 0x34, 0x12, // tag
            0x00, 0x04, 0x00, 0x00, // 1024 bytes
            0x80, 0x00, 0x0A, // in, lun 0, 10 byte command
            0x28, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x02, 0x00, 0, 0, 0, 0, 0, 0,
        ];
        let cbw = CommandBlockWrapper::decode(&packet).unwrap();
        assert_eq!(cbw.tag, 0x1234_5678);
        assert_eq!(cbw.data_transfer_length, 1024);
        assert_eq!(cbw.direction(), DataDirection::In);
        assert_eq!(cbw.opcode(), 0x28);
        assert_eq!(cbw.logical_block_address(), 0x0102);
        assert_eq!(cbw.command_data().len(), 14);
        assert_eq!(cbw.encode(), packet);
    }

    #[test]
    fn reject_malformed_cbw() {
        let mut packet = [0u8; CBW_LEN];
        packet[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        assert!(CommandBlockWrapper::decode(&packet).is_ok());
        assert_eq!(CommandBlockWrapper::decode(&packet[..30]), Err(ErrorCode::SIZE));
        packet[3] = 0x44;
        assert_eq!(CommandBlockWrapper::decode(&packet), Err(ErrorCode::INVAL));
    }

    #[test]
    fn csw_layout() {
        let csw = CommandStatusWrapper {
            tag: 0xDEAD_BEEF,
            data_residue: 512,
            status: CommandStatus::Failed,
        };
        assert_eq!(
            csw.encode(),
            [0x55, 0x53, 0x42, 0x53, 0xEF, 0xBE, 0xAD, 0xDE, 0x00, 0x02, 0x00, 0x00, 0x01]
        );
    }
}
