// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Bulk-Only Transport state machine.
//!
//! One command is processed at a time:
//!
//! ```text
//!                 CBW (no data)
//!   AwaitingCommand ----------------------------+
//!     |  ^   | CBW (device to host)             |
//!     |  |   v                                  v
//!     |  |  DataIn --- last packet sent ---> AwaitingStatusAck
//!     |  |                                      ^      |
//!     |  |   CBW (host to device)               |      |
//!     |  |  DataOut -- last packet received ----+      |
//!     |  +------------- CSW collected by host ---------+
//! ```
//!
//! The transport reacts to bulk endpoint events delivered through
//! [`MassStorage::handle_event`] (or [`MassStorage::service`], which drains an
//! event queue) and to the class requests and SET_CONFIGURATION forwarded by
//! the control endpoint handler.
//!
//! Data for small responses (INQUIRY, capacities, sense) and for each medium
//! sector passes through a one-sector staging buffer. The medium must use
//! [`SECTOR_SIZE`] byte sectors.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! let msc = static_init!(
//!     MassStorage<'static, m480::usbd::Usbd, SpiNorBlockStore<'static, m480::spim::Spim>>,
//!     MassStorage::new(usbd, store, staging, MscConfig::default())
//! );
//! // SET_CONFIGURATION handler:
//! msc.set_configuration();
//! // Main loop:
//! msc.service(&mut usb_events);
//! ```

use core::cell::Cell;

use kernel::config::CONFIG;
use kernel::hil::block_storage::BlockDevice;
use kernel::hil::usb::{Endpoint, EventConsumer, UsbController, UsbEvent};
use kernel::utilities::cells::{OptionalCell, TakeCell};
use kernel::ErrorCode;
use kernel::{debug, debug_warn};

use super::bot::{CommandBlockWrapper, CommandStatus, CommandStatusWrapper, DataDirection};
use super::scsi::{self, Opcode, SenseData, INQUIRY_DATA};
use crate::spi_nor_block_store::SECTOR_SIZE;
use crate::usb::descriptors::{RequestType, SetupData, TransferDirection};

/// Largest bulk packet handled. Full-speed bulk endpoints use 64 bytes.
pub const MAX_PACKET_SIZE: usize = 64;

const REQUEST_GET_MAX_LUN: u8 = 0xFE;
const REQUEST_MASS_STORAGE_RESET: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MscConfig {
    /// Hardware endpoint carrying bulk IN (device to host) traffic.
    pub bulk_in_endpoint: Endpoint,
    /// Hardware endpoint carrying bulk OUT (host to device) traffic.
    pub bulk_out_endpoint: Endpoint,
    /// Interface number class requests must be addressed to.
    pub interface_number: u16,
}

impl Default for MscConfig {
    fn default() -> Self {
        MscConfig {
            bulk_in_endpoint: 2,
            bulk_out_endpoint: 3,
            interface_number: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    AwaitingCommand,
    DataIn,
    DataOut,
    AwaitingStatusAck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    /// Response payload held in the staging buffer.
    Staging,
    /// Sectors of the block device.
    Medium,
    /// Parameter data that is accepted and dropped.
    Discard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PendingTransfer {
    source: Source,
    /// Offset into the staging buffer, or byte address on the medium.
    address: usize,
    /// Bytes left in the data phase.
    remaining: usize,
    /// Size of the most recent IN packet.
    last_packet: usize,
    /// Bytes written to the medium during a data-out phase.
    committed: usize,
    /// A medium write failed; the rest of the data-out phase is dropped.
    failed: bool,
}

impl PendingTransfer {
    const IDLE: PendingTransfer = PendingTransfer {
        source: Source::Staging,
        address: 0,
        remaining: 0,
        last_packet: 0,
        committed: 0,
        failed: false,
    };

    const fn new(source: Source, address: usize, remaining: usize) -> PendingTransfer {
        PendingTransfer {
            source,
            address,
            remaining,
            ..PendingTransfer::IDLE
        }
    }
}

pub struct MassStorage<'a, U: UsbController, B: BlockDevice> {
    controller: &'a U,
    storage: &'a B,
    config: MscConfig,
    state: Cell<TransportState>,
    cbw: OptionalCell<CommandBlockWrapper>,
    csw: Cell<CommandStatusWrapper>,
    transfer: Cell<PendingTransfer>,
    sense: Cell<SenseData>,
    removed: Cell<bool>,
    prevent_removal: Cell<bool>,
    staging: TakeCell<'a, [u8; SECTOR_SIZE]>,
    /// Medium sector currently held in `staging`.
    staged_sector: OptionalCell<usize>,
}

impl<'a, U: UsbController, B: BlockDevice> MassStorage<'a, U, B> {
    pub fn new(
        controller: &'a U,
        storage: &'a B,
        staging: &'a mut [u8; SECTOR_SIZE],
        config: MscConfig,
    ) -> MassStorage<'a, U, B> {
        MassStorage {
            controller,
            storage,
            config,
            state: Cell::new(TransportState::AwaitingCommand),
            cbw: OptionalCell::empty(),
            csw: Cell::new(CommandStatusWrapper {
                tag: 0,
                data_residue: 0,
                status: CommandStatus::Passed,
            }),
            transfer: Cell::new(PendingTransfer::IDLE),
            sense: Cell::new(SenseData::NO_SENSE),
            removed: Cell::new(false),
            prevent_removal: Cell::new(false),
            staging: TakeCell::new(staging),
            staged_sector: OptionalCell::empty(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    /// Sense data that the next REQUEST SENSE will report.
    pub fn sense(&self) -> SenseData {
        self.sense.get()
    }

    /// The host ejected the medium with START STOP UNIT.
    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }

    /// The host asked to lock the medium with PREVENT ALLOW MEDIUM REMOVAL.
    pub fn is_removal_prevented(&self) -> bool {
        self.prevent_removal.get()
    }

    /// Handle every event pending in the controller's queue.
    pub fn service<const N: usize>(&self, events: &mut EventConsumer<'_, N>) {
        while let Some(event) = events.dequeue() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&self, event: UsbEvent) {
        match event {
            UsbEvent::PacketReceived { endpoint, length }
                if endpoint == self.config.bulk_out_endpoint =>
            {
                self.bulk_out_received(length)
            }
            UsbEvent::PacketTransmitted { endpoint } if endpoint == self.config.bulk_in_endpoint => {
                self.bulk_in_transmitted()
            }
            UsbEvent::BusReset | UsbEvent::Detached => self.abort(),
            _ => {}
        }
    }

    /// The host selected the configuration containing this interface.
    pub fn set_configuration(&self) {
        self.reset_pipes();
    }

    /// Handle a class-specific request addressed to the interface.
    ///
    /// Answers through the control endpoint. A known request with invalid
    /// parameters stalls the control OUT direction, anything else stalls the
    /// whole control pipe.
    pub fn class_request(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        let result = if setup.request_type.request_type() != RequestType::Class {
            Err(ErrorCode::NOSUPPORT)
        } else {
            let direction = setup.request_type.transfer_direction();
            let for_us = setup.index == self.config.interface_number && setup.value == 0;
            match setup.request_code {
                REQUEST_GET_MAX_LUN => {
                    if for_us
                        && setup.length == 1
                        && direction == TransferDirection::DeviceToHost
                    {
                        // Single logical unit.
                        self.controller.ctrl_respond(&[0]);
                        Ok(())
                    } else {
                        Err(ErrorCode::INVAL)
                    }
                }
                REQUEST_MASS_STORAGE_RESET => {
                    if for_us
                        && setup.length == 0
                        && direction == TransferDirection::HostToDevice
                    {
                        self.reset_pipes();
                        self.controller.ctrl_ack();
                        Ok(())
                    } else {
                        Err(ErrorCode::INVAL)
                    }
                }
                _ => Err(ErrorCode::NOSUPPORT),
            }
        };
        match result {
            Err(ErrorCode::INVAL) => self.controller.ctrl_stall_out(),
            Err(_) => self.controller.ctrl_stall(),
            Ok(()) => {}
        }
        result
    }

    fn reset_pipes(&self) {
        for endpoint in [self.config.bulk_in_endpoint, self.config.bulk_out_endpoint] {
            self.controller.endpoint_clear_stall(endpoint);
            self.controller.endpoint_clear_ready(endpoint);
        }
        self.abort();
        self.controller.endpoint_receive(self.config.bulk_out_endpoint);
    }

    /// Drop the command in progress.
    fn abort(&self) {
        self.state.set(TransportState::AwaitingCommand);
        self.cbw.clear();
        self.transfer.set(PendingTransfer::IDLE);
    }

    fn bulk_out_received(&self, length: usize) {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let len = length.min(MAX_PACKET_SIZE);
        let len = self
            .controller
            .endpoint_read(self.config.bulk_out_endpoint, &mut packet[..len]);
        match self.state.get() {
            TransportState::AwaitingCommand => self.receive_command(&packet[..len]),
            TransportState::DataOut => self.receive_data(&packet[..len]),
            state => debug_warn!("msc: dropped {} byte OUT packet in {:?}", len, state),
        }
    }

    fn bulk_in_transmitted(&self) {
        match self.state.get() {
            TransportState::DataIn => {
                let transfer = self.transfer.get();
                if transfer.remaining > 0 {
                    self.send_next_packet();
                } else {
                    // A short response ending on a full packet needs a stall
                    // so the host sees the end of the data phase.
                    if self.csw.get().data_residue > 0 && transfer.last_packet == self.max_packet() {
                        self.controller.endpoint_stall(self.config.bulk_in_endpoint);
                    }
                    self.send_status();
                }
            }
            TransportState::AwaitingStatusAck => {
                self.abort();
                self.controller.endpoint_receive(self.config.bulk_out_endpoint);
            }
            _ => {}
        }
    }

    fn receive_command(&self, packet: &[u8]) {
        let cbw = match CommandBlockWrapper::decode(packet) {
            Ok(cbw) => cbw,
            Err(_) => {
                // Only a Reset Recovery gets the pipes going again.
                debug_warn!("msc: invalid CBW ({} bytes)", packet.len());
                self.controller.endpoint_stall(self.config.bulk_in_endpoint);
                self.controller.endpoint_stall(self.config.bulk_out_endpoint);
                return;
            }
        };
        if CONFIG.trace_msc {
            debug!(
                "msc: CBW tag {:#x} opcode {:#04x} length {} flags {:#04x}",
                cbw.tag,
                cbw.opcode(),
                cbw.data_transfer_length,
                cbw.flags
            );
        }

        self.cbw.set(cbw);
        self.csw.set(CommandStatusWrapper {
            tag: cbw.tag,
            data_residue: 0,
            status: CommandStatus::Passed,
        });
        self.transfer.set(PendingTransfer::IDLE);
        self.dispatch(&cbw);
    }

    fn dispatch(&self, cbw: &CommandBlockWrapper) {
        let sector_count = self.storage.sector_count() as u32;
        match Opcode::from_byte(cbw.opcode()) {
            Some(Opcode::Inquiry) => {
                self.send_fixed(cbw, &INQUIRY_DATA);
            }
            Some(Opcode::RequestSense) => {
                let data = self.sense.get().to_bytes();
                if self.send_fixed(cbw, &data) {
                    self.sense.set(SenseData::NO_SENSE);
                }
            }
            Some(Opcode::ReadFormatCapacities) => {
                self.send_data(cbw, &scsi::format_capacity_data(sector_count, SECTOR_SIZE as u32))
            }
            Some(Opcode::ReadCapacity10) => {
                self.send_data(cbw, &scsi::read_capacity_data(sector_count, SECTOR_SIZE as u32))
            }
            Some(Opcode::ModeSense6) => self.send_data(cbw, &scsi::mode_sense6_data(false)),
            Some(Opcode::ModeSense10) => self.send_data(cbw, &scsi::mode_sense10_data(false)),
            Some(Opcode::Read10 | Opcode::Read12) => self.start_read(cbw),
            Some(Opcode::Write10 | Opcode::Write12) => self.start_write(cbw),
            Some(Opcode::ModeSelect6 | Opcode::ModeSelect10) => self.accept_parameters(cbw),
            Some(Opcode::Verify10) => self.complete(cbw, CommandStatus::Passed),
            Some(Opcode::StartStopUnit) => {
                // LoEj and Start bits.
                match cbw.command_data()[2] & 0x03 {
                    0b10 => self.removed.set(true),
                    0b11 => self.removed.set(false),
                    _ => {}
                }
                self.complete(cbw, CommandStatus::Passed);
            }
            Some(Opcode::TestUnitReady) => {
                if self.removed.get() {
                    self.sense.set(SenseData::MEDIUM_NOT_PRESENT);
                    self.complete(cbw, CommandStatus::Failed);
                } else {
                    self.complete(cbw, CommandStatus::Passed);
                }
            }
            Some(Opcode::PreventAllowMediumRemoval) => {
                self.prevent_removal.set(cbw.command_data()[2] & 0x01 != 0);
                self.complete(cbw, CommandStatus::Passed);
            }
            None => self.reject(cbw),
        }
    }

    /// Send a response whose length the host must request exactly or
    /// shorter, never zero. Returns whether a data phase was started.
    fn send_fixed(&self, cbw: &CommandBlockWrapper, payload: &[u8]) -> bool {
        let length = cbw.data_transfer_length as usize;
        if cbw.direction() != DataDirection::In || length > payload.len() {
            self.controller.endpoint_stall(self.config.bulk_in_endpoint);
            self.set_status(CommandStatus::Failed, 0);
            self.send_status();
            return false;
        }
        self.start_staged_in(&payload[..length], length);
        true
    }

    /// Send a response truncated to the host's length; a shorter response is
    /// reported in the residue.
    fn send_data(&self, cbw: &CommandBlockWrapper, payload: &[u8]) {
        let length = cbw.data_transfer_length as usize;
        match cbw.direction() {
            DataDirection::In => {
                let len = length.min(payload.len());
                self.start_staged_in(&payload[..len], length);
            }
            DataDirection::None => self.complete(cbw, CommandStatus::Passed),
            DataDirection::Out => self.complete(cbw, CommandStatus::PhaseError),
        }
    }

    fn start_staged_in(&self, payload: &[u8], declared: usize) {
        let staged = self
            .staging
            .map(|staging| staging[..payload.len()].copy_from_slice(payload));
        self.staged_sector.clear();
        if staged.is_none() {
            self.controller.endpoint_stall(self.config.bulk_in_endpoint);
            self.set_status(CommandStatus::Failed, declared);
            self.send_status();
            return;
        }
        self.set_status(CommandStatus::Passed, declared - payload.len());
        self.transfer
            .set(PendingTransfer::new(Source::Staging, 0, payload.len()));
        self.state.set(TransportState::DataIn);
        self.send_next_packet();
    }

    /// Check a READ/WRITE range against the medium. Sets the sense data and
    /// completes the command if it is out of range.
    fn check_medium_range(&self, cbw: &CommandBlockWrapper) -> Option<usize> {
        let lba = cbw.logical_block_address() as usize;
        let sectors = (cbw.data_transfer_length as usize).div_ceil(SECTOR_SIZE);
        match lba.checked_add(sectors) {
            Some(end) if end <= self.storage.sector_count() => Some(lba * SECTOR_SIZE),
            _ => {
                self.sense.set(SenseData::LBA_OUT_OF_RANGE);
                self.complete(cbw, CommandStatus::Failed);
                None
            }
        }
    }

    fn start_read(&self, cbw: &CommandBlockWrapper) {
        match cbw.direction() {
            DataDirection::In => {}
            DataDirection::None => return self.complete(cbw, CommandStatus::Passed),
            DataDirection::Out => return self.complete(cbw, CommandStatus::PhaseError),
        }
        if let Some(address) = self.check_medium_range(cbw) {
            self.staged_sector.clear();
            self.transfer.set(PendingTransfer::new(
                Source::Medium,
                address,
                cbw.data_transfer_length as usize,
            ));
            self.state.set(TransportState::DataIn);
            self.send_next_packet();
        }
    }

    fn start_write(&self, cbw: &CommandBlockWrapper) {
        match cbw.direction() {
            DataDirection::Out => {}
            DataDirection::None => return self.complete(cbw, CommandStatus::Passed),
            DataDirection::In => return self.complete(cbw, CommandStatus::PhaseError),
        }
        if let Some(address) = self.check_medium_range(cbw) {
            self.staged_sector.clear();
            self.transfer.set(PendingTransfer::new(
                Source::Medium,
                address,
                cbw.data_transfer_length as usize,
            ));
            self.state.set(TransportState::DataOut);
            self.controller.endpoint_receive(self.config.bulk_out_endpoint);
        }
    }

    /// MODE SELECT parameter lists are read and ignored.
    fn accept_parameters(&self, cbw: &CommandBlockWrapper) {
        if cbw.direction() == DataDirection::Out {
            self.transfer.set(PendingTransfer::new(
                Source::Discard,
                0,
                cbw.data_transfer_length as usize,
            ));
            self.state.set(TransportState::DataOut);
            self.controller.endpoint_receive(self.config.bulk_out_endpoint);
        } else {
            self.complete(cbw, CommandStatus::Passed);
        }
    }

    /// Finish a command without transferring data. A data phase the host
    /// declared anyway is refused by stalling its pipe.
    fn complete(&self, cbw: &CommandBlockWrapper, status: CommandStatus) {
        match cbw.direction() {
            DataDirection::In => self.controller.endpoint_stall(self.config.bulk_in_endpoint),
            DataDirection::Out => self.controller.endpoint_stall(self.config.bulk_out_endpoint),
            DataDirection::None => {}
        }
        self.set_status(status, cbw.data_transfer_length as usize);
        self.send_status();
    }

    fn reject(&self, cbw: &CommandBlockWrapper) {
        debug_warn!("msc: unsupported opcode {:#04x}", cbw.opcode());
        self.sense.set(SenseData::INVALID_COMMAND);
        self.set_status(CommandStatus::Failed, cbw.data_transfer_length as usize);
        match cbw.direction() {
            DataDirection::In => {
                // End the data phase with a zero-length packet.
                self.transfer.set(PendingTransfer::IDLE);
                self.state.set(TransportState::DataIn);
                self.controller.endpoint_write(self.config.bulk_in_endpoint, &[]);
            }
            DataDirection::Out => {
                self.controller.endpoint_stall(self.config.bulk_out_endpoint);
                self.send_status();
            }
            DataDirection::None => self.send_status(),
        }
    }

    fn send_next_packet(&self) {
        let mut transfer = self.transfer.get();
        let len = transfer.remaining.min(self.max_packet());
        let mut packet = [0u8; MAX_PACKET_SIZE];

        let result = match transfer.source {
            Source::Staging => self
                .staging
                .map(|staging| {
                    packet[..len]
                        .copy_from_slice(&staging[transfer.address..transfer.address + len]);
                })
                .ok_or(ErrorCode::BUSY),
            Source::Medium => self.read_medium(transfer.address, &mut packet[..len]),
            Source::Discard => Err(ErrorCode::FAIL),
        };

        if let Err(e) = result {
            debug_warn!("msc: read at {:#x} failed: {:?}", transfer.address, e);
            self.sense.set(SenseData::UNRECOVERED_READ_ERROR);
            self.controller.endpoint_stall(self.config.bulk_in_endpoint);
            let residue = self.csw.get().data_residue as usize + transfer.remaining;
            self.set_status(CommandStatus::Failed, residue);
            self.send_status();
            return;
        }

        self.controller
            .endpoint_write(self.config.bulk_in_endpoint, &packet[..len]);
        transfer.address += len;
        transfer.remaining -= len;
        transfer.last_packet = len;
        self.transfer.set(transfer);
    }

    fn receive_data(&self, packet: &[u8]) {
        let mut transfer = self.transfer.get();
        let len = packet.len().min(transfer.remaining);

        if transfer.source == Source::Medium && !transfer.failed {
            match self.write_medium(transfer.address, &packet[..len]) {
                Ok(committed) => transfer.committed += committed,
                Err(e) => {
                    debug_warn!("msc: write at {:#x} failed: {:?}", transfer.address, e);
                    self.sense.set(SenseData::WRITE_FAULT);
                    transfer.failed = true;
                }
            }
        }
        transfer.address += len;
        transfer.remaining -= len;
        self.transfer.set(transfer);

        if transfer.remaining > 0 {
            self.controller.endpoint_receive(self.config.bulk_out_endpoint);
            return;
        }

        let declared = self.cbw.map_or(0, |cbw| cbw.data_transfer_length as usize);
        let (status, residue) = match transfer.source {
            Source::Medium if transfer.failed => (CommandStatus::Failed, declared - transfer.committed),
            // A trailing partial sector is never written.
            Source::Medium => (CommandStatus::Passed, declared - transfer.committed),
            _ => (CommandStatus::Passed, 0),
        };
        self.set_status(status, residue);
        self.send_status();
    }

    /// Fill `out` from the medium starting at byte `address`, loading sectors
    /// into the staging buffer as needed.
    fn read_medium(&self, address: usize, out: &mut [u8]) -> Result<(), ErrorCode> {
        self.staging.map_or(Err(ErrorCode::BUSY), |staging| {
            let mut done = 0;
            while done < out.len() {
                let sector = (address + done) / SECTOR_SIZE;
                let offset = (address + done) % SECTOR_SIZE;
                if !self.staged_sector.map_or(false, |staged| *staged == sector) {
                    self.staged_sector.clear();
                    self.storage.read_sectors(sector, 1, staging)?;
                    self.staged_sector.set(sector);
                }
                let n = (out.len() - done).min(SECTOR_SIZE - offset);
                out[done..done + n].copy_from_slice(&staging[offset..offset + n]);
                done += n;
            }
            Ok(())
        })
    }

    /// Collect `data` destined for byte `address` and write every sector that
    /// becomes complete. Returns the number of bytes written to the medium.
    fn write_medium(&self, address: usize, data: &[u8]) -> Result<usize, ErrorCode> {
        self.staging.map_or(Err(ErrorCode::BUSY), |staging| {
            let mut done = 0;
            let mut committed = 0;
            while done < data.len() {
                let sector = (address + done) / SECTOR_SIZE;
                let offset = (address + done) % SECTOR_SIZE;
                let n = (data.len() - done).min(SECTOR_SIZE - offset);
                staging[offset..offset + n].copy_from_slice(&data[done..done + n]);
                done += n;
                if offset + n == SECTOR_SIZE {
                    self.storage.write_sectors(sector, 1, staging)?;
                    committed += SECTOR_SIZE;
                }
            }
            Ok(committed)
        })
    }

    fn set_status(&self, status: CommandStatus, residue: usize) {
        let mut csw = self.csw.get();
        csw.status = status;
        csw.data_residue = residue as u32;
        self.csw.set(csw);
    }

    fn send_status(&self) {
        let csw = self.csw.get();
        if CONFIG.trace_msc {
            debug!(
                "msc: CSW tag {:#x} residue {} status {:?}",
                csw.tag, csw.data_residue, csw.status
            );
        }
        self.state.set(TransportState::AwaitingStatusAck);
        self.controller
            .endpoint_write(self.config.bulk_in_endpoint, &csw.encode());
    }

    fn max_packet(&self) -> usize {
        self.controller
            .endpoint_max_packet_size(self.config.bulk_in_endpoint)
            .min(MAX_PACKET_SIZE)
    }
}
