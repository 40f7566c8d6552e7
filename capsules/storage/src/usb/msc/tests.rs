// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Host-driven scenarios: the tests play the USB host, feeding CBWs and data
//! into the transport and collecting what it queues on the bulk IN pipe.

use kernel::hil::block_storage::BlockDevice;
use kernel::hil::usb::{EventQueue, UsbEvent};
use kernel::ErrorCode;

use super::bot::{CommandBlockWrapper, CommandStatus, CommandStatusWrapper};
use super::scsi::{SenseData, INQUIRY_DATA};
use super::{MassStorage, MscConfig, TransportState};
use crate::spi_nor_block_store::{BlockBuffer, SpiNorBlockStore, SECTOR_SIZE};
use crate::test::flash::MockFlash;
use crate::test::usb::{MockUsb, UsbAction};
use crate::usb::descriptors::{DeviceRequestType, SetupData};

const IN: usize = 2;
const OUT: usize = 3;
const BASE: usize = 0x1000;
const END: usize = 0x5000; // 32 sectors

const DIR_IN: u8 = 0x80;
const DIR_OUT: u8 = 0x00;

type Msc<'a, B> = MassStorage<'a, MockUsb, B>;

macro_rules! fixture {
    ($flash:ident, $store:ident, $usb:ident, $msc:ident) => {
        let $flash = MockFlash::new(END);
        let mut cache = BlockBuffer::new();
        let $store = SpiNorBlockStore::new(&$flash, &mut cache, BASE..END).unwrap();
        $store.init().unwrap();
        let $usb = MockUsb::new();
        let mut staging = [0; SECTOR_SIZE];
        let $msc = MassStorage::new(&$usb, &$store, &mut staging, MscConfig::default());
        $msc.set_configuration();
        $usb.clear();
        let _ = (&$flash, &$store);
    };
}

struct Reply {
    packets: Vec<Vec<u8>>,
    csw: CommandStatusWrapper,
}

impl Reply {
    fn data(&self) -> Vec<u8> {
        self.packets.concat()
    }
}

fn cbw(tag: u32, length: u32, flags: u8, command: &[u8]) -> CommandBlockWrapper {
    let mut cb = [0; 16];
    cb[..command.len()].copy_from_slice(command);
    CommandBlockWrapper {
        tag,
        data_transfer_length: length,
        flags,
        lun: 0,
        command_length: command.len() as u8,
        command: cb,
    }
}

fn rw10(opcode: u8, lba: u32, blocks: u16) -> [u8; 10] {
    let lba = lba.to_be_bytes();
    let blocks = blocks.to_be_bytes();
    [opcode, 0, lba[0], lba[1], lba[2], lba[3], 0, blocks[0], blocks[1], 0]
}

fn send_out<B: BlockDevice>(msc: &Msc<'_, B>, usb: &MockUsb, packet: &[u8]) {
    usb.load_out_packet(packet);
    msc.handle_event(UsbEvent::PacketReceived {
        endpoint: OUT,
        length: packet.len(),
    });
}

/// Let the host collect IN packets until the transport stops queueing them.
fn drain_in<B: BlockDevice>(msc: &Msc<'_, B>, usb: &MockUsb) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    loop {
        let written = usb.take_writes(IN);
        if written.is_empty() {
            return packets;
        }
        for packet in written {
            packets.push(packet);
            msc.handle_event(UsbEvent::PacketTransmitted { endpoint: IN });
        }
    }
}

fn run<B: BlockDevice>(
    msc: &Msc<'_, B>,
    usb: &MockUsb,
    cbw: &CommandBlockWrapper,
    out_data: &[u8],
) -> Reply {
    send_out(msc, usb, &cbw.encode());
    for chunk in out_data.chunks(64) {
        send_out(msc, usb, chunk);
    }
    let mut packets = drain_in(msc, usb);
    let csw = CommandStatusWrapper::decode(&packets.pop().expect("no CSW")).unwrap();
    Reply { packets, csw }
}

fn passed(tag: u32, residue: u32) -> CommandStatusWrapper {
    CommandStatusWrapper {
        tag,
        data_residue: residue,
        status: CommandStatus::Passed,
    }
}

fn failed(tag: u32, residue: u32) -> CommandStatusWrapper {
    CommandStatusWrapper {
        tag,
        data_residue: residue,
        status: CommandStatus::Failed,
    }
}

fn request_sense<B: BlockDevice>(msc: &Msc<'_, B>, usb: &MockUsb) -> Vec<u8> {
    let reply = run(msc, usb, &cbw(0x5E5E, 18, DIR_IN, &[0x03, 0, 0, 0, 18, 0]), &[]);
    assert_eq!(reply.csw, passed(0x5E5E, 0));
    reply.data()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

#[test]
fn inquiry() {
    fixture!(flash, store, usb, msc);

    let reply = run(&msc, &usb, &cbw(0x11, 36, DIR_IN, &[0x12, 0, 0, 0, 36, 0]), &[]);
    assert_eq!(reply.data(), INQUIRY_DATA.to_vec());
    assert_eq!(reply.csw, passed(0x11, 0));
    assert_eq!(msc.state(), TransportState::AwaitingCommand);
    assert_eq!(usb.actions().last(), Some(&UsbAction::Receive(OUT)));
}

#[test]
fn inquiry_length_must_fit() {
    fixture!(flash, store, usb, msc);

    for (tag, length) in [(1, 0), (2, 40)] {
        usb.clear();
        let reply = run(&msc, &usb, &cbw(tag, length, DIR_IN, &[0x12]), &[]);
        assert!(reply.packets.is_empty());
        assert_eq!(reply.csw, failed(tag, 0));
        assert!(usb.actions().contains(&UsbAction::Stall(IN)));
    }

    // Shorter than the full response is fine.
    let reply = run(&msc, &usb, &cbw(3, 8, DIR_IN, &[0x12, 0, 0, 0, 8, 0]), &[]);
    assert_eq!(reply.data(), INQUIRY_DATA[..8].to_vec());
    assert_eq!(reply.csw, passed(3, 0));
}

#[test]
fn request_sense_length_must_fit() {
    fixture!(flash, store, usb, msc);

    assert_eq!(run(&msc, &usb, &cbw(1, 0, DIR_OUT, &[0x35]), &[]).csw, failed(1, 0));
    let pending = msc.sense();
    assert_ne!(pending, SenseData::NO_SENSE);

    for (tag, length) in [(2, 0), (3, 19)] {
        usb.clear();
        let command = [0x03, 0, 0, 0, length as u8, 0];
        let reply = run(&msc, &usb, &cbw(tag, length, DIR_IN, &command), &[]);
        assert!(reply.packets.is_empty());
        assert_eq!(reply.csw, failed(tag, 0));
        assert!(usb.actions().contains(&UsbAction::Stall(IN)));
        assert_eq!(msc.sense(), pending);
    }

    let sense = request_sense(&msc, &usb);
    assert_eq!((sense[2], sense[12], sense[13]), (0x05, 0x20, 0x00));
}

#[test]
fn read_capacity() {
    fixture!(flash, store, usb, msc);

    let reply = run(&msc, &usb, &cbw(0x25, 8, DIR_IN, &[0x25]), &[]);
    assert_eq!(reply.data(), vec![0, 0, 0, 31, 0, 0, 0x02, 0]);
    assert_eq!(reply.csw, passed(0x25, 0));
}

#[test]
fn read_format_capacities_truncates_to_host_length() {
    fixture!(flash, store, usb, msc);

    let reply = run(&msc, &usb, &cbw(1, 0xFC, DIR_IN, &[0x23, 0, 0, 0, 0, 0, 0, 0, 0xFC]), &[]);
    assert_eq!(
        reply.data(),
        vec![0, 0, 0, 0x10, 0, 0, 0, 32, 0x02, 0, 0x02, 0, 0, 0, 0, 32, 0, 0, 0x02, 0]
    );
    assert_eq!(reply.csw, passed(1, 0xFC - 20));
    assert!(!usb.actions().contains(&UsbAction::Stall(IN)));

    let reply = run(&msc, &usb, &cbw(2, 12, DIR_IN, &[0x23, 0, 0, 0, 0, 0, 0, 0, 12]), &[]);
    assert_eq!(reply.data().len(), 12);
    assert_eq!(reply.csw, passed(2, 0));
}

#[test]
fn mode_sense() {
    fixture!(flash, store, usb, msc);

    let reply = run(&msc, &usb, &cbw(6, 0xC0, DIR_IN, &[0x1A, 0, 0x3F, 0, 0xC0, 0]), &[]);
    assert_eq!(reply.data(), vec![0x03, 0, 0, 0]);
    assert_eq!(reply.csw, passed(6, 0xC0 - 4));

    let reply = run(&msc, &usb, &cbw(10, 8, DIR_IN, &[0x5A, 0, 0x3F, 0, 0, 0, 0, 0, 8, 0]), &[]);
    assert_eq!(reply.data(), vec![0, 6, 0, 0, 0, 0, 0, 0]);
    assert_eq!(reply.csw, passed(10, 0));
}

#[test]
fn mode_select_parameters_are_consumed() {
    fixture!(flash, store, usb, msc);

    let reply = run(&msc, &usb, &cbw(0x15, 24, DIR_OUT, &[0x15, 0x10, 0, 0, 24, 0]), &[0xAB; 24]);
    assert!(reply.packets.is_empty());
    assert_eq!(reply.csw, passed(0x15, 0));
    assert_eq!(flash.erases.get(), 0);
}

#[test]
fn write_then_read_back() {
    fixture!(flash, store, usb, msc);
    let data = pattern(1024, 3);

    let reply = run(&msc, &usb, &cbw(0x2A, 1024, DIR_OUT, &rw10(0x2A, 4, 2)), &data);
    assert!(reply.packets.is_empty());
    assert_eq!(reply.csw, passed(0x2A, 0));

    let reply = run(&msc, &usb, &cbw(0x28, 1024, DIR_IN, &rw10(0x28, 4, 2)), &[]);
    assert_eq!(reply.packets.len(), 16);
    assert!(reply.packets.iter().all(|p| p.len() == 64));
    assert_eq!(reply.data(), data);
    assert_eq!(reply.csw, passed(0x28, 0));

    store.flush().unwrap();
    assert_eq!(flash.contents(BASE + 4 * SECTOR_SIZE, 1024), data);
}

#[test]
fn twelve_byte_read_write() {
    fixture!(flash, store, usb, msc);
    let data = pattern(512, 9);

    let write12 = [0xAA, 0, 0, 0, 0, 20, 0, 0, 0, 1, 0, 0];
    let reply = run(&msc, &usb, &cbw(1, 512, DIR_OUT, &write12), &data);
    assert_eq!(reply.csw, passed(1, 0));

    let read12 = [0xA8, 0, 0, 0, 0, 20, 0, 0, 0, 1, 0, 0];
    let reply = run(&msc, &usb, &cbw(2, 512, DIR_IN, &read12), &[]);
    assert_eq!(reply.data(), data);
    assert_eq!(reply.csw, passed(2, 0));
}

#[test]
fn write_crossing_blocks_lands_on_flash_after_eviction() {
    fixture!(flash, store, usb, msc);
    let data = pattern(3 * SECTOR_SIZE, 1);

    let reply = run(&msc, &usb, &cbw(7, 1536, DIR_OUT, &rw10(0x2A, 6, 3)), &data);
    assert_eq!(reply.csw, passed(7, 0));
    // Sectors 6 and 7 were written back when sector 8 pulled in block 1.
    assert_eq!(flash.erases.get(), 1);
    assert_eq!(flash.contents(BASE + 6 * SECTOR_SIZE, 1024), data[..1024].to_vec());
}

#[test]
fn trailing_partial_sector_is_reported_as_residue() {
    fixture!(flash, store, usb, msc);
    let data = pattern(600, 5);

    let reply = run(&msc, &usb, &cbw(9, 600, DIR_OUT, &rw10(0x2A, 2, 2)), &data);
    assert_eq!(reply.csw, passed(9, 88));

    let mut sector = [0; SECTOR_SIZE];
    store.read(2, 1, &mut sector).unwrap();
    assert_eq!(sector.to_vec(), data[..512].to_vec());
    store.read(3, 1, &mut sector).unwrap();
    assert_eq!(sector, [0xFF; SECTOR_SIZE]);
}

#[test]
fn read_out_of_range() {
    fixture!(flash, store, usb, msc);

    let reply = run(&msc, &usb, &cbw(0x31, 1024, DIR_IN, &rw10(0x28, 31, 2)), &[]);
    assert!(reply.packets.is_empty());
    assert_eq!(reply.csw, failed(0x31, 1024));
    assert!(usb.actions().contains(&UsbAction::Stall(IN)));
    assert_eq!(msc.sense(), SenseData::LBA_OUT_OF_RANGE);

    let reply = run(&msc, &usb, &cbw(0x32, 512, DIR_OUT, &rw10(0x2A, 32, 1)), &[]);
    assert_eq!(reply.csw, failed(0x32, 512));
    assert!(usb.actions().contains(&UsbAction::Stall(OUT)));

    // The last sector is in range.
    let reply = run(&msc, &usb, &cbw(0x33, 512, DIR_IN, &rw10(0x28, 31, 1)), &[]);
    assert_eq!(reply.csw, passed(0x33, 0));
}

#[test]
fn medium_read_error() {
    fixture!(flash, store, usb, msc);
    flash.fail_reads.set(true);

    let reply = run(&msc, &usb, &cbw(0x40, 512, DIR_IN, &rw10(0x28, 0, 1)), &[]);
    assert!(reply.packets.is_empty());
    assert_eq!(reply.csw, failed(0x40, 512));
    assert!(usb.actions().contains(&UsbAction::Stall(IN)));

    let sense = request_sense(&msc, &usb);
    assert_eq!((sense[2], sense[12], sense[13]), (0x03, 0x11, 0x00));
}

#[test]
fn medium_read_error_mid_transfer() {
    fixture!(flash, store, usb, msc);

    send_out(&msc, &usb, &cbw(0x41, 1024, DIR_IN, &rw10(0x28, 7, 2)).encode());
    for _ in 0..7 {
        assert_eq!(usb.take_writes(IN).len(), 1);
        msc.handle_event(UsbEvent::PacketTransmitted { endpoint: IN });
    }
    assert_eq!(usb.take_writes(IN).len(), 1);
    // Sector 8 lives in a block that cannot be loaded.
    flash.fail_reads.set(true);
    msc.handle_event(UsbEvent::PacketTransmitted { endpoint: IN });

    let written = usb.take_writes(IN);
    assert_eq!(written.len(), 1);
    assert_eq!(
        CommandStatusWrapper::decode(&written[0]).unwrap(),
        failed(0x41, 512)
    );
    assert!(usb.actions().contains(&UsbAction::Stall(IN)));
    assert_eq!(msc.state(), TransportState::AwaitingStatusAck);
}

#[test]
fn medium_write_error_drains_data_phase() {
    fixture!(flash, store, usb, msc);
    flash.fail_reads.set(true);

    let reply = run(&msc, &usb, &cbw(0x50, 1024, DIR_OUT, &rw10(0x2A, 0, 2)), &pattern(1024, 0));
    assert_eq!(reply.csw, failed(0x50, 1024));
    assert_eq!(msc.sense(), SenseData::WRITE_FAULT);
    assert_eq!(msc.state(), TransportState::AwaitingCommand);
}

#[test]
fn eject_and_test_unit_ready() {
    fixture!(flash, store, usb, msc);
    let tur = [0x00, 0, 0, 0, 0, 0];

    assert_eq!(run(&msc, &usb, &cbw(1, 0, DIR_OUT, &tur), &[]).csw, passed(1, 0));

    let eject = [0x1B, 0, 0, 0, 0x02, 0];
    assert_eq!(run(&msc, &usb, &cbw(2, 0, DIR_OUT, &eject), &[]).csw, passed(2, 0));
    assert!(msc.is_removed());

    assert_eq!(run(&msc, &usb, &cbw(3, 0, DIR_OUT, &tur), &[]).csw, failed(3, 0));
    let sense = request_sense(&msc, &usb);
    assert_eq!(sense.len(), 18);
    assert_eq!(sense[0], 0x70);
    assert_eq!(sense[7], 0x0A);
    assert_eq!((sense[2], sense[12], sense[13]), (0x02, 0x3A, 0x00));

    // Reported once.
    let sense = request_sense(&msc, &usb);
    assert_eq!((sense[2], sense[12]), (0, 0));

    let load = [0x1B, 0, 0, 0, 0x03, 0];
    assert_eq!(run(&msc, &usb, &cbw(4, 0, DIR_OUT, &load), &[]).csw, passed(4, 0));
    assert_eq!(run(&msc, &usb, &cbw(5, 0, DIR_OUT, &tur), &[]).csw, passed(5, 0));
}

#[test]
fn prevent_allow_medium_removal() {
    fixture!(flash, store, usb, msc);

    let prevent = [0x1E, 0, 0, 0, 0x01, 0];
    assert_eq!(run(&msc, &usb, &cbw(1, 0, DIR_OUT, &prevent), &[]).csw, passed(1, 0));
    assert!(msc.is_removal_prevented());
    assert_eq!(msc.sense(), SenseData::NO_SENSE);

    let allow = [0x1E, 0, 0, 0, 0x00, 0];
    assert_eq!(run(&msc, &usb, &cbw(2, 0, DIR_OUT, &allow), &[]).csw, passed(2, 0));
    assert!(!msc.is_removal_prevented());
}

#[test]
fn verify_with_declared_data_stalls_pipe() {
    fixture!(flash, store, usb, msc);

    let verify = rw10(0x2F, 0, 1);
    assert_eq!(run(&msc, &usb, &cbw(1, 0, DIR_OUT, &verify), &[]).csw, passed(1, 0));

    let reply = run(&msc, &usb, &cbw(2, 512, DIR_OUT, &verify), &[]);
    assert_eq!(reply.csw, passed(2, 512));
    assert!(usb.actions().contains(&UsbAction::Stall(OUT)));
}

#[test]
fn unsupported_opcode() {
    fixture!(flash, store, usb, msc);

    // Data-in: a zero-length packet ends the data phase.
    let reply = run(&msc, &usb, &cbw(1, 8, DIR_IN, &[0x4A, 0, 0, 0, 0, 0, 0, 0, 8, 0]), &[]);
    assert_eq!(reply.packets, vec![Vec::<u8>::new()]);
    assert_eq!(reply.csw, failed(1, 8));
    let sense = request_sense(&msc, &usb);
    assert_eq!((sense[2], sense[12], sense[13]), (0x05, 0x20, 0x00));

    // Data-out: the OUT pipe is stalled.
    usb.clear();
    let reply = run(&msc, &usb, &cbw(2, 512, DIR_OUT, &[0x04, 0, 0, 0, 0, 0]), &[]);
    assert_eq!(reply.csw, failed(2, 512));
    assert!(usb.actions().contains(&UsbAction::Stall(OUT)));

    // No data.
    let reply = run(&msc, &usb, &cbw(3, 0, DIR_OUT, &[0x35]), &[]);
    assert!(reply.packets.is_empty());
    assert_eq!(reply.csw, failed(3, 0));
}

#[test]
fn invalid_cbw_stalls_until_reset() {
    fixture!(flash, store, usb, msc);

    let packet = cbw(1, 36, DIR_IN, &[0x12]).encode();
    send_out(&msc, &usb, &packet[..30]);
    assert_eq!(usb.actions(), vec![UsbAction::Stall(IN), UsbAction::Stall(OUT)]);
    assert!(usb.take_writes(IN).is_empty());

    let mut bad_signature = packet;
    bad_signature[0] = 0;
    usb.clear();
    send_out(&msc, &usb, &bad_signature);
    assert_eq!(usb.actions(), vec![UsbAction::Stall(IN), UsbAction::Stall(OUT)]);

    usb.clear();
    let reset = SetupData {
        request_type: DeviceRequestType(0x21),
        request_code: 0xFF,
        value: 0,
        index: 0,
        length: 0,
    };
    assert_eq!(msc.class_request(&reset), Ok(()));
    assert_eq!(
        usb.actions(),
        vec![
            UsbAction::ClearStall(IN),
            UsbAction::ClearReady(IN),
            UsbAction::ClearStall(OUT),
            UsbAction::ClearReady(OUT),
            UsbAction::Receive(OUT),
            UsbAction::CtrlAck,
        ]
    );

    let reply = run(&msc, &usb, &cbw(2, 36, DIR_IN, &[0x12, 0, 0, 0, 36, 0]), &[]);
    assert_eq!(reply.csw, passed(2, 0));
}

#[test]
fn get_max_lun() {
    fixture!(flash, store, usb, msc);
    let mut setup = SetupData::get(&[0xA1, 0xFE, 0, 0, 0, 0, 1, 0]).unwrap();

    assert_eq!(msc.class_request(&setup), Ok(()));
    assert_eq!(usb.actions(), vec![UsbAction::CtrlRespond(vec![0])]);

    for (index, length) in [(0, 2), (1, 1)] {
        usb.clear();
        setup.index = index;
        setup.length = length;
        assert_eq!(msc.class_request(&setup), Err(ErrorCode::INVAL));
        assert_eq!(usb.actions(), vec![UsbAction::CtrlStallOut]);
    }
}

#[test]
fn unknown_class_request_stalls_both_directions() {
    fixture!(flash, store, usb, msc);

    let setup = SetupData::get(&[0x21, 0xFC, 0, 0, 0, 0, 0, 0]).unwrap();
    assert_eq!(msc.class_request(&setup), Err(ErrorCode::NOSUPPORT));
    let standard = SetupData::get(&[0x80, 0x06, 0, 1, 0, 0, 18, 0]).unwrap();
    assert_eq!(msc.class_request(&standard), Err(ErrorCode::NOSUPPORT));
    assert_eq!(usb.actions(), vec![UsbAction::CtrlStall, UsbAction::CtrlStall]);
}

#[test]
fn mass_storage_reset_aborts_data_phase() {
    fixture!(flash, store, usb, msc);

    send_out(&msc, &usb, &cbw(1, 1024, DIR_OUT, &rw10(0x2A, 0, 2)).encode());
    assert_eq!(msc.state(), TransportState::DataOut);
    let reset = SetupData::get(&[0x21, 0xFF, 0, 0, 0, 0, 0, 0]).unwrap();
    msc.class_request(&reset).unwrap();
    assert_eq!(msc.state(), TransportState::AwaitingCommand);
}

#[test]
fn bus_reset_drops_command() {
    fixture!(flash, store, usb, msc);

    send_out(&msc, &usb, &cbw(1, 1024, DIR_IN, &rw10(0x28, 0, 2)).encode());
    assert_eq!(msc.state(), TransportState::DataIn);
    msc.handle_event(UsbEvent::BusReset);
    assert_eq!(msc.state(), TransportState::AwaitingCommand);

    msc.set_configuration();
    usb.clear();
    let reply = run(&msc, &usb, &cbw(2, 8, DIR_IN, &[0x25]), &[]);
    assert_eq!(reply.csw, passed(2, 0));
}

#[test]
fn service_drains_event_queue() {
    fixture!(flash, store, usb, msc);
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    usb.load_out_packet(&cbw(0x77, 36, DIR_IN, &[0x12, 0, 0, 0, 36, 0]).encode());
    producer.enqueue(UsbEvent::Resumed).unwrap();
    producer
        .enqueue(UsbEvent::PacketReceived {
            endpoint: OUT,
            length: 31,
        })
        .unwrap();
    msc.service(&mut consumer);
    assert_eq!(msc.state(), TransportState::DataIn);
    assert_eq!(usb.take_writes(IN), vec![INQUIRY_DATA.to_vec()]);

    producer
        .enqueue(UsbEvent::PacketTransmitted { endpoint: IN })
        .unwrap();
    msc.service(&mut consumer);
    assert_eq!(msc.state(), TransportState::AwaitingStatusAck);
    let csw = usb.take_writes(IN);
    assert_eq!(CommandStatusWrapper::decode(&csw[0]).unwrap(), passed(0x77, 0));

    producer
        .enqueue(UsbEvent::PacketTransmitted { endpoint: IN })
        .unwrap();
    msc.service(&mut consumer);
    assert_eq!(msc.state(), TransportState::AwaitingCommand);
}

#[test]
fn each_command_gets_one_status() {
    fixture!(flash, store, usb, msc);
    let commands = [
        cbw(100, 36, DIR_IN, &[0x12, 0, 0, 0, 36, 0]),
        cbw(101, 0, DIR_OUT, &[0x00]),
        cbw(102, 512, DIR_IN, &rw10(0x28, 0, 1)),
        cbw(103, 8, DIR_IN, &[0x25]),
    ];
    for command in commands.iter() {
        let reply = run(&msc, &usb, command, &[]);
        assert_eq!(reply.csw.tag, command.tag);
        assert_eq!(reply.csw.status, CommandStatus::Passed);
        assert!(usb.take_writes(IN).is_empty());
        assert_eq!(msc.state(), TransportState::AwaitingCommand);
    }
}
