// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Full-speed USB device controller (USBD).
//!
//! The controller has twelve hardware endpoint slots sharing 1 KiB of packet
//! SRAM. Each slot is bound to a USB endpoint number and a direction. The
//! mass-storage layout used here is:
//!
//! | Slot | Use          | USB endpoint | SRAM      |
//! |------|--------------|--------------|-----------|
//! | -    | SETUP packet | -            | 0..8      |
//! | EP0  | control IN   | 0x80         | 8..72     |
//! | EP1  | control OUT  | 0x00         | 8..72     |
//! | EP2  | bulk IN      | 0x81         | 72..136   |
//! | EP3  | bulk OUT     | 0x01         | 136..200  |
//!
//! The interrupt handler acknowledges each source and posts a
//! [`UsbEvent`] for the class drivers; it never calls them directly. The
//! only standard request it answers itself is SET_ADDRESS, whose address
//! must be latched after the status stage.

use core::cell::Cell;

use heapless::Vec;
use kernel::debug_warn;
use kernel::hil::usb::{Endpoint, EventProducer, UsbController, UsbEvent};
use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{
    register_bitfields, register_structs, Field, LocalRegisterCopy, ReadOnly, ReadWrite,
};
use kernel::utilities::cells::{MapCell, OptionalCell};
use kernel::utilities::StaticRef;

pub const N_ENDPOINTS: usize = 12;
const SRAM_SIZE: usize = 1024;

/// Max packet size of every endpoint in the mass-storage layout.
pub const EP_MAX_PACKET: usize = 64;

pub const SETUP_BUFFER: usize = 0;
const SETUP_LEN: usize = 8;

/// Hardware slots of the mass-storage layout.
pub const EP_CTRL_IN: Endpoint = 0;
pub const EP_CTRL_OUT: Endpoint = 1;
pub const EP_BULK_IN: Endpoint = 2;
pub const EP_BULK_OUT: Endpoint = 3;

/// USB endpoint number the bulk pipes are exposed on.
pub const MSC_ENDPOINT_NUMBER: u32 = 1;

register_structs! {
    pub UsbdRegisters {
        (0x000 => inten: ReadWrite<u32, INTEN::Register>),
        (0x004 => intsts: ReadWrite<u32, INTSTS::Register>),
        (0x008 => faddr: ReadWrite<u32, FADDR::Register>),
        (0x00C => _reserved0),
        (0x010 => attr: ReadWrite<u32, ATTR::Register>),
        (0x014 => vbusdet: ReadOnly<u32, VBUSDET::Register>),
        (0x018 => stbufseg: ReadWrite<u32, BUFSEG::Register>),
        (0x01C => _reserved1),
        (0x090 => se0: ReadWrite<u32, SE0::Register>),
        (0x094 => _reserved2),
        (0x100 => sram: [ReadWrite<u8>; SRAM_SIZE]),
        (0x500 => ep: [EndpointRegisters; N_ENDPOINTS]),
        (0x5C0 => @END),
    }
}

register_structs! {
    pub EndpointRegisters {
        (0x0 => bufseg: ReadWrite<u32, BUFSEG::Register>),
        (0x4 => mxpld: ReadWrite<u32, MXPLD::Register>),
        (0x8 => cfg: ReadWrite<u32, CFG::Register>),
        (0xC => cfgp: ReadWrite<u32, CFGP::Register>),
        (0x10 => @END),
    }
}

register_bitfields![u32,
    INTEN [
        BUSIEN OFFSET(0) NUMBITS(1) [],
        USBIEN OFFSET(1) NUMBITS(1) [],
        VBDETIEN OFFSET(2) NUMBITS(1) [],
        NEVWKIEN OFFSET(3) NUMBITS(1) [],
        SOFIEN OFFSET(4) NUMBITS(1) [],
        WKEN OFFSET(8) NUMBITS(1) [],
        INNAKEN OFFSET(15) NUMBITS(1) []
    ],
    INTSTS [
        BUSIF OFFSET(0) NUMBITS(1) [],
        USBIF OFFSET(1) NUMBITS(1) [],
        /// VBUS floating detect.
        VBDETIF OFFSET(2) NUMBITS(1) [],
        NEVWKIF OFFSET(3) NUMBITS(1) [],
        SOFIF OFFSET(4) NUMBITS(1) [],
        EPEVT OFFSET(16) NUMBITS(12) [],
        SETUP OFFSET(31) NUMBITS(1) []
    ],
    FADDR [
        FADDR OFFSET(0) NUMBITS(7) []
    ],
    ATTR [
        USBRST OFFSET(0) NUMBITS(1) [],
        SUSPEND OFFSET(1) NUMBITS(1) [],
        RESUME OFFSET(2) NUMBITS(1) [],
        TOUT OFFSET(3) NUMBITS(1) [],
        PHYEN OFFSET(4) NUMBITS(1) [],
        RWAKEUP OFFSET(5) NUMBITS(1) [],
        USBEN OFFSET(7) NUMBITS(1) [],
        DPPUEN OFFSET(8) NUMBITS(1) [],
        PWRDN OFFSET(9) NUMBITS(1) [],
        BYTEM OFFSET(10) NUMBITS(1) []
    ],
    VBUSDET [
        VBUSDET OFFSET(0) NUMBITS(1) []
    ],
    SE0 [
        SE0 OFFSET(0) NUMBITS(1) []
    ],
    /// Buffer offsets are in 8-byte units.
    BUFSEG [
        BUFSEG OFFSET(3) NUMBITS(6) []
    ],
    MXPLD [
        MXPLD OFFSET(0) NUMBITS(9) []
    ],
    CFG [
        EPNUM OFFSET(0) NUMBITS(4) [],
        ISOCH OFFSET(4) NUMBITS(1) [],
        STATE OFFSET(5) NUMBITS(2) [
            Disabled = 0,
            Out = 1,
            In = 2
        ],
        /// Next transaction uses DATA1.
        DSQSYNC OFFSET(7) NUMBITS(1) [],
        /// Clear the stall on the next SETUP token.
        CSTALL OFFSET(9) NUMBITS(1) []
    ],
    CFGP [
        CLRRDY OFFSET(0) NUMBITS(1) [],
        SSTALL OFFSET(1) NUMBITS(1) []
    ]
];

pub const USBD_BASE: StaticRef<UsbdRegisters> =
    unsafe { StaticRef::new(0x400C_0000 as *const UsbdRegisters) };

/// Packet SRAM offset of a hardware slot's buffer in the mass-storage layout.
pub const fn buffer_offset(endpoint: Endpoint) -> usize {
    match endpoint {
        EP_CTRL_IN | EP_CTRL_OUT => SETUP_BUFFER + SETUP_LEN,
        _ => SETUP_BUFFER + SETUP_LEN + (endpoint - 1) * EP_MAX_PACKET,
    }
}

/// One interrupt source, in the order [`Usbd::handle_interrupt`] serves them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Attach,
    Detach,
    BusReset,
    Suspend,
    Resume,
    Wakeup,
    Setup,
    Endpoint(Endpoint),
}

const MAX_PENDING: usize = 6 + N_ENDPOINTS;

fn flag(field: Field<u32, INTSTS::Register>) -> u32 {
    field.mask << field.shift
}

impl Interrupt {
    /// Write-one-to-clear mask acknowledging this source in INTSTS.
    pub fn ack_mask(self) -> u32 {
        match self {
            Interrupt::Attach | Interrupt::Detach => flag(INTSTS::VBDETIF),
            Interrupt::BusReset | Interrupt::Suspend | Interrupt::Resume => flag(INTSTS::BUSIF),
            Interrupt::Wakeup => flag(INTSTS::NEVWKIF),
            Interrupt::Setup => flag(INTSTS::SETUP),
            Interrupt::Endpoint(n) => 1 << (INTSTS::EPEVT.shift + n),
        }
    }
}

/// Split a snapshot of INTSTS and the bus state in ATTR into the interrupt
/// sources to serve.
pub fn decode_interrupt(
    status: LocalRegisterCopy<u32, INTSTS::Register>,
    bus: LocalRegisterCopy<u32, ATTR::Register>,
    vbus_present: bool,
) -> Vec<Interrupt, MAX_PENDING> {
    let mut pending = Vec::new();
    let mut push = |interrupt| {
        // Capacity covers every source at once.
        let _ = pending.push(interrupt);
    };

    if status.is_set(INTSTS::VBDETIF) {
        push(if vbus_present {
            Interrupt::Attach
        } else {
            Interrupt::Detach
        });
    }
    if status.is_set(INTSTS::BUSIF) {
        if bus.is_set(ATTR::USBRST) {
            push(Interrupt::BusReset);
        }
        if bus.is_set(ATTR::SUSPEND) {
            push(Interrupt::Suspend);
        }
        if bus.is_set(ATTR::RESUME) {
            push(Interrupt::Resume);
        }
    }
    if status.is_set(INTSTS::NEVWKIF) {
        push(Interrupt::Wakeup);
    }
    if status.is_set(INTSTS::USBIF) {
        if status.is_set(INTSTS::SETUP) {
            push(Interrupt::Setup);
        }
        let events = status.read(INTSTS::EPEVT);
        for n in 0..N_ENDPOINTS {
            if events & (1 << n) != 0 {
                push(Interrupt::Endpoint(n));
            }
        }
    }
    pending
}

/// Address carried by a standard SET_ADDRESS request.
fn set_address_request(packet: &[u8; SETUP_LEN]) -> Option<u8> {
    const STANDARD_TO_DEVICE: u8 = 0x00;
    const SET_ADDRESS: u8 = 0x05;
    match (packet[0], packet[1]) {
        (STANDARD_TO_DEVICE, SET_ADDRESS) => Some(packet[2] & 0x7F),
        _ => None,
    }
}

pub struct Usbd<'a, const N: usize> {
    registers: StaticRef<UsbdRegisters>,
    events: MapCell<EventProducer<'a, N>>,
    dropped_events: Cell<usize>,
    /// Address from SET_ADDRESS, waiting for its status stage.
    pending_address: OptionalCell<u8>,
}

impl<'a, const N: usize> Usbd<'a, N> {
    pub fn new(base: StaticRef<UsbdRegisters>) -> Self {
        Usbd {
            registers: base,
            events: MapCell::empty(),
            dropped_events: Cell::new(0),
            pending_address: OptionalCell::empty(),
        }
    }

    /// Give the controller the interrupt side of the event queue.
    pub fn set_event_producer(&self, producer: EventProducer<'a, N>) {
        self.events.put(producer);
    }

    /// Events lost because the queue was full.
    pub fn dropped_events(&self) -> usize {
        self.dropped_events.get()
    }

    /// Power up the PHY with the pull-up disconnected and lay out the
    /// endpoints. Pins and the 48 MHz USB clock are set up by the board.
    pub fn init(&self) {
        self.registers.attr.write(
            ATTR::BYTEM::SET
                + ATTR::PWRDN::SET
                + ATTR::DPPUEN::SET
                + ATTR::USBEN::SET
                + ATTR::PHYEN::SET,
        );
        // Hold the bus in SE0 until `start`.
        self.registers.se0.write(SE0::SE0::SET);
        self.registers.faddr.set(0);
        self.configure_msc_endpoints();
    }

    /// Enable interrupts and connect to the host.
    pub fn start(&self) {
        self.registers.intsts.set(u32::MAX);
        self.registers.inten.write(
            INTEN::BUSIEN::SET
                + INTEN::USBIEN::SET
                + INTEN::VBDETIEN::SET
                + INTEN::NEVWKIEN::SET
                + INTEN::WKEN::SET,
        );
        self.registers.se0.write(SE0::SE0::CLEAR);
    }

    /// Bind the hardware slots to the control pipe and the two bulk pipes of
    /// the mass-storage interface, and arm bulk OUT.
    pub fn configure_msc_endpoints(&self) {
        let regs = &*self.registers;
        regs.stbufseg
            .write(BUFSEG::BUFSEG.val((SETUP_BUFFER >> 3) as u32));

        let layout = [
            (EP_CTRL_IN, CFG::STATE::In + CFG::EPNUM.val(0) + CFG::CSTALL::SET),
            (EP_CTRL_OUT, CFG::STATE::Out + CFG::EPNUM.val(0) + CFG::CSTALL::SET),
            (EP_BULK_IN, CFG::STATE::In + CFG::EPNUM.val(MSC_ENDPOINT_NUMBER)),
            (EP_BULK_OUT, CFG::STATE::Out + CFG::EPNUM.val(MSC_ENDPOINT_NUMBER)),
        ];
        for (endpoint, cfg) in layout {
            regs.ep[endpoint].cfg.write(cfg);
            regs.ep[endpoint]
                .bufseg
                .write(BUFSEG::BUFSEG.val((buffer_offset(endpoint) >> 3) as u32));
        }
        self.endpoint_receive(EP_BULK_OUT);
    }

    fn set_address(&self, address: u8) {
        self.registers.faddr.write(FADDR::FADDR.val(address as u32));
    }

    fn setup_packet(&self) -> [u8; SETUP_LEN] {
        let mut packet = [0; SETUP_LEN];
        self.copy_from_sram(SETUP_BUFFER, &mut packet);
        packet
    }

    pub fn handle_interrupt(&self) {
        let regs = &*self.registers;
        let status = regs.intsts.extract();
        let bus = regs.attr.extract();
        let vbus_present = regs.vbusdet.is_set(VBUSDET::VBUSDET);

        for interrupt in decode_interrupt(status, bus, vbus_present) {
            regs.intsts.set(interrupt.ack_mask());
            let event = match interrupt {
                Interrupt::Attach => {
                    regs.attr.modify(ATTR::USBEN::SET + ATTR::PHYEN::SET);
                    UsbEvent::Attached
                }
                Interrupt::Detach => {
                    regs.attr.modify(ATTR::USBEN::CLEAR);
                    UsbEvent::Detached
                }
                Interrupt::BusReset => {
                    regs.attr.modify(ATTR::USBEN::SET + ATTR::PHYEN::SET);
                    self.reset_endpoints();
                    UsbEvent::BusReset
                }
                Interrupt::Suspend => {
                    regs.attr.modify(ATTR::PHYEN::CLEAR);
                    UsbEvent::Suspended
                }
                Interrupt::Resume => {
                    regs.attr.modify(ATTR::USBEN::SET + ATTR::PHYEN::SET);
                    UsbEvent::Resumed
                }
                Interrupt::Wakeup => UsbEvent::Wakeup,
                Interrupt::Setup => {
                    // A new SETUP cancels whatever the control pipe was doing.
                    self.endpoint_clear_ready(EP_CTRL_IN);
                    self.endpoint_clear_ready(EP_CTRL_OUT);
                    let packet = self.setup_packet();
                    if let Some(address) = set_address_request(&packet) {
                        self.pending_address.set(address);
                        self.ctrl_ack();
                    }
                    UsbEvent::Setup { packet }
                }
                Interrupt::Endpoint(EP_CTRL_IN) => {
                    self.pending_address.map(|address| self.set_address(*address));
                    self.pending_address.clear();
                    UsbEvent::ControlIn
                }
                Interrupt::Endpoint(EP_CTRL_OUT) => UsbEvent::ControlOut,
                Interrupt::Endpoint(endpoint) => {
                    let ep = &regs.ep[endpoint];
                    match ep.cfg.read_as_enum(CFG::STATE) {
                        Some(CFG::STATE::Value::In) => UsbEvent::PacketTransmitted { endpoint },
                        Some(CFG::STATE::Value::Out) => UsbEvent::PacketReceived {
                            endpoint,
                            length: ep.mxpld.read(MXPLD::MXPLD) as usize,
                        },
                        _ => continue,
                    }
                }
            };
            self.post(event);
        }
    }

    fn post(&self, event: UsbEvent) {
        self.events.map(|producer| {
            if producer.enqueue(event).is_err() {
                self.dropped_events.set(self.dropped_events.get() + 1);
                debug_warn!("usbd: event queue full, dropped {:?}", event);
            }
        });
    }

    /// Bus reset: back to address 0, DATA0 and no stall on every endpoint.
    fn reset_endpoints(&self) {
        let regs = &*self.registers;
        for ep in regs.ep.iter() {
            ep.cfg.modify(CFG::DSQSYNC::CLEAR);
            ep.cfgp.write(CFGP::CLRRDY::SET);
        }
        regs.faddr.set(0);
    }

    fn copy_to_sram(&self, offset: usize, data: &[u8]) {
        for (cell, byte) in self.registers.sram[offset..].iter().zip(data) {
            cell.set(*byte);
        }
    }

    fn copy_from_sram(&self, offset: usize, buf: &mut [u8]) {
        for (byte, cell) in buf.iter_mut().zip(self.registers.sram[offset..].iter()) {
            *byte = cell.get();
        }
    }

    /// Control data and status stages always start with DATA1.
    fn ctrl_in(&self, data: &[u8]) {
        let len = data.len().min(EP_MAX_PACKET);
        self.copy_to_sram(buffer_offset(EP_CTRL_IN), &data[..len]);
        let ep = &self.registers.ep[EP_CTRL_IN];
        ep.cfg.modify(CFG::DSQSYNC::SET);
        ep.mxpld.write(MXPLD::MXPLD.val(len as u32));
    }
}

impl<const N: usize> UsbController for Usbd<'_, N> {
    fn endpoint_max_packet_size(&self, _endpoint: Endpoint) -> usize {
        EP_MAX_PACKET
    }

    fn endpoint_write(&self, endpoint: Endpoint, packet: &[u8]) {
        let len = packet.len().min(EP_MAX_PACKET);
        self.copy_to_sram(buffer_offset(endpoint), &packet[..len]);
        // Writing the length hands the buffer to the controller.
        self.registers.ep[endpoint]
            .mxpld
            .write(MXPLD::MXPLD.val(len as u32));
    }

    fn endpoint_read(&self, endpoint: Endpoint, buf: &mut [u8]) -> usize {
        let received = self.registers.ep[endpoint].mxpld.read(MXPLD::MXPLD) as usize;
        let len = received.min(buf.len());
        self.copy_from_sram(buffer_offset(endpoint), &mut buf[..len]);
        len
    }

    fn endpoint_receive(&self, endpoint: Endpoint) {
        self.registers.ep[endpoint]
            .mxpld
            .write(MXPLD::MXPLD.val(EP_MAX_PACKET as u32));
    }

    fn endpoint_stall(&self, endpoint: Endpoint) {
        self.registers.ep[endpoint].cfgp.modify(CFGP::SSTALL::SET);
    }

    fn endpoint_clear_stall(&self, endpoint: Endpoint) {
        self.registers.ep[endpoint].cfgp.modify(CFGP::SSTALL::CLEAR);
    }

    fn endpoint_clear_ready(&self, endpoint: Endpoint) {
        self.registers.ep[endpoint].cfgp.modify(CFGP::CLRRDY::SET);
    }

    fn ctrl_respond(&self, data: &[u8]) {
        self.ctrl_in(data);
        // Status stage: zero-length OUT.
        let ep = &self.registers.ep[EP_CTRL_OUT];
        ep.cfg.modify(CFG::DSQSYNC::SET);
        ep.mxpld.write(MXPLD::MXPLD.val(0));
    }

    fn ctrl_ack(&self) {
        self.ctrl_in(&[]);
    }

    fn ctrl_stall(&self) {
        self.endpoint_stall(EP_CTRL_IN);
        self.endpoint_stall(EP_CTRL_OUT);
    }

    fn ctrl_stall_out(&self) {
        self.endpoint_stall(EP_CTRL_OUT);
    }
}
