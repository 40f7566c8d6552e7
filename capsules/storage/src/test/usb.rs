// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

use std::cell::RefCell;

use kernel::hil::usb::{Endpoint, UsbController};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum UsbAction {
    Write(Endpoint, Vec<u8>),
    Receive(Endpoint),
    Stall(Endpoint),
    ClearStall(Endpoint),
    ClearReady(Endpoint),
    CtrlRespond(Vec<u8>),
    CtrlAck,
    CtrlStall,
    CtrlStallOut,
}

/// Controller that records what a class driver asks of it.
pub(crate) struct MockUsb {
    actions: RefCell<Vec<UsbAction>>,
    /// IN packets not yet collected by `take_writes`.
    writes: RefCell<Vec<(Endpoint, Vec<u8>)>>,
    out_packet: RefCell<Vec<u8>>,
}

impl MockUsb {
    pub(crate) fn new() -> MockUsb {
        MockUsb {
            actions: RefCell::new(Vec::new()),
            writes: RefCell::new(Vec::new()),
            out_packet: RefCell::new(Vec::new()),
        }
    }

    /// Place a packet in the OUT buffer as if the host had sent it.
    pub(crate) fn load_out_packet(&self, packet: &[u8]) {
        *self.out_packet.borrow_mut() = packet.to_vec();
    }

    pub(crate) fn take_writes(&self, endpoint: Endpoint) -> Vec<Vec<u8>> {
        let mut writes = self.writes.borrow_mut();
        let (taken, kept): (Vec<_>, Vec<_>) =
            writes.drain(..).partition(|(ep, _)| *ep == endpoint);
        *writes = kept;
        taken.into_iter().map(|(_, packet)| packet).collect()
    }

    pub(crate) fn actions(&self) -> Vec<UsbAction> {
        self.actions.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.actions.borrow_mut().clear();
        self.writes.borrow_mut().clear();
    }

    fn record(&self, action: UsbAction) {
        self.actions.borrow_mut().push(action);
    }
}

impl UsbController for MockUsb {
    fn endpoint_max_packet_size(&self, _endpoint: Endpoint) -> usize {
        64
    }

    fn endpoint_write(&self, endpoint: Endpoint, packet: &[u8]) {
        self.record(UsbAction::Write(endpoint, packet.to_vec()));
        self.writes.borrow_mut().push((endpoint, packet.to_vec()));
    }

    fn endpoint_read(&self, _endpoint: Endpoint, buf: &mut [u8]) -> usize {
        let packet = self.out_packet.borrow();
        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        len
    }

    fn endpoint_receive(&self, endpoint: Endpoint) {
        self.record(UsbAction::Receive(endpoint));
    }

    fn endpoint_stall(&self, endpoint: Endpoint) {
        self.record(UsbAction::Stall(endpoint));
    }

    fn endpoint_clear_stall(&self, endpoint: Endpoint) {
        self.record(UsbAction::ClearStall(endpoint));
    }

    fn endpoint_clear_ready(&self, endpoint: Endpoint) {
        self.record(UsbAction::ClearReady(endpoint));
    }

    fn ctrl_respond(&self, data: &[u8]) {
        self.record(UsbAction::CtrlRespond(data.to_vec()));
    }

    fn ctrl_ack(&self) {
        self.record(UsbAction::CtrlAck);
    }

    fn ctrl_stall(&self) {
        self.record(UsbAction::CtrlStall);
    }

    fn ctrl_stall_out(&self) {
        self.record(UsbAction::CtrlStallOut);
    }
}
