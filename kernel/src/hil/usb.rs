// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface to USB device controller hardware.
//!
//! The controller's interrupt handler does not call into class drivers
//! directly. It acknowledges the hardware, then posts a [`UsbEvent`] into a
//! single-producer single-consumer [`EventQueue`]. Class drivers drain the
//! queue from thread context and respond through [`UsbController`].

use heapless::spsc;

/// Endpoint numbers used by this interface are hardware endpoint slots, not
/// USB endpoint addresses.
pub type Endpoint = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Events reported by the controller interrupt handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsbEvent {
    /// VBUS appeared; the controller has been enabled.
    Attached,
    /// VBUS went away; the controller has been disabled.
    Detached,
    /// The host reset the bus.
    BusReset,
    Suspended,
    Resumed,
    /// A remote wakeup event was signalled.
    Wakeup,
    /// A SETUP packet arrived. A standard SET_ADDRESS has already been
    /// answered by the controller.
    Setup { packet: [u8; 8] },
    /// The control IN data or status stage finished.
    ControlIn,
    /// A control OUT packet arrived.
    ControlOut,
    /// An IN packet queued on `endpoint` was collected by the host.
    PacketTransmitted { endpoint: Endpoint },
    /// An OUT packet of `length` bytes arrived on `endpoint`.
    PacketReceived { endpoint: Endpoint, length: usize },
}

/// Event queue with room for `N - 1` pending events.
pub type EventQueue<const N: usize> = spsc::Queue<UsbEvent, N>;
/// Interrupt side of an [`EventQueue`].
pub type EventProducer<'a, const N: usize> = spsc::Producer<'a, UsbEvent, N>;
/// Thread side of an [`EventQueue`].
pub type EventConsumer<'a, const N: usize> = spsc::Consumer<'a, UsbEvent, N>;

/// Endpoint operations a class driver needs from the controller.
pub trait UsbController {
    /// Maximum packet size configured for `endpoint`.
    fn endpoint_max_packet_size(&self, endpoint: Endpoint) -> usize;

    /// Queue `packet` for transmission on IN `endpoint`. An empty slice sends
    /// a zero-length packet.
    fn endpoint_write(&self, endpoint: Endpoint, packet: &[u8]);

    /// Copy the last packet received on OUT `endpoint` into `buf`. Returns the
    /// number of bytes copied.
    fn endpoint_read(&self, endpoint: Endpoint, buf: &mut [u8]) -> usize;

    /// Make OUT `endpoint` ready to accept the next packet.
    fn endpoint_receive(&self, endpoint: Endpoint);

    /// Respond to every further token on `endpoint` with STALL.
    fn endpoint_stall(&self, endpoint: Endpoint);

    fn endpoint_clear_stall(&self, endpoint: Endpoint);

    /// Drop any packet that is armed on `endpoint` but not yet transferred.
    fn endpoint_clear_ready(&self, endpoint: Endpoint);

    /// Send `data` as the data stage of the current control transfer and
    /// prepare the status stage.
    fn ctrl_respond(&self, data: &[u8]);

    /// Complete a control transfer without data stage with a zero-length
    /// status packet.
    fn ctrl_ack(&self);

    /// Abort the current control transfer with STALL.
    fn ctrl_stall(&self);

    /// Stall only the control OUT direction. Used to refuse a request whose
    /// parameters are invalid.
    fn ctrl_stall_out(&self);
}
