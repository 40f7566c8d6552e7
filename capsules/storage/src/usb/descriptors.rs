// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! USB 2.0 control-plane types: SETUP packet decoding and the standard
//! descriptors a full-speed mass storage device reports during enumeration.

use kernel::hil::usb::TransferType;

/// The data structure sent in a SETUP handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetupData {
    pub request_type: DeviceRequestType,
    pub request_code: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupData {
    /// Decode the 8-byte SETUP packet. `None` if `p` is short.
    pub fn get(p: &[u8]) -> Option<Self> {
        if p.len() < 8 {
            return None;
        }
        Some(SetupData {
            request_type: DeviceRequestType(p[0]),
            request_code: p[1],
            value: u16::from_le_bytes([p[2], p[3]]),
            index: u16::from_le_bytes([p[4], p[5]]),
            length: u16::from_le_bytes([p[6], p[7]]),
        })
    }

    /// Serialize for transmission, as a host would send it.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut p = [0; 8];
        p[0] = self.request_type.0;
        p[1] = self.request_code;
        p[2..4].copy_from_slice(&self.value.to_le_bytes());
        p[4..6].copy_from_slice(&self.index.to_le_bytes());
        p[6..8].copy_from_slice(&self.length.to_le_bytes());
        p
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 1,
    Configuration,
    String,
    Interface,
    Endpoint,
}

/// `bmRequestType` of a SETUP packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceRequestType(pub u8);

impl DeviceRequestType {
    pub fn transfer_direction(self) -> TransferDirection {
        match self.0 & (1 << 7) {
            0 => TransferDirection::HostToDevice,
            _ => TransferDirection::DeviceToHost,
        }
    }

    pub fn request_type(self) -> RequestType {
        match (self.0 & (0b11 << 5)) >> 5 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(self) -> Recipient {
        match self.0 & 0b11111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

pub trait Descriptor {
    /// `bLength`, plus any trailing descriptors counted in the total.
    fn size(&self) -> usize;

    /// Returns the number of bytes written, 0 if `buf` is too short.
    fn write_to(&self, buf: &mut [u8]) -> usize {
        if self.size() > buf.len() {
            0
        } else {
            self.write_to_unchecked(buf)
        }
    }

    /// Caller guarantees `buf.len() >= self.size()`.
    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize;
}

pub struct DeviceDescriptor {
    /// BCD, 0x0200 for USB 2.0.
    pub usb_release: u16,

    /// Zero: the class is declared per interface.
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,

    /// 8, 16, 32 or 64.
    pub max_packet_size_ep0: u8,

    pub vendor_id: u16,
    pub product_id: u16,

    /// BCD.
    pub device_release: u16,

    /// String descriptor indices, 0 for none.
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_number_string: u8,

    pub num_configurations: u8,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        DeviceDescriptor {
            usb_release: 0x0200,
            class: 0,
            subclass: 0,
            protocol: 0,
            max_packet_size_ep0: 64,
            vendor_id: 0x0416,
            product_id: 0xB005,
            device_release: 0x0100,
            manufacturer_string: 1,
            product_string: 2,
            serial_number_string: 3,
            num_configurations: 1,
        }
    }
}

impl Descriptor for DeviceDescriptor {
    fn size(&self) -> usize {
        18
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        buf[0] = 18; // Size of descriptor
        buf[1] = DescriptorType::Device as u8;
        buf[2..4].copy_from_slice(&self.usb_release.to_le_bytes());
        buf[4] = self.class;
        buf[5] = self.subclass;
        buf[6] = self.protocol;
        buf[7] = self.max_packet_size_ep0;
        buf[8..10].copy_from_slice(&self.vendor_id.to_le_bytes());
        buf[10..12].copy_from_slice(&self.product_id.to_le_bytes());
        buf[12..14].copy_from_slice(&self.device_release.to_le_bytes());
        buf[14] = self.manufacturer_string;
        buf[15] = self.product_string;
        buf[16] = self.serial_number_string;
        buf[17] = self.num_configurations;
        18
    }
}

pub struct ConfigurationDescriptor {
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub string_index: u8,
    pub attributes: ConfigurationAttributes,
    pub max_power: u8, // in 2mA units
    pub related_descriptor_length: usize,
}

impl Default for ConfigurationDescriptor {
    fn default() -> Self {
        ConfigurationDescriptor {
            num_interfaces: 1,
            configuration_value: 1,
            string_index: 0,
            attributes: ConfigurationAttributes::new(true, false),
            max_power: 0x64,
            related_descriptor_length: 0,
        }
    }
}

impl Descriptor for ConfigurationDescriptor {
    fn size(&self) -> usize {
        9
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        buf[0] = 9; // Size of descriptor
        buf[1] = DescriptorType::Configuration as u8;
        let total = (9 + self.related_descriptor_length) as u16;
        buf[2..4].copy_from_slice(&total.to_le_bytes());
        buf[4] = self.num_interfaces;
        buf[5] = self.configuration_value;
        buf[6] = self.string_index;
        buf[7] = self.attributes.into();
        buf[8] = self.max_power;
        9
    }
}

#[derive(Copy, Clone)]
pub struct ConfigurationAttributes(u8);

impl ConfigurationAttributes {
    pub fn new(is_self_powered: bool, supports_remote_wakeup: bool) -> Self {
        ConfigurationAttributes(
            (1 << 7)
                | if is_self_powered { 1 << 6 } else { 0 }
                | if supports_remote_wakeup { 1 << 5 } else { 0 },
        )
    }
}

impl From<ConfigurationAttributes> for u8 {
    fn from(ca: ConfigurationAttributes) -> u8 {
        ca.0
    }
}

pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub string_index: u8,
}

impl Descriptor for InterfaceDescriptor {
    fn size(&self) -> usize {
        9
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        buf[0] = 9; // Size of descriptor
        buf[1] = DescriptorType::Interface as u8;
        buf[2] = self.interface_number;
        buf[3] = self.alternate_setting;
        buf[4] = self.num_endpoints;
        buf[5] = self.interface_class;
        buf[6] = self.interface_subclass;
        buf[7] = self.interface_protocol;
        buf[8] = self.string_index;
        9
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    pub const fn new_const(endpoint: usize, direction: TransferDirection) -> Self {
        EndpointAddress(endpoint as u8 & 0xf | (direction as u8) << 7)
    }

    pub fn number(self) -> usize {
        (self.0 & 0xf) as usize
    }
}

pub struct EndpointDescriptor {
    pub endpoint_address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    // Poll for device data every `interval` frames
    pub interval: u8,
}

impl Descriptor for EndpointDescriptor {
    fn size(&self) -> usize {
        7
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        let len = self.size();
        buf[0] = len as u8;
        buf[1] = DescriptorType::Endpoint as u8;
        buf[2] = self.endpoint_address.0;
        // The below implicitly sets Synchronization Type to "No Synchronization" and
        // Usage Type to "Data endpoint"
        buf[3] = self.transfer_type as u8;
        buf[4..6].copy_from_slice(&(self.max_packet_size & 0x7ff).to_le_bytes());
        buf[6] = self.interval;
        len
    }
}

pub struct LanguagesDescriptor<'a> {
    pub langs: &'a [u16],
}

impl Descriptor for LanguagesDescriptor<'_> {
    fn size(&self) -> usize {
        2 + (2 * self.langs.len())
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        let len = self.size();
        buf[0] = len as u8;
        buf[1] = DescriptorType::String as u8;
        for (chunk, lang) in buf[2..len].chunks_exact_mut(2).zip(self.langs) {
            chunk.copy_from_slice(&lang.to_le_bytes());
        }
        len
    }
}

pub struct StringDescriptor<'a> {
    pub string: &'a str,
}

impl Descriptor for StringDescriptor<'_> {
    fn size(&self) -> usize {
        2 + self.string.encode_utf16().count() * 2
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        buf[1] = DescriptorType::String as u8;
        let mut i = 2;
        for w in self.string.encode_utf16() {
            buf[i..i + 2].copy_from_slice(&w.to_le_bytes());
            i += 2;
        }
        buf[0] = i as u8;
        i
    }
}

/// USB class code of mass storage interfaces.
pub const MSC_CLASS: u8 = 0x08;
/// SCSI transparent command set.
pub const MSC_SUBCLASS_SCSI: u8 = 0x06;
/// Bulk-Only Transport.
pub const MSC_PROTOCOL_BOT: u8 = 0x50;

const LANGUAGES: &[u16; 1] = &[0x0409]; // English (United States)

/// Configuration descriptor plus the interface and both endpoints.
pub const MSC_CONFIGURATION_LEN: usize = 9 + 9 + 7 + 7;

/// Descriptor set of a device with a single mass storage interface.
///
/// The controller's standard request handler serves GET_DESCRIPTOR from
/// these buffers.
pub struct MscDescriptors {
    pub device: [u8; 18],
    pub configuration: [u8; MSC_CONFIGURATION_LEN],
    strings: [&'static str; 3],
}

impl MscDescriptors {
    /// Build the descriptors. `bulk_in` and `bulk_out` are endpoint numbers.
    pub fn new(
        device_descriptor: DeviceDescriptor,
        strings: [&'static str; 3],
        bulk_in: usize,
        bulk_out: usize,
        max_packet_size: u16,
    ) -> Self {
        let mut device = [0; 18];
        device_descriptor.write_to(&mut device);

        let interface = InterfaceDescriptor {
            interface_number: 0,
            alternate_setting: 0,
            num_endpoints: 2,
            interface_class: MSC_CLASS,
            interface_subclass: MSC_SUBCLASS_SCSI,
            interface_protocol: MSC_PROTOCOL_BOT,
            string_index: 0,
        };
        let endpoints = [
            EndpointDescriptor {
                endpoint_address: EndpointAddress::new_const(
                    bulk_in,
                    TransferDirection::DeviceToHost,
                ),
                transfer_type: TransferType::Bulk,
                max_packet_size,
                interval: 0,
            },
            EndpointDescriptor {
                endpoint_address: EndpointAddress::new_const(
                    bulk_out,
                    TransferDirection::HostToDevice,
                ),
                transfer_type: TransferType::Bulk,
                max_packet_size,
                interval: 0,
            },
        ];
        let configuration_descriptor = ConfigurationDescriptor {
            related_descriptor_length: interface.size()
                + endpoints.iter().map(|d| d.size()).sum::<usize>(),
            ..Default::default()
        };

        let mut configuration = [0; MSC_CONFIGURATION_LEN];
        let mut len = configuration_descriptor.write_to(&mut configuration);
        len += interface.write_to(&mut configuration[len..]);
        for endpoint in endpoints.iter() {
            len += endpoint.write_to(&mut configuration[len..]);
        }

        MscDescriptors {
            device,
            configuration,
            strings,
        }
    }

    /// Serialize string descriptor `index` into `buf`. Index 0 is the
    /// language table. Returns `None` for unknown indices.
    pub fn string(&self, index: u8, buf: &mut [u8]) -> Option<usize> {
        match index {
            0 => Some(LanguagesDescriptor { langs: LANGUAGES }.write_to(buf)),
            i => self
                .strings
                .get(i as usize - 1)
                .map(|s| StringDescriptor { string: s }.write_to(buf)),
        }
    }
}

impl Default for MscDescriptors {
    fn default() -> Self {
        MscDescriptors::new(
            DeviceDescriptor::default(),
            ["Nuvoton", "USB Device", "A000008040115"],
            1,
            1,
            64,
        )
    }
}
