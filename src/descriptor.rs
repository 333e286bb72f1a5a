//! Descriptor walking, and the application's descriptor tables
//!
//! The stack never builds descriptors. The application supplies them, already
//! encoded, in a [`Descriptors`] table. The stack reads the few fields it
//! needs: EP0's max packet size, configuration attributes, and the
//! interface and endpoint descriptors it hands to class drivers.

use crate::{Error, Result};
use usb_device::endpoint::{EndpointAddress, EndpointType};

/// Descriptor type codes
pub mod kind {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const DEVICE_QUALIFIER: u8 = 0x06;
    pub const OTHER_SPEED_CONFIGURATION: u8 = 0x07;
    pub const INTERFACE_ASSOCIATION: u8 = 0x0B;
    pub const BOS: u8 = 0x0F;
    pub const HID: u8 = 0x21;
    pub const HID_REPORT: u8 = 0x22;
    pub const CS_INTERFACE: u8 = 0x24;
}

const DEVICE_LEN: usize = 18;
const CONFIGURATION_LEN: usize = 9;
const INTERFACE_LEN: usize = 9;
const ENDPOINT_LEN: usize = 7;

bitflags::bitflags! {
    /// Configuration descriptor `bmAttributes`
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ConfigAttributes: u8 {
        /// Bit 7 is reserved, and always set.
        const RESERVED = 1 << 7;
        const SELF_POWERED = 1 << 6;
        const REMOTE_WAKEUP = 1 << 5;
    }
}

/// Iterates over the `bLength`-prefixed descriptors in a byte slice
///
/// Iteration stops at the first descriptor with an invalid length.
#[derive(Clone)]
pub struct DescriptorIter<'a> {
    bytes: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        DescriptorIter { bytes }
    }

    /// Returns the bytes that haven't been iterated
    pub fn remaining(&self) -> &'a [u8] {
        self.bytes
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = &'a [u8];
    fn next(&mut self) -> Option<&'a [u8]> {
        let len = *self.bytes.first()? as usize;
        if len < 2 || len > self.bytes.len() {
            self.bytes = &[];
            return None;
        }
        let (desc, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Some(desc)
    }
}

/// Returns the `bDescriptorType` of a raw descriptor
pub fn descriptor_type(desc: &[u8]) -> Option<u8> {
    desc.get(1).copied()
}

/// The fixed part of a configuration descriptor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConfigurationDescriptor {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub value: u8,
    pub attributes: ConfigAttributes,
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub fn parse(desc: &[u8]) -> Result<Self> {
        if desc.len() < CONFIGURATION_LEN
            || (desc[1] != kind::CONFIGURATION && desc[1] != kind::OTHER_SPEED_CONFIGURATION)
        {
            return Err(Error::InvalidDescriptor);
        }
        Ok(ConfigurationDescriptor {
            total_length: u16::from_le_bytes([desc[2], desc[3]]),
            num_interfaces: desc[4],
            value: desc[5],
            attributes: ConfigAttributes::from_bits_retain(desc[7]),
            max_power: desc[8],
        })
    }
}

/// An interface descriptor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
}

impl InterfaceDescriptor {
    pub fn parse(desc: &[u8]) -> Result<Self> {
        if desc.len() < INTERFACE_LEN || desc[1] != kind::INTERFACE {
            return Err(Error::InvalidDescriptor);
        }
        Ok(InterfaceDescriptor {
            number: desc[2],
            alternate_setting: desc[3],
            num_endpoints: desc[4],
            class: desc[5],
            subclass: desc[6],
            protocol: desc[7],
            string_index: desc[8],
        })
    }
}

/// An endpoint descriptor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub ep_type: EndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Parse an endpoint descriptor
    ///
    /// Isochronous endpoints aren't supported, and return
    /// [`Error::UnsupportedInterface`].
    pub fn parse(desc: &[u8]) -> Result<Self> {
        if desc.len() < ENDPOINT_LEN || desc[1] != kind::ENDPOINT {
            return Err(Error::InvalidDescriptor);
        }
        let ep_type = match desc[3] & 0b11 {
            0 => EndpointType::Control,
            2 => EndpointType::Bulk,
            3 => EndpointType::Interrupt,
            _ => return Err(Error::UnsupportedInterface),
        };
        Ok(EndpointDescriptor {
            address: EndpointAddress::from(desc[2]),
            ep_type,
            max_packet_size: u16::from_le_bytes([desc[4], desc[5]]) & 0x7FF,
            interval: desc[6],
        })
    }
}

/// The application's descriptors
///
/// Every entry is a complete, encoded descriptor. Configuration entries
/// include all of their interface, class-specific, and endpoint descriptors
/// (the full `wTotalLength` bytes).
#[derive(Clone, Copy)]
pub struct Descriptors<'a> {
    /// The 18-byte device descriptor.
    pub device: &'a [u8],
    /// Configuration descriptors, in GET_DESCRIPTOR index order.
    pub configurations: &'a [&'a [u8]],
    /// String descriptors, indexed by string index. Index 0 is the LANGID table.
    pub strings: &'a [&'a [u8]],
    /// Device qualifier, for high-speed capable devices.
    pub device_qualifier: Option<&'a [u8]>,
    /// Other-speed configurations, in GET_DESCRIPTOR index order.
    pub other_speed_configurations: &'a [&'a [u8]],
    /// Binary Object Store, for USB 2.1 and later devices.
    pub bos: Option<&'a [u8]>,
}

impl<'a> Descriptors<'a> {
    /// Descriptors with only a device and configurations
    pub const fn new(device: &'a [u8], configurations: &'a [&'a [u8]]) -> Self {
        Descriptors {
            device,
            configurations,
            strings: &[],
            device_qualifier: None,
            other_speed_configurations: &[],
            bos: None,
        }
    }

    /// `bMaxPacketSize0` from the device descriptor
    ///
    /// Falls back to 8 if the device descriptor is too short.
    pub fn ep0_max_packet_size(&self) -> usize {
        match self.device.get(7) {
            Some(&mps) if mps > 0 => mps as usize,
            _ => 8,
        }
    }

    /// The device descriptor, limited to its 18 bytes
    pub fn device(&self) -> &'a [u8] {
        &self.device[..self.device.len().min(DEVICE_LEN)]
    }

    /// The configuration at GET_DESCRIPTOR `index`, limited to `wTotalLength`
    pub fn configuration(&self, index: u8) -> Option<&'a [u8]> {
        self.configurations
            .get(index as usize)
            .and_then(|desc| total_length(desc))
    }

    /// The configuration with `bConfigurationValue == value`
    pub fn configuration_by_value(&self, value: u8) -> Option<&'a [u8]> {
        self.configurations
            .iter()
            .filter_map(|desc| total_length(desc))
            .find(|desc| desc.get(5) == Some(&value))
    }

    /// The other-speed configuration at `index`
    pub fn other_speed_configuration(&self, index: u8) -> Option<&'a [u8]> {
        self.other_speed_configurations
            .get(index as usize)
            .and_then(|desc| total_length(desc))
    }

    /// A string descriptor, limited to its `bLength`
    pub fn string(&self, index: u8) -> Option<&'a [u8]> {
        self.strings.get(index as usize).and_then(|desc| own_length(desc))
    }

    /// The device qualifier, limited to its `bLength`
    pub fn device_qualifier(&self) -> Option<&'a [u8]> {
        self.device_qualifier.and_then(own_length)
    }

    /// The BOS descriptor, limited to its `wTotalLength`
    pub fn bos(&self) -> Option<&'a [u8]> {
        let bos = self.bos?;
        let total = u16::from_le_bytes([*bos.get(2)?, *bos.get(3)?]) as usize;
        Some(&bos[..bos.len().min(total)])
    }
}

fn total_length(desc: &[u8]) -> Option<&[u8]> {
    let header = ConfigurationDescriptor::parse(desc).ok()?;
    Some(&desc[..desc.len().min(header.total_length as usize)])
}

fn own_length(desc: &[u8]) -> Option<&[u8]> {
    let len = *desc.first()? as usize;
    Some(&desc[..desc.len().min(len)])
}
