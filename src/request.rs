//! SETUP packets

use crate::{Error, Result};
use usb_device::UsbDirection;

/// `bmRequestType` type field
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum RequestType {
    /// Request defined by the USB specification.
    Standard = 0,
    /// Request defined by a class specification.
    Class = 1,
    /// Request defined by the device vendor.
    Vendor = 2,
}

/// `bmRequestType` recipient field
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Recipient {
    /// The device.
    Device = 0,
    /// An interface; `wIndex` low byte is the interface number.
    Interface = 1,
    /// An endpoint; `wIndex` low byte is the endpoint address.
    Endpoint = 2,
    /// Other.
    Other = 3,
}

/// Standard request codes
pub mod standard {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;
    pub const SYNCH_FRAME: u8 = 12;
}

/// Standard feature selectors
pub mod feature {
    pub const ENDPOINT_HALT: u16 = 0;
    pub const DEVICE_REMOTE_WAKEUP: u16 = 1;
}

/// A parsed SETUP packet
///
/// Produced once per control transfer, and never modified.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Request {
    /// Data stage direction; also used when there's no data stage.
    pub direction: UsbDirection,
    pub request_type: RequestType,
    pub recipient: Recipient,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// `wLength`; the most data the host authorized for the data stage.
    pub length: u16,
}

impl Request {
    /// Parse the eight SETUP bytes
    ///
    /// Fails on short input, and on reserved type or recipient values.
    pub fn parse(buf: &[u8]) -> Result<Request> {
        let setup: &[u8; 8] = buf
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::InvalidSetup)?;
        let rt = setup[0];

        let direction = if rt & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        };
        let request_type = match (rt >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => return Err(Error::InvalidSetup),
        };
        let recipient = match rt & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => return Err(Error::InvalidSetup),
        };

        Ok(Request {
            direction,
            request_type,
            recipient,
            request: setup[1],
            value: u16::from_le_bytes([setup[2], setup[3]]),
            index: u16::from_le_bytes([setup[4], setup[5]]),
            length: u16::from_le_bytes([setup[6], setup[7]]),
        })
    }

    /// Encode the request as it appears on the wire
    pub fn to_bytes(&self) -> [u8; 8] {
        let rt = ((self.direction == UsbDirection::In) as u8) << 7
            | (self.request_type as u8) << 5
            | self.recipient as u8;
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [
            rt,
            self.request,
            value_lo,
            value_hi,
            index_lo,
            index_hi,
            length_lo,
            length_hi,
        ]
    }

    /// The `wValue` high byte; the descriptor type for GET_DESCRIPTOR
    pub fn value_high(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// The `wValue` low byte; the descriptor index for GET_DESCRIPTOR
    pub fn value_low(&self) -> u8 {
        self.value as u8
    }

    /// The `wIndex` low byte; the interface number or endpoint address
    pub fn index_low(&self) -> u8 {
        self.index as u8
    }

    /// Shorthand for a standard request check
    pub fn is_standard(&self, request: u8) -> bool {
        self.request_type == RequestType::Standard && self.request == request
    }
}
