//! A USB device stack, independent of the USB controller
//!
//! `usbd-stack` implements the device side of USB: enumeration, the control
//! transfer state machine, standard request handling, and the routing of
//! interfaces and endpoints to class drivers. It ships a Bulk-Only
//! Transport mass storage class ([`msc`]), and small HID ([`hid`]),
//! CDC-ACM ([`cdc`]), and vendor ([`vendor`]) classes.
//!
//! The stack never touches hardware. To port it to a USB controller,
//! implement [`Dcd`], and post the controller's interrupts as [`Event`]s.
//!
//! # Running the stack
//!
//! Events flow one way: the controller's interrupt handler pushes them onto
//! an [`IsrQueue`], and a single task drains that queue into the [`Device`]
//! with [`Device::poll`]. Class drivers run inside that task (and only
//! there), so they never race each other, or the interrupt handler.
//!
//! ```no_run
//! use usbd_stack::{
//!     msc::{
//!         scsi::{Capacity, InquiryFields, Sense},
//!         Msc, MscApp,
//!     },
//!     Descriptors, Device, IsrQueue,
//! };
//! # use usbd_stack::{descriptor::EndpointDescriptor, Dcd};
//! # use usb_device::endpoint::EndpointAddress;
//! # struct Controller;
//! # impl Dcd for Controller {
//! #     fn set_address(&mut self, _: u8) {}
//! #     fn edpt_open(&mut self, _: &EndpointDescriptor) -> bool { true }
//! #     fn edpt_close_all(&mut self) {}
//! #     fn edpt_xfer_in(&mut self, _: EndpointAddress, _: &[u8]) -> bool { true }
//! #     fn edpt_xfer_out(&mut self, _: EndpointAddress, _: usize) -> bool { true }
//! #     fn edpt_read(&mut self, _: EndpointAddress, _: &mut [u8]) -> usize { 0 }
//! #     fn edpt_stall(&mut self, _: EndpointAddress) {}
//! #     fn edpt_clear_stall(&mut self, _: EndpointAddress) {}
//! #     fn edpt_is_stalled(&self, _: EndpointAddress) -> bool { false }
//! # }
//!
//! struct Disk([u8; 16 * 512]);
//!
//! impl MscApp for Disk {
//!     fn inquiry(&mut self, _: u8) -> InquiryFields {
//!         InquiryFields::new("ACME", "Flash disk", "1.0")
//!     }
//!     fn capacity(&mut self, _: u8) -> Capacity {
//!         Capacity { block_count: 16, block_size: 512 }
//!     }
//!     fn read10(
//!         &mut self,
//!         _: u8,
//!         lba: u32,
//!         offset: u32,
//!         buffer: &mut [u8],
//!     ) -> Result<usize, Sense> {
//!         let start = (lba * 512 + offset) as usize;
//!         let data = self.0.get(start..start + buffer.len()).ok_or(Sense::LBA_OUT_OF_RANGE)?;
//!         buffer.copy_from_slice(data);
//!         Ok(buffer.len())
//!     }
//!     fn write10(&mut self, _: u8, lba: u32, offset: u32, data: &[u8]) -> Result<usize, Sense> {
//!         let start = (lba * 512 + offset) as usize;
//!         let blocks = self.0.get_mut(start..start + data.len()).ok_or(Sense::LBA_OUT_OF_RANGE)?;
//!         blocks.copy_from_slice(data);
//!         Ok(data.len())
//!     }
//!     fn scsi(&mut self, _: u8, _: &[u8; 16], _: &mut [u8]) -> Result<usize, Sense> {
//!         Err(Sense::INVALID_COMMAND)
//!     }
//! }
//!
//! static DEVICE: [u8; 18] = [
//!     18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x09, 0x12, 0x01, 0x00, 0x00, 0x01, 1, 2, 3, 1,
//! ];
//! static CONFIG: [u8; 32] = [
//!     9, 2, 32, 0, 1, 1, 0, 0x80, 50,
//!     9, 4, 0, 0, 2, 0x08, 0x06, 0x50, 0,
//!     7, 5, 0x81, 0x02, 0x00, 0x02, 0,
//!     7, 5, 0x01, 0x02, 0x00, 0x02, 0,
//! ];
//! static CONFIGS: [&[u8]; 1] = [&CONFIG];
//!
//! // The USB interrupt handler pushes onto this queue.
//! static EVENTS: IsrQueue = IsrQueue::new();
//!
//! let mut controller = Controller;
//! let mut device: Device = Device::new(Descriptors::new(&DEVICE, &CONFIGS));
//! let mut disk: Msc<Disk> = Msc::new(Disk([0; 16 * 512]));
//!
//! loop {
//!     device.poll(&mut controller, &EVENTS, &mut [&mut disk]);
//! }
//! ```
//!
//! # Features
//!
//! - `defmt-03` logs through `defmt` 0.3.
//! - `__log` logs through `log`. It's hidden, since a logger that itself uses
//!   USB would deadlock the stack.

#![no_std]

#[macro_use]
mod log;

pub mod cdc;
pub mod class;
pub mod control;
pub mod dcd;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod event;
pub mod hid;
pub mod msc;
pub mod request;
pub mod vendor;

#[cfg(test)]
mod mock;

pub use class::{Class, ControlReply, Context};
pub use dcd::{Dcd, Speed, XferResult};
pub use descriptor::Descriptors;
pub use device::Device;
pub use error::{Error, Result};
pub use event::{Completion, Event, EventQueue, IsrQueue};
pub use request::Request;

/// Interface numbers the stack can route, `0..MAX_INTERFACES`
pub const MAX_INTERFACES: usize = 16;

/// Endpoint indexes the stack can route, `0..MAX_ENDPOINTS`, in each direction
pub const MAX_ENDPOINTS: usize = 16;

/// Largest control transfer DATA stage that goes through the control buffer
///
/// Descriptors are sent in place, and aren't limited by this size.
pub const CONTROL_BUFFER_SIZE: usize = 256;
