//! Device controller driver (DCD) interface
//!
//! The stack drives the USB controller exclusively through [`Dcd`]. An
//! implementation wraps one controller's registers: it opens endpoints,
//! moves bytes between endpoint memory and the stack, and reports
//! completions by posting [`Event`](crate::Event)s from its interrupt
//! handler.
//!
//! The stack never asks the controller to wait. Every transfer is
//! asynchronous; its completion arrives later as an
//! [`Event::XferComplete`](crate::Event::XferComplete).

use crate::descriptor::EndpointDescriptor;
use usb_device::endpoint::EndpointAddress;

/// USB low / full / high speed setting.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Speed {
    /// Low speed.
    Low,
    /// Full speed.
    #[default]
    Full,
    /// High speed.
    High,
}

/// The result of a completed transfer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum XferResult {
    /// The transfer completed.
    Success,
    /// The controller reported a transaction or bus error.
    Failed,
    /// The endpoint was stalled while the transfer was queued.
    Stalled,
}

/// A USB device controller
///
/// # Transfers
///
/// IN transfers copy the caller's bytes into endpoint memory before
/// [`edpt_xfer_in`](Dcd::edpt_xfer_in) returns, so the caller's buffer
/// is free as soon as the call returns. OUT transfers are armed with
/// [`edpt_xfer_out`](Dcd::edpt_xfer_out); once the completion event is
/// delivered, the stack copies the data out with [`edpt_read`](Dcd::edpt_read).
///
/// An implementation must deliver completion events for one endpoint in
/// the order their transfers were queued.
///
/// # Control endpoint
///
/// EP0 is always open. A SETUP packet is delivered as an
/// [`Event::Setup`](crate::Event::Setup) carrying the raw eight bytes, and
/// supersedes any transfer still queued on EP0.
pub trait Dcd {
    /// Set the device address
    ///
    /// The stack calls this once the SET_ADDRESS status stage completed,
    /// unless [`set_address_before_status`](Dcd::set_address_before_status)
    /// returns `true`.
    fn set_address(&mut self, address: u8);

    /// Indicates that the controller can accept the address before the
    /// SET_ADDRESS status stage
    ///
    /// Return `true` if the hardware defers the address change until the
    /// status stage is acknowledged by itself. The stack then calls
    /// [`set_address`](Dcd::set_address) while handling the request.
    fn set_address_before_status(&self) -> bool {
        false
    }

    /// Open a non-control endpoint described by `descriptor`
    ///
    /// Returns `false` if the controller can't support the endpoint.
    fn edpt_open(&mut self, descriptor: &EndpointDescriptor) -> bool;

    /// Close all non-control endpoints, and cancel their transfers
    fn edpt_close_all(&mut self);

    /// Queue an IN transfer of `data`
    ///
    /// An empty `data` queues a zero-length packet. Returns `false` if the
    /// transfer couldn't be queued.
    fn edpt_xfer_in(&mut self, ep: EndpointAddress, data: &[u8]) -> bool;

    /// Arm an OUT transfer of up to `len` bytes
    ///
    /// A `len` of zero arms a zero-length packet, as used by control status
    /// stages. Returns `false` if the transfer couldn't be queued.
    fn edpt_xfer_out(&mut self, ep: EndpointAddress, len: usize) -> bool;

    /// Copy the data received by the last completed OUT transfer into `buffer`
    ///
    /// Returns the number of bytes copied.
    fn edpt_read(&mut self, ep: EndpointAddress, buffer: &mut [u8]) -> usize;

    /// Stall an endpoint
    fn edpt_stall(&mut self, ep: EndpointAddress);

    /// Clear an endpoint stall, and reset its data toggle
    fn edpt_clear_stall(&mut self, ep: EndpointAddress);

    /// Indicates if the endpoint is stalled
    fn edpt_is_stalled(&self, ep: EndpointAddress) -> bool;

    /// Signal remote wakeup to the host
    fn remote_wakeup(&mut self) {}
}
