//! Class driver registry
//!
//! Every USB class plugs into the stack through [`Class`]. The application
//! owns its class drivers, and passes them to each
//! [`Device::task`](crate::Device::task) call as a `&mut [&mut dyn Class]`.
//! The order of that slice is the registry order: when a configuration is
//! selected, each interface is offered to the drivers whose
//! [`interface_class`](Class::interface_class) matches, first to last.
//!
//! Drivers reach the controller only through a [`Context`].

use crate::{
    dcd::Dcd,
    descriptor::{EndpointDescriptor, InterfaceDescriptor},
    event::{Completion, Event, EventQueue},
    request::Request,
    Error, Result, MAX_ENDPOINTS,
};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Marks an unowned interface or endpoint
pub(crate) const NO_DRIVER: u8 = 0xFF;

pub(crate) fn dir_index(direction: UsbDirection) -> usize {
    match direction {
        UsbDirection::Out => 0,
        UsbDirection::In => 1,
    }
}

/// A class driver's answer to a control request
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ControlReply<'r> {
    /// Not handled. The stack stalls EP0.
    Reject,
    /// Handled, with no DATA stage.
    Status,
    /// Send these bytes in the DATA stage.
    ///
    /// The bytes are clamped to `wLength`, then copied into the control
    /// buffer. What's left may not exceed [`CONTROL_BUFFER_SIZE`](crate::CONTROL_BUFFER_SIZE).
    In(&'r [u8]),
    /// Send these bytes in the DATA stage, in place
    ///
    /// For descriptors. The bytes are clamped to `wLength`, and aren't
    /// limited by the control buffer.
    Static(&'static [u8]),
    /// Receive up to `wLength` bytes in the DATA stage. The stack hands
    /// them to [`Class::control_data`].
    ///
    /// The request stalls if `wLength` exceeds
    /// [`CONTROL_BUFFER_SIZE`](crate::CONTROL_BUFFER_SIZE).
    Out,
}

/// A USB class driver
///
/// # Opening interfaces
///
/// On SET_CONFIGURATION, the stack walks the configuration descriptor. For
/// each interface descriptor, it calls `open` with the parsed interface and
/// the configuration bytes that start at that interface descriptor. A
/// driver that recognizes the interface opens its endpoints, and returns the
/// number of bytes that belong to the interface: its interface descriptor,
/// any class-specific descriptors, its endpoint descriptors, and any
/// trailing interfaces that it also drives. Every interface and endpoint
/// inside that span is bound to the driver.
///
/// Return [`Error::UnsupportedInterface`] or [`Error::UnsupportedProtocol`]
/// to let the next driver try. Any other error deconfigures the device.
pub trait Class {
    /// A short name, for logs
    fn name(&self) -> &'static str;

    /// The `bInterfaceClass` that this driver opens
    fn interface_class(&self) -> u8;

    /// Called once, before the first event is handled
    fn init(&mut self) {}

    /// Open an interface
    fn open(
        &mut self,
        ctx: &mut Context,
        interface: &InterfaceDescriptor,
        descriptors: &[u8],
    ) -> Result<usize>;

    /// The host selected configuration `config`, and all of this driver's
    /// interfaces are open
    fn set_config(&mut self, ctx: &mut Context, config: u8) {
        let _ = (ctx, config);
    }

    /// Handle a request addressed to one of this driver's interfaces or
    /// endpoints
    ///
    /// Standard SET_FEATURE / CLEAR_FEATURE(ENDPOINT_HALT) requests are
    /// offered here after the stack changed the endpoint's halt state. The
    /// reply to those requests is ignored.
    fn control_request(&mut self, ctx: &mut Context, request: &Request) -> ControlReply<'_> {
        let _ = (ctx, request);
        ControlReply::Reject
    }

    /// Handle the OUT DATA stage of a request answered with
    /// [`ControlReply::Out`]
    ///
    /// Return `false` to stall the STATUS stage.
    fn control_data(&mut self, ctx: &mut Context, request: &Request, data: &[u8]) -> bool {
        let _ = (ctx, request, data);
        false
    }

    /// A transfer completed on one of this driver's endpoints
    fn xfer_complete(&mut self, ctx: &mut Context, completion: Completion);

    /// The device was reset, unplugged, or de-configured
    ///
    /// Forget every opened interface. The endpoints are already closed.
    fn close(&mut self);
}

/// Something that accepts events
pub(crate) trait Post {
    fn post(&mut self, event: Event) -> Result<()>;
}

impl<const N: usize> Post for EventQueue<N> {
    fn post(&mut self, event: Event) -> Result<()> {
        self.push(event)
    }
}

/// A class driver's handle on the controller
///
/// Endpoint operations go straight to the controller. The context also
/// tracks which endpoints have a transfer in flight.
pub struct Context<'c> {
    dcd: &'c mut dyn Dcd,
    events: &'c mut dyn Post,
    busy: &'c mut [[bool; 2]; MAX_ENDPOINTS],
    ep2drv: &'c mut [[u8; 2]; MAX_ENDPOINTS],
    driver: u8,
}

impl<'c> Context<'c> {
    pub(crate) fn new(
        dcd: &'c mut dyn Dcd,
        events: &'c mut dyn Post,
        busy: &'c mut [[bool; 2]; MAX_ENDPOINTS],
        ep2drv: &'c mut [[u8; 2]; MAX_ENDPOINTS],
        driver: u8,
    ) -> Self {
        Context {
            dcd,
            events,
            busy,
            ep2drv,
            driver,
        }
    }

    fn busy_mut(&mut self, ep: EndpointAddress) -> Option<&mut bool> {
        self.busy
            .get_mut(ep.index())
            .map(|dirs| &mut dirs[dir_index(ep.direction())])
    }

    /// Open an endpoint, and bind it to the calling driver
    pub fn open_endpoint(&mut self, descriptor: &EndpointDescriptor) -> Result<()> {
        let ep = descriptor.address;
        if ep.index() == 0 || ep.index() >= MAX_ENDPOINTS {
            return Err(Error::EndpointOpen);
        }
        if !self.dcd.edpt_open(descriptor) {
            warn!("OPEN EP{} REFUSED", u8::from(ep));
            return Err(Error::EndpointOpen);
        }
        debug!("OPENED EP{}", u8::from(ep));
        self.ep2drv[ep.index()][dir_index(ep.direction())] = self.driver;
        self.busy[ep.index()][dir_index(ep.direction())] = false;
        Ok(())
    }

    /// Queue an IN transfer
    ///
    /// `data` is copied before this returns.
    pub fn xfer_in(&mut self, ep: EndpointAddress, data: &[u8]) -> Result<()> {
        if !self.dcd.edpt_xfer_in(ep, data) {
            warn!("XFER IN EP{} REFUSED", u8::from(ep));
            return Err(Error::Transfer);
        }
        if let Some(busy) = self.busy_mut(ep) {
            *busy = true;
        }
        Ok(())
    }

    /// Arm an OUT transfer of up to `len` bytes
    ///
    /// Once it completes, copy the data out with [`read`](Context::read).
    pub fn xfer_out(&mut self, ep: EndpointAddress, len: usize) -> Result<()> {
        if !self.dcd.edpt_xfer_out(ep, len) {
            warn!("XFER OUT EP{} REFUSED", u8::from(ep));
            return Err(Error::Transfer);
        }
        if let Some(busy) = self.busy_mut(ep) {
            *busy = true;
        }
        Ok(())
    }

    /// Copy out the data of the last completed OUT transfer
    pub fn read(&mut self, ep: EndpointAddress, buffer: &mut [u8]) -> usize {
        self.dcd.edpt_read(ep, buffer)
    }

    pub fn stall(&mut self, ep: EndpointAddress) {
        debug!("STALL EP{}", u8::from(ep));
        self.dcd.edpt_stall(ep);
    }

    pub fn clear_stall(&mut self, ep: EndpointAddress) {
        self.dcd.edpt_clear_stall(ep);
    }

    pub fn is_stalled(&self, ep: EndpointAddress) -> bool {
        self.dcd.edpt_is_stalled(ep)
    }

    /// Indicates if a transfer is in flight on `ep`
    pub fn is_busy(&self, ep: EndpointAddress) -> bool {
        self.busy
            .get(ep.index())
            .map(|dirs| dirs[dir_index(ep.direction())])
            .unwrap_or(false)
    }

    /// Post a completion for `ep` back to this driver
    ///
    /// The completion is delivered on a later [`Device::task`](crate::Device::task)
    /// call, with [`Completion::deferred`] set. Use this to call yourself
    /// again without blocking the task.
    pub fn defer(&mut self, ep: EndpointAddress, len: usize) -> Result<()> {
        trace!("DEFER EP{} LEN {}", u8::from(ep), len);
        self.events.post(Event::XferComplete(Completion {
            deferred: true,
            ..Completion::new(ep, len)
        }))
    }
}
