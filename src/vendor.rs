//! Vendor-specific interface
//!
//! [`Vendor`] opens one interface of class 0xFF, with an optional bulk IN /
//! OUT pair. Vendor control requests addressed to the interface go to the
//! [`VendorApp`].

use crate::{
    class::{Class, ControlReply, Context},
    descriptor::{descriptor_type, kind, DescriptorIter, EndpointDescriptor, InterfaceDescriptor},
    event::Completion,
    request::{Recipient, Request, RequestType},
    Error, Result,
};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// Vendor-specific interface class
pub const INTERFACE_CLASS: u8 = 0xFF;

/// The application behind a vendor interface
pub trait VendorApp {
    /// Answer a vendor request with an IN DATA stage
    ///
    /// Write the reply into `buffer`, and return its length. Return `None` to
    /// stall.
    fn control_in(&mut self, request: &Request, buffer: &mut [u8]) -> Option<usize> {
        let _ = (request, buffer);
        None
    }

    /// Accept a vendor request with an OUT DATA stage
    ///
    /// Called after the DATA stage, or right away when `wLength` is zero.
    /// Return `false` to stall.
    fn control_out(&mut self, request: &Request, data: &[u8]) -> bool {
        let _ = (request, data);
        false
    }

    /// The host sent data on the bulk OUT endpoint
    fn received(&mut self, data: &[u8]) {
        let _ = data;
    }

    /// The last [`Vendor::write`] reached the host
    fn sent(&mut self) {}
}

struct Interface {
    number: u8,
    ep_in: Option<EndpointAddress>,
    ep_out: Option<EndpointAddress>,
}

/// A vendor class driver
///
/// `BUF` bounds both the control replies and the bulk OUT transfers.
pub struct Vendor<A, const BUF: usize = 64> {
    app: A,
    interface: Option<Interface>,
    buffer: [u8; BUF],
}

impl<A: VendorApp, const BUF: usize> Vendor<A, BUF> {
    pub fn new(app: A) -> Self {
        Vendor {
            app,
            interface: None,
            buffer: [0; BUF],
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Send `data` on the bulk IN endpoint
    ///
    /// Returns [`Error::Transfer`] if there's no IN endpoint, or the last
    /// write is still in flight.
    pub fn write(&mut self, ctx: &mut Context, data: &[u8]) -> Result<()> {
        let ep = self
            .interface
            .as_ref()
            .and_then(|itf| itf.ep_in)
            .ok_or(Error::Transfer)?;
        if ctx.is_busy(ep) {
            return Err(Error::Transfer);
        }
        ctx.xfer_in(ep, data)
    }
}

impl<A: VendorApp, const BUF: usize> Class for Vendor<A, BUF> {
    fn name(&self) -> &'static str {
        "VENDOR"
    }

    fn interface_class(&self) -> u8 {
        INTERFACE_CLASS
    }

    fn init(&mut self) {
        self.close();
    }

    fn open(
        &mut self,
        ctx: &mut Context,
        interface: &InterfaceDescriptor,
        descriptors: &[u8],
    ) -> Result<usize> {
        if interface.class != INTERFACE_CLASS || self.interface.is_some() {
            return Err(Error::UnsupportedInterface);
        }

        let mut iter = DescriptorIter::new(descriptors);
        let mut consumed = iter.next().ok_or(Error::InvalidDescriptor)?.len();
        let mut opened = Interface {
            number: interface.number,
            ep_in: None,
            ep_out: None,
        };
        for descriptor in iter {
            match descriptor_type(descriptor) {
                Some(kind::INTERFACE | kind::INTERFACE_ASSOCIATION) => break,
                Some(kind::ENDPOINT) => {
                    let endpoint = EndpointDescriptor::parse(descriptor)?;
                    if endpoint.ep_type != EndpointType::Bulk {
                        return Err(Error::InvalidDescriptor);
                    }
                    ctx.open_endpoint(&endpoint)?;
                    match endpoint.address.direction() {
                        UsbDirection::In => opened.ep_in = Some(endpoint.address),
                        UsbDirection::Out => opened.ep_out = Some(endpoint.address),
                    }
                }
                _ => {}
            }
            consumed += descriptor.len();
        }
        if let Some(ep) = opened.ep_out {
            ctx.xfer_out(ep, BUF)?;
        }
        self.interface = Some(opened);
        Ok(consumed)
    }

    fn control_request(&mut self, ctx: &mut Context, request: &Request) -> ControlReply<'_> {
        let _ = ctx;
        let owned = self
            .interface
            .as_ref()
            .map(|itf| itf.number == request.index_low())
            .unwrap_or(false);
        if request.request_type != RequestType::Vendor
            || request.recipient != Recipient::Interface
            || !owned
        {
            return ControlReply::Reject;
        }

        match request.direction {
            UsbDirection::In => {
                let limit = BUF.min(request.length as usize);
                match self.app.control_in(request, &mut self.buffer[..limit]) {
                    Some(len) => ControlReply::In(&self.buffer[..len.min(limit)]),
                    None => ControlReply::Reject,
                }
            }
            UsbDirection::Out if request.length == 0 => {
                if self.app.control_out(request, &[]) {
                    ControlReply::Status
                } else {
                    ControlReply::Reject
                }
            }
            UsbDirection::Out => ControlReply::Out,
        }
    }

    fn control_data(&mut self, ctx: &mut Context, request: &Request, data: &[u8]) -> bool {
        let _ = ctx;
        request.request_type == RequestType::Vendor && self.app.control_out(request, data)
    }

    fn xfer_complete(&mut self, ctx: &mut Context, completion: Completion) {
        let Some(itf) = self.interface.as_ref() else {
            return;
        };
        if Some(completion.ep) == itf.ep_in {
            self.app.sent();
        } else if Some(completion.ep) == itf.ep_out {
            let ep = completion.ep;
            let len = ctx.read(ep, &mut self.buffer[..completion.len.min(BUF)]);
            self.app.received(&self.buffer[..len]);
            if ctx.xfer_out(ep, BUF).is_err() {
                warn!("VENDOR OUT NOT ARMED");
            }
        }
    }

    fn close(&mut self) {
        self.interface = None;
    }
}
