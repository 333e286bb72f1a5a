//! Human Interface Device class
//!
//! [`Hid`] drives one HID interface, with an interrupt IN endpoint and an
//! optional interrupt OUT endpoint. It answers the HID class requests, and
//! serves the HID and report descriptors. Report contents are up to the
//! [`HidApp`].

use crate::{
    class::{Class, ControlReply, Context},
    descriptor::{descriptor_type, kind, DescriptorIter, EndpointDescriptor, InterfaceDescriptor},
    event::Completion,
    request::{standard, Recipient, Request, RequestType},
    Error, Result,
};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// HID interface class
pub const INTERFACE_CLASS: u8 = 0x03;

/// HID class request codes
pub mod class_request {
    pub const GET_REPORT: u8 = 0x01;
    pub const GET_IDLE: u8 = 0x02;
    pub const GET_PROTOCOL: u8 = 0x03;
    pub const SET_REPORT: u8 = 0x09;
    pub const SET_IDLE: u8 = 0x0A;
    pub const SET_PROTOCOL: u8 = 0x0B;
}

/// The report type of GET_REPORT / SET_REPORT
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ReportType {
    Input = 1,
    Output = 2,
    Feature = 3,
}

impl ReportType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ReportType::Input),
            2 => Some(ReportType::Output),
            3 => Some(ReportType::Feature),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Protocol {
    Boot = 0,
    Report = 1,
}

/// The application behind a HID interface
pub trait HidApp {
    /// The HID report descriptor
    ///
    /// It's sent in place, so it may be longer than the control buffer.
    fn report_descriptor(&self) -> &'static [u8];

    /// Write the report for a GET_REPORT request into `buffer`
    ///
    /// Returns the report length. Zero stalls the request.
    fn get_report(&mut self, report_id: u8, report_type: ReportType, buffer: &mut [u8]) -> usize;

    /// The host sent a report with SET_REPORT
    fn set_report(&mut self, report_id: u8, report_type: ReportType, data: &[u8]) {
        let _ = (report_id, report_type, data);
    }

    /// The host switched between the boot and report protocols
    fn protocol_changed(&mut self, protocol: Protocol) {
        let _ = protocol;
    }

    /// The last report sent with [`Hid::send_report`] reached the host
    fn report_sent(&mut self) {}

    /// The host sent a report on the interrupt OUT endpoint
    fn report_received(&mut self, data: &[u8]) {
        let _ = data;
    }
}

struct Interface {
    number: u8,
    ep_in: EndpointAddress,
    ep_out: Option<EndpointAddress>,
}

/// A HID class driver
///
/// `REPORT` is the largest report, including its report ID.
pub struct Hid<A, const REPORT: usize = 64> {
    app: A,
    interface: Option<Interface>,
    protocol: Protocol,
    /// Idle rate, in units of 4 ms
    idle_rate: u8,
    /// HID descriptor, copied from the configuration
    hid_descriptor: [u8; 9],
    hid_descriptor_len: usize,
    reply: [u8; 1],
    buffer: [u8; REPORT],
}

impl<A: HidApp, const REPORT: usize> Hid<A, REPORT> {
    pub fn new(app: A) -> Self {
        Hid {
            app,
            interface: None,
            protocol: Protocol::Report,
            idle_rate: 0,
            hid_descriptor: [0; 9],
            hid_descriptor_len: 0,
            reply: [0],
            buffer: [0; REPORT],
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Idle rate, in units of 4 ms. Zero means "only report changes."
    pub fn idle_rate(&self) -> u8 {
        self.idle_rate
    }

    /// Indicates if the interface is open, and the last report was sent
    pub fn is_ready(&self, ctx: &Context) -> bool {
        self.interface
            .as_ref()
            .map(|itf| !ctx.is_busy(itf.ep_in))
            .unwrap_or(false)
    }

    /// Send an input report
    ///
    /// A non-zero `report_id` is sent as the first byte. Returns
    /// [`Error::Transfer`] if the interface isn't open, or the previous
    /// report is still in flight.
    ///
    /// # Panics
    ///
    /// Panics if the report doesn't fit in `REPORT` bytes.
    pub fn send_report(&mut self, ctx: &mut Context, report_id: u8, data: &[u8]) -> Result<()> {
        let Some(itf) = self.interface.as_ref() else {
            return Err(Error::Transfer);
        };
        if ctx.is_busy(itf.ep_in) {
            return Err(Error::Transfer);
        }
        let mut report = [0; REPORT];
        let start = (report_id != 0) as usize;
        assert!(start + data.len() <= REPORT, "report exceeds REPORT");
        report[0] = report_id;
        report[start..start + data.len()].copy_from_slice(data);
        ctx.xfer_in(itf.ep_in, &report[..start + data.len()])
    }

    fn owns(&self, request: &Request) -> bool {
        self.interface
            .as_ref()
            .map(|itf| itf.number == request.index_low())
            .unwrap_or(false)
    }
}

impl<A: HidApp, const REPORT: usize> Class for Hid<A, REPORT> {
    fn name(&self) -> &'static str {
        "HID"
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
        let hid = iter.next().ok_or(Error::InvalidDescriptor)?;
        if descriptor_type(hid) != Some(kind::HID) {
            return Err(Error::InvalidDescriptor);
        }
        consumed += hid.len();

        let mut ep_in = None;
        let mut ep_out = None;
        for descriptor in iter.take(interface.num_endpoints as usize) {
            if descriptor_type(descriptor) != Some(kind::ENDPOINT) {
                break;
            }
            let endpoint = EndpointDescriptor::parse(descriptor)?;
            if endpoint.ep_type != EndpointType::Interrupt {
                return Err(Error::InvalidDescriptor);
            }
            match endpoint.address.direction() {
                UsbDirection::In => ep_in = Some(endpoint),
                UsbDirection::Out => ep_out = Some(endpoint),
            }
            consumed += descriptor.len();
        }
        let ep_in = ep_in.ok_or(Error::InvalidDescriptor)?;

        ctx.open_endpoint(&ep_in)?;
        if let Some(ep_out) = &ep_out {
            ctx.open_endpoint(ep_out)?;
            ctx.xfer_out(ep_out.address, REPORT)?;
        }

        let len = hid.len().min(self.hid_descriptor.len());
        self.hid_descriptor[..len].copy_from_slice(&hid[..len]);
        self.hid_descriptor_len = len;
        self.protocol = Protocol::Report;
        self.idle_rate = 0;
        self.interface = Some(Interface {
            number: interface.number,
            ep_in: ep_in.address,
            ep_out: ep_out.map(|ep| ep.address),
        });
        Ok(consumed)
    }

    fn control_request(&mut self, ctx: &mut Context, request: &Request) -> ControlReply<'_> {
        let _ = ctx;
        if request.recipient != Recipient::Interface || !self.owns(request) {
            return ControlReply::Reject;
        }

        match request.request_type {
            RequestType::Standard if request.is_standard(standard::GET_DESCRIPTOR) => {
                match request.value_high() {
                    kind::HID_REPORT => ControlReply::Static(self.app.report_descriptor()),
                    kind::HID => ControlReply::In(&self.hid_descriptor[..self.hid_descriptor_len]),
                    _ => ControlReply::Reject,
                }
            }
            RequestType::Class => match request.request {
                class_request::GET_REPORT => {
                    let Some(report_type) = ReportType::from_u8(request.value_high()) else {
                        return ControlReply::Reject;
                    };
                    let limit = REPORT.min(request.length as usize);
                    let len = self
                        .app
                        .get_report(request.value_low(), report_type, &mut self.buffer[..limit]);
                    if len == 0 {
                        return ControlReply::Reject;
                    }
                    ControlReply::In(&self.buffer[..len.min(limit)])
                }
                class_request::SET_REPORT => match ReportType::from_u8(request.value_high()) {
                    Some(_) => ControlReply::Out,
                    None => ControlReply::Reject,
                },
                class_request::GET_IDLE => {
                    self.reply = [self.idle_rate];
                    ControlReply::In(&self.reply)
                }
                class_request::SET_IDLE => {
                    self.idle_rate = request.value_high();
                    ControlReply::Status
                }
                class_request::GET_PROTOCOL => {
                    self.reply = [self.protocol as u8];
                    ControlReply::In(&self.reply)
                }
                class_request::SET_PROTOCOL => {
                    let protocol = match request.value {
                        0 => Protocol::Boot,
                        1 => Protocol::Report,
                        _ => return ControlReply::Reject,
                    };
                    debug!("HID PROTOCOL {:?}", protocol);
                    self.protocol = protocol;
                    self.app.protocol_changed(protocol);
                    ControlReply::Status
                }
                _ => ControlReply::Reject,
            },
            _ => ControlReply::Reject,
        }
    }

    fn control_data(&mut self, ctx: &mut Context, request: &Request, data: &[u8]) -> bool {
        let _ = ctx;
        if request.request_type != RequestType::Class
            || request.request != class_request::SET_REPORT
        {
            return false;
        }
        match ReportType::from_u8(request.value_high()) {
            Some(report_type) => {
                self.app.set_report(request.value_low(), report_type, data);
                true
            }
            None => false,
        }
    }

    fn xfer_complete(&mut self, ctx: &mut Context, completion: Completion) {
        let Some(itf) = self.interface.as_ref() else {
            return;
        };
        if completion.ep == itf.ep_in {
            self.app.report_sent();
        } else if Some(completion.ep) == itf.ep_out {
            let ep = completion.ep;
            let len = completion.len.min(REPORT);
            let len = ctx.read(ep, &mut self.buffer[..len]);
            self.app.report_received(&self.buffer[..len]);
            if ctx.xfer_out(ep, REPORT).is_err() {
                warn!("HID OUT NOT ARMED");
            }
        }
    }

    fn close(&mut self) {
        self.interface = None;
    }
}
