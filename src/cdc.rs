//! Communications Device Class, Abstract Control Model
//!
//! [`Cdc`] drives a CDC-ACM function: the communication interface, its
//! optional notification endpoint, and the data interface that follows it
//! with a bulk IN / OUT pair. Both interfaces are opened together.

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

/// Communication interface class
pub const INTERFACE_CLASS: u8 = 0x02;
/// Data interface class
pub const DATA_INTERFACE_CLASS: u8 = 0x0A;
/// Abstract Control Model subclass
pub const SUBCLASS_ACM: u8 = 0x02;

const SET_LINE_CODING: u8 = 0x20;
const GET_LINE_CODING: u8 = 0x21;
const SET_CONTROL_LINE_STATE: u8 = 0x22;
const SEND_BREAK: u8 = 0x23;

bitflags::bitflags! {
    /// SET_CONTROL_LINE_STATE bits
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct LineState: u8 {
        /// Data terminal ready
        const DTR = 1 << 0;
        /// Request to send
        const RTS = 1 << 1;
    }
}

/// Serial line settings
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct LineCoding {
    pub baud_rate: u32,
    /// 0: 1 stop bit, 1: 1.5 stop bits, 2: 2 stop bits
    pub stop_bits: u8,
    /// 0: none, 1: odd, 2: even, 3: mark, 4: space
    pub parity: u8,
    pub data_bits: u8,
}

/// 115200 8N1
impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            baud_rate: 115_200,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    pub const LEN: usize = 7;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::LEN] = bytes.try_into().ok()?;
        Some(LineCoding {
            baud_rate: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            stop_bits: bytes[4],
            parity: bytes[5],
            data_bits: bytes[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let [b0, b1, b2, b3] = self.baud_rate.to_le_bytes();
        [b0, b1, b2, b3, self.stop_bits, self.parity, self.data_bits]
    }
}

/// The application behind a CDC-ACM function
pub trait CdcApp {
    /// The host sent data
    fn received(&mut self, data: &[u8]);

    /// The last [`Cdc::write`] reached the host
    fn sent(&mut self) {}

    fn line_coding_changed(&mut self, coding: &LineCoding) {
        let _ = coding;
    }

    fn line_state_changed(&mut self, state: LineState) {
        let _ = state;
    }

    /// The host asked for a break of `duration` ms. `0xFFFF` means "until
    /// the next SEND_BREAK."
    fn send_break(&mut self, duration: u16) {
        let _ = duration;
    }
}

struct Function {
    comm: u8,
    ep_in: Option<EndpointAddress>,
    ep_out: Option<EndpointAddress>,
}

/// A CDC-ACM class driver
///
/// `BUF` is the largest OUT transfer armed on the data interface.
pub struct Cdc<A, const BUF: usize = 64> {
    app: A,
    function: Option<Function>,
    line_coding: LineCoding,
    line_state: LineState,
    reply: [u8; LineCoding::LEN],
    buffer: [u8; BUF],
}

impl<A: CdcApp, const BUF: usize> Cdc<A, BUF> {
    pub fn new(app: A) -> Self {
        Cdc {
            app,
            function: None,
            line_coding: LineCoding::default(),
            line_state: LineState::empty(),
            reply: [0; LineCoding::LEN],
            buffer: [0; BUF],
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn line_coding(&self) -> LineCoding {
        self.line_coding
    }

    pub fn line_state(&self) -> LineState {
        self.line_state
    }

    /// Indicates if the host opened the port, and nothing is in flight
    pub fn is_ready(&self, ctx: &Context) -> bool {
        match self.function.as_ref().and_then(|function| function.ep_in) {
            Some(ep) => self.line_state.contains(LineState::DTR) && !ctx.is_busy(ep),
            None => false,
        }
    }

    /// Send `data` on the bulk IN endpoint
    ///
    /// Returns [`Error::Transfer`] if there's no data interface, or the last
    /// write is still in flight.
    pub fn write(&mut self, ctx: &mut Context, data: &[u8]) -> Result<()> {
        let ep = self
            .function
            .as_ref()
            .and_then(|function| function.ep_in)
            .ok_or(Error::Transfer)?;
        if ctx.is_busy(ep) {
            return Err(Error::Transfer);
        }
        ctx.xfer_in(ep, data)
    }
}

fn open_bulk(ctx: &mut Context, descriptor: &[u8]) -> Result<EndpointDescriptor> {
    let endpoint = EndpointDescriptor::parse(descriptor)?;
    if endpoint.ep_type != EndpointType::Bulk {
        return Err(Error::InvalidDescriptor);
    }
    ctx.open_endpoint(&endpoint)?;
    Ok(endpoint)
}

impl<A: CdcApp, const BUF: usize> Class for Cdc<A, BUF> {
    fn name(&self) -> &'static str {
        "CDC"
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
        if interface.class != INTERFACE_CLASS || self.function.is_some() {
            return Err(Error::UnsupportedInterface);
        }
        if interface.subclass != SUBCLASS_ACM {
            return Err(Error::UnsupportedProtocol);
        }

        let mut iter = DescriptorIter::new(descriptors).peekable();
        let mut consumed = iter.next().ok_or(Error::InvalidDescriptor)?.len();
        while let Some(descriptor) =
            iter.next_if(|desc| descriptor_type(desc) == Some(kind::CS_INTERFACE))
        {
            consumed += descriptor.len();
        }
        if let Some(descriptor) =
            iter.next_if(|desc| descriptor_type(desc) == Some(kind::ENDPOINT))
        {
            ctx.open_endpoint(&EndpointDescriptor::parse(descriptor)?)?;
            consumed += descriptor.len();
        }

        let mut function = Function {
            comm: interface.number,
            ep_in: None,
            ep_out: None,
        };
        let data = iter.next_if(|desc| {
            descriptor_type(desc) == Some(kind::INTERFACE)
                && InterfaceDescriptor::parse(desc).map(|itf| itf.class) == Ok(DATA_INTERFACE_CLASS)
        });
        if let Some(data) = data {
            consumed += data.len();
            let data = InterfaceDescriptor::parse(data)?;
            for _ in 0..data.num_endpoints {
                let descriptor = iter.next().ok_or(Error::InvalidDescriptor)?;
                let endpoint = open_bulk(ctx, descriptor)?;
                match endpoint.address.direction() {
                    UsbDirection::In => function.ep_in = Some(endpoint.address),
                    UsbDirection::Out => function.ep_out = Some(endpoint.address),
                }
                consumed += descriptor.len();
            }
        }
        if let Some(ep) = function.ep_out {
            ctx.xfer_out(ep, BUF)?;
        }

        self.line_state = LineState::empty();
        self.function = Some(function);
        Ok(consumed)
    }

    fn control_request(&mut self, ctx: &mut Context, request: &Request) -> ControlReply<'_> {
        let _ = ctx;
        let Some(function) = self.function.as_ref() else {
            return ControlReply::Reject;
        };
        if request.request_type != RequestType::Class
            || request.recipient != Recipient::Interface
            || request.index_low() != function.comm
        {
            return ControlReply::Reject;
        }

        match request.request {
            SET_LINE_CODING if request.length as usize == LineCoding::LEN => ControlReply::Out,
            GET_LINE_CODING => {
                self.reply = self.line_coding.to_bytes();
                ControlReply::In(&self.reply)
            }
            SET_CONTROL_LINE_STATE => {
                let state = LineState::from_bits_truncate(request.value as u8);
                debug!("CDC LINE STATE {}", state.bits());
                self.line_state = state;
                self.app.line_state_changed(state);
                ControlReply::Status
            }
            SEND_BREAK => {
                self.app.send_break(request.value);
                ControlReply::Status
            }
            _ => ControlReply::Reject,
        }
    }

    fn control_data(&mut self, ctx: &mut Context, request: &Request, data: &[u8]) -> bool {
        let _ = ctx;
        if request.request != SET_LINE_CODING {
            return false;
        }
        match LineCoding::parse(data) {
            Some(coding) => {
                debug!("CDC BAUD {}", coding.baud_rate);
                self.line_coding = coding;
                self.app.line_coding_changed(&coding);
                true
            }
            None => false,
        }
    }

    fn xfer_complete(&mut self, ctx: &mut Context, completion: Completion) {
        let Some(function) = self.function.as_ref() else {
            return;
        };
        if Some(completion.ep) == function.ep_in {
            self.app.sent();
        } else if Some(completion.ep) == function.ep_out {
            let ep = completion.ep;
            let len = ctx.read(ep, &mut self.buffer[..completion.len.min(BUF)]);
            self.app.received(&self.buffer[..len]);
            if ctx.xfer_out(ep, BUF).is_err() {
                warn!("CDC OUT NOT ARMED");
            }
        }
    }

    fn close(&mut self) {
        self.function = None;
    }
}
