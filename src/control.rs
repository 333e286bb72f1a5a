//! The EP0 control transfer engine
//!
//! A [`ControlPipe`] drives one control transfer through its SETUP, DATA and
//! STATUS stages. It splits DATA against `bMaxPacketSize0`, decides when a
//! zero-length packet terminates an IN data stage, and always runs the
//! STATUS stage in the direction opposite to the request.
//!
//! A new SETUP packet resets the pipe, whatever stage it was in. Any
//! completion from the superseded transfer then arrives in the wrong
//! direction, or while idle, and is ignored.

use crate::{dcd::Dcd, dcd::XferResult, event::Completion, request::Request, CONTROL_BUFFER_SIZE};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Direct index to the OUT control endpoint
pub(crate) fn ctrl_ep0_out() -> EndpointAddress {
    // Constructor not currently const. Otherwise, this would
    // be a const.
    EndpointAddress::from_parts(0, UsbDirection::Out)
}

/// Direct index to the IN control endpoint
pub(crate) fn ctrl_ep0_in() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::In)
}

fn inverse(direction: UsbDirection) -> UsbDirection {
    match direction {
        UsbDirection::In => UsbDirection::Out,
        UsbDirection::Out => UsbDirection::In,
    }
}

/// Control transfer stage
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Stage {
    /// No control transfer.
    Idle,
    /// A SETUP packet arrived, and nobody answered it yet.
    Setup,
    /// Moving DATA stage packets.
    Data,
    /// Waiting for the STATUS stage to complete.
    Status,
}

/// Who answers the current control transfer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Owner {
    /// The device's standard request handling.
    Device,
    /// The class driver at this registry index.
    Class(usize),
}

/// What a completion meant for the control transfer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    /// The OUT DATA stage finished. Read the bytes with
    /// [`data`](ControlPipe::data), then call
    /// [`status`](ControlPipe::status) or [`stall`](ControlPipe::stall).
    DataReceived,
    /// The STATUS stage finished. The pipe is idle.
    Complete,
}

enum Source<'a> {
    /// A borrowed descriptor, sent without copying.
    Static(&'a [u8]),
    /// The pipe's own buffer.
    Buffer,
}

/// The control endpoint state machine
///
/// `'a` is the lifetime of the descriptors that the pipe can send
/// without copying.
pub struct ControlPipe<'a> {
    stage: Stage,
    request: Option<Request>,
    owner: Owner,
    source: Source<'a>,
    buffer: [u8; CONTROL_BUFFER_SIZE],
    /// DATA stage length, never more than `wLength`.
    total: usize,
    transferred: usize,
    max_packet_size: usize,
    /// The direction of the EP0 transfer we're waiting on.
    in_flight: Option<UsbDirection>,
}

impl<'a> ControlPipe<'a> {
    /// Create an idle pipe with the given EP0 max packet size
    pub const fn new(max_packet_size: usize) -> Self {
        ControlPipe {
            stage: Stage::Idle,
            request: None,
            owner: Owner::Device,
            source: Source::Buffer,
            buffer: [0; CONTROL_BUFFER_SIZE],
            total: 0,
            transferred: 0,
            max_packet_size,
            in_flight: None,
        }
    }

    /// Change the EP0 max packet size
    pub fn set_max_packet_size(&mut self, max_packet_size: usize) {
        self.max_packet_size = max_packet_size.max(1);
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The request of the in-progress control transfer
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    /// Start a new control transfer, abandoning any previous one
    pub fn setup(&mut self, request: Request) {
        if self.stage != Stage::Idle {
            debug!("CONTROL SUPERSEDED");
        }
        self.stage = Stage::Setup;
        self.request = Some(request);
        self.owner = Owner::Device;
        self.source = Source::Buffer;
        self.total = 0;
        self.transferred = 0;
        self.in_flight = None;
    }

    /// Drop any control transfer without touching the endpoints
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.request = None;
        self.owner = Owner::Device;
        self.in_flight = None;
    }

    fn wlength(&self) -> usize {
        self.request.map(|req| req.length as usize).unwrap_or(0)
    }

    /// Queue the STATUS stage
    ///
    /// The STATUS stage runs opposite to the request's direction. Call this
    /// alone to answer a request without a DATA stage, or after
    /// [`Step::DataReceived`] to accept OUT data.
    pub fn status(&mut self, dcd: &mut dyn Dcd) {
        let Some(request) = self.request else {
            return;
        };
        let direction = inverse(request.direction);
        let ok = match direction {
            UsbDirection::In => dcd.edpt_xfer_in(ctrl_ep0_in(), &[]),
            UsbDirection::Out => dcd.edpt_xfer_out(ctrl_ep0_out(), 0),
        };
        if ok {
            self.stage = Stage::Status;
            self.in_flight = Some(direction);
        } else {
            warn!("CONTROL STATUS REFUSED");
            self.stall(dcd);
        }
    }

    /// Answer the request with a copy of `data`
    ///
    /// `data` is clamped to `wLength`. An empty `data` answers with a bare
    /// STATUS stage.
    ///
    /// # Panics
    ///
    /// Panics if `data`, clamped to `wLength`, is larger than the control
    /// buffer.
    pub fn send(&mut self, dcd: &mut dyn Dcd, data: &[u8]) {
        let len = data.len().min(self.wlength());
        assert!(
            len <= CONTROL_BUFFER_SIZE,
            "control reply exceeds the control buffer"
        );
        self.buffer[..len].copy_from_slice(&data[..len]);
        self.source = Source::Buffer;
        self.start_in(dcd, len);
    }

    /// Answer the request with `data`, without copying it
    ///
    /// `data` is clamped to `wLength`.
    pub fn send_static(&mut self, dcd: &mut dyn Dcd, data: &'a [u8]) {
        self.source = Source::Static(data);
        self.start_in(dcd, data.len());
    }

    fn start_in(&mut self, dcd: &mut dyn Dcd, len: usize) {
        self.total = len.min(self.wlength());
        self.transferred = 0;
        if self.total == 0 {
            self.status(dcd);
        } else {
            self.stage = Stage::Data;
            self.next_in(dcd);
        }
    }

    fn next_in(&mut self, dcd: &mut dyn Dcd) {
        let start = self.transferred;
        let end = self.total.min(start + self.max_packet_size);
        let data: &[u8] = match self.source {
            Source::Static(data) => &data[start..end],
            Source::Buffer => &self.buffer[start..end],
        };
        trace!("CONTROL IN {} BYTES", data.len());
        if dcd.edpt_xfer_in(ctrl_ep0_in(), data) {
            self.in_flight = Some(UsbDirection::In);
        } else {
            warn!("CONTROL IN REFUSED");
            self.stall(dcd);
        }
    }

    /// Receive up to `len` bytes of DATA stage
    ///
    /// `len` is clamped to `wLength`. A zero length answers with a bare
    /// STATUS stage.
    ///
    /// Returns `false`, and queues nothing, if the DATA stage doesn't fit in
    /// the control buffer. The caller should stall.
    pub fn receive(&mut self, dcd: &mut dyn Dcd, len: usize) -> bool {
        let len = len.min(self.wlength());
        if len > CONTROL_BUFFER_SIZE {
            warn!("CONTROL OUT {} BYTES EXCEEDS BUFFER", len);
            return false;
        }
        self.source = Source::Buffer;
        self.total = len;
        self.transferred = 0;
        if self.total == 0 {
            self.status(dcd);
        } else {
            self.stage = Stage::Data;
            self.next_out(dcd);
        }
        true
    }

    fn next_out(&mut self, dcd: &mut dyn Dcd) {
        let len = (self.total - self.transferred).min(self.max_packet_size);
        if dcd.edpt_xfer_out(ctrl_ep0_out(), len) {
            self.in_flight = Some(UsbDirection::Out);
        } else {
            warn!("CONTROL OUT REFUSED");
            self.stall(dcd);
        }
    }

    /// The bytes received in the OUT DATA stage
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.transferred]
    }

    /// Reject the request by stalling both EP0 directions
    pub fn stall(&mut self, dcd: &mut dyn Dcd) {
        dcd.edpt_stall(ctrl_ep0_in());
        dcd.edpt_stall(ctrl_ep0_out());
        self.reset();
    }

    /// Handle an EP0 transfer completion
    ///
    /// Returns `None` when the completion only advanced the DATA stage, or
    /// when it was stale.
    pub fn on_complete(&mut self, dcd: &mut dyn Dcd, completion: Completion) -> Option<Step> {
        if completion.ep.index() != 0 || self.in_flight != Some(completion.ep.direction()) {
            return None;
        }
        self.in_flight = None;

        if completion.result != XferResult::Success {
            warn!("CONTROL TRANSFER ENDED EARLY");
            self.reset();
            return None;
        }

        match self.stage {
            Stage::Data => self.on_data(dcd, completion),
            Stage::Status => {
                self.stage = Stage::Idle;
                Some(Step::Complete)
            }
            Stage::Idle | Stage::Setup => None,
        }
    }

    fn on_data(&mut self, dcd: &mut dyn Dcd, completion: Completion) -> Option<Step> {
        let short = completion.len < self.max_packet_size;
        match completion.ep.direction() {
            UsbDirection::In => {
                self.transferred = (self.transferred + completion.len).min(self.total);
                let done =
                    self.transferred == self.total && (short || self.total == self.wlength());
                if done {
                    self.status(dcd);
                } else {
                    // A full packet ended exactly on the reply length, short
                    // of wLength. The next packet is a ZLP.
                    self.next_in(dcd);
                }
                None
            }
            UsbDirection::Out => {
                let window = &mut self.buffer[self.transferred..self.total];
                let len = completion.len.min(window.len());
                let read = dcd.edpt_read(ctrl_ep0_out(), &mut window[..len]);
                self.transferred += read;
                if self.transferred == self.total || short {
                    Some(Step::DataReceived)
                } else {
                    self.next_out(dcd);
                    None
                }
            }
        }
    }
}
