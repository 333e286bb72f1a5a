//! USB Mass Storage, SCSI transparent command set over Bulk-Only Transport
//!
//! [`Msc`] is a class driver. It owns the BOT state machine, the CBW / CSW
//! wrappers, and the sense data of each interface it opens. The block
//! device itself is the application's [`MscApp`].
//!
//! # Commands
//!
//! Every command runs through the stages CMD, DATA (skipped when the host
//! expects no data), and STATUS, then back to CMD:
//!
//! - INQUIRY, READ CAPACITY(10), READ FORMAT CAPACITIES, MODE SENSE(6)
//!   and REQUEST SENSE are answered by the driver, with data from the
//!   application.
//! - READ(10) and WRITE(10) move data in chunks of the driver's buffer,
//!   through [`MscApp::read10`] and [`MscApp::write10`].
//! - Everything else goes to [`MscApp::scsi`].
//!
//! # Slow media
//!
//! The application never has to block. A `read10` that returns `Ok(0)`,
//! or a `write10` that consumes less than it was given, is called again on
//! a later [`Device::task`](crate::Device::task) call, with the same
//! position in the transfer.
//!
//! # Errors
//!
//! An application error fails the command. The driver records the
//! application's sense data, stalls the data endpoint if the host expected
//! more data, and sends a failed CSW once the host clears the stall.

pub mod bot;
pub mod scsi;

use crate::{
    class::{Class, ControlReply, Context},
    descriptor::{descriptor_type, kind, DescriptorIter, EndpointDescriptor, InterfaceDescriptor},
    dcd::XferResult,
    event::Completion,
    request::{feature, standard, Recipient, Request, RequestType},
    Error, Result,
};
use bot::{Cbw, Csw, CswStatus, CBW_LEN};
use scsi::{opcode, Capacity, InquiryFields, Sense};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// Mass storage interface class
pub const INTERFACE_CLASS: u8 = 0x08;
/// SCSI transparent command set subclass
pub const SUBCLASS_SCSI: u8 = 0x06;
/// Bulk-Only Transport protocol
pub const PROTOCOL_BOT: u8 = 0x50;

/// Bulk-Only Mass Storage Reset
const REQ_RESET: u8 = 0xFF;
/// Get Max LUN
const REQ_GET_MAX_LUN: u8 = 0xFE;

/// The application behind a mass storage interface
///
/// Callbacks that fail return the sense data to report. Use
/// [`Sense::INVALID_COMMAND`] when nothing more specific applies.
pub trait MscApp {
    /// Number of logical units
    fn lun_count(&self) -> u8 {
        1
    }

    /// INQUIRY strings for `lun`
    fn inquiry(&mut self, lun: u8) -> InquiryFields;

    /// Block count and block size of `lun`
    fn capacity(&mut self, lun: u8) -> Capacity;

    /// Indicates if `lun` accepts WRITE(10)
    fn is_writable(&mut self, lun: u8) -> bool {
        let _ = lun;
        true
    }

    /// Fill `buffer` with data starting `offset` bytes into block `lba`
    ///
    /// Return the number of bytes produced, up to `buffer.len()`. Return
    /// `Ok(0)` if the data isn't ready yet; the driver calls again later.
    fn read10(
        &mut self,
        lun: u8,
        lba: u32,
        offset: u32,
        buffer: &mut [u8],
    ) -> core::result::Result<usize, Sense>;

    /// Store `data`, which starts `offset` bytes into block `lba`
    ///
    /// Return the number of bytes consumed. The driver offers the rest again
    /// later.
    fn write10(
        &mut self,
        lun: u8,
        lba: u32,
        offset: u32,
        data: &[u8],
    ) -> core::result::Result<usize, Sense>;

    /// Handle any other SCSI command
    ///
    /// For commands that send data to the host, fill `buffer`, and return the
    /// number of bytes to send. For commands that receive data, `buffer`
    /// holds the next chunk of the host's data. For commands without data,
    /// `buffer` is empty.
    fn scsi(
        &mut self,
        lun: u8,
        command: &[u8; 16],
        buffer: &mut [u8],
    ) -> core::result::Result<usize, Sense>;

    /// A READ(10) command finished
    fn read10_complete(&mut self, lun: u8) {
        let _ = lun;
    }

    /// A WRITE(10) command finished
    fn write10_complete(&mut self, lun: u8) {
        let _ = lun;
    }

    /// A command handled by [`scsi`](MscApp::scsi), or a built-in command,
    /// finished
    fn scsi_complete(&mut self, lun: u8, command: &[u8; 16]) {
        let _ = (lun, command);
    }
}

/// What to do with a CBW that isn't valid
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CbwPolicy {
    /// Drop it, and wait for the next CBW. No CSW is sent.
    #[default]
    Rearm,
    /// Stall both bulk endpoints, and keep them stalled until the host sends
    /// a Bulk-Only Mass Storage Reset.
    StallUntilReset,
}

/// Driver configuration
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Config {
    pub cbw_policy: CbwPolicy,
}

/// BOT stage
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Stage {
    /// Waiting for a CBW.
    Cmd,
    /// Moving command data.
    Data,
    /// Waiting to send the CSW.
    Status,
}

/// One opened mass storage interface
struct Interface<const BUF: usize> {
    number: u8,
    ep_in: EndpointAddress,
    ep_out: EndpointAddress,
    stage: Stage,
    cbw: Cbw,
    csw: Csw,
    /// Bytes the device moves in the DATA stage; at most `cbw.total_bytes`.
    total_len: usize,
    /// Bytes moved (or, for WRITE(10), consumed) so far.
    transferred: usize,
    block_size: u32,
    sense: Sense,
    /// Set by an invalid CBW under [`CbwPolicy::StallUntilReset`].
    reset_lock: bool,
    buffer: [u8; BUF],
}

fn put(dst: &mut [u8], src: &[u8]) -> usize {
    let len = dst.len().min(src.len());
    dst[..len].copy_from_slice(&src[..len]);
    len
}

impl<const BUF: usize> Interface<BUF> {
    fn new(number: u8, ep_in: EndpointAddress, ep_out: EndpointAddress) -> Self {
        Interface {
            number,
            ep_in,
            ep_out,
            stage: Stage::Cmd,
            cbw: Cbw::default(),
            csw: Csw::default(),
            total_len: 0,
            transferred: 0,
            block_size: 0,
            sense: Sense::NONE,
            reset_lock: false,
            buffer: [0; BUF],
        }
    }

    fn arm_cbw(&mut self, ctx: &mut Context) -> Result<()> {
        ctx.xfer_out(self.ep_out, CBW_LEN)
    }

    fn fail(&mut self, sense: Sense) {
        debug!("MSC COMMAND FAILED, SENSE {} {} {}", sense.key, sense.asc, sense.ascq);
        self.csw.status = CswStatus::Failed;
        self.sense = sense;
    }

    /// Post a completion to ourselves
    fn retry(&mut self, ctx: &mut Context, ep: EndpointAddress, len: usize) {
        if ctx.defer(ep, len).is_err() {
            warn!("MSC RETRY DROPPED");
        }
    }

    /// Bulk-Only Mass Storage Reset
    fn reset(&mut self, ctx: &mut Context) {
        debug!("MSC RESET");
        self.stage = Stage::Cmd;
        self.reset_lock = false;
        self.total_len = 0;
        self.transferred = 0;
        if !ctx.is_busy(self.ep_out) && self.arm_cbw(ctx).is_err() {
            warn!("MSC CBW NOT ARMED");
        }
    }

    fn on_complete<A: MscApp>(
        &mut self,
        app: &mut A,
        ctx: &mut Context,
        config: &Config,
        completion: Completion,
    ) {
        match self.stage {
            Stage::Cmd => {
                // IN completions here are the previous CSW.
                if completion.ep == self.ep_out && !completion.deferred {
                    self.on_cbw(app, ctx, config, completion);
                }
            }
            Stage::Data => self.on_data(app, ctx, completion),
            Stage::Status => {
                if !completion.deferred {
                    return;
                }
            }
        }
        if self.stage == Stage::Status {
            self.status(app, ctx);
        }
    }

    fn on_cbw<A: MscApp>(
        &mut self,
        app: &mut A,
        ctx: &mut Context,
        config: &Config,
        completion: Completion,
    ) {
        let mut raw = [0; CBW_LEN];
        let read = ctx.read(self.ep_out, &mut raw);
        let received = completion.result == XferResult::Success
            && completion.len == CBW_LEN
            && read == CBW_LEN;
        let cbw = received
            .then(|| Cbw::parse(&raw))
            .flatten()
            .filter(|cbw| cbw.lun < app.lun_count());
        let Some(cbw) = cbw else {
            warn!("INVALID CBW");
            match config.cbw_policy {
                CbwPolicy::Rearm => {
                    if self.arm_cbw(ctx).is_err() {
                        warn!("MSC CBW NOT ARMED");
                    }
                }
                CbwPolicy::StallUntilReset => {
                    ctx.stall(self.ep_in);
                    ctx.stall(self.ep_out);
                    self.reset_lock = true;
                }
            }
            return;
        };

        trace!("CBW TAG {} OP {} LEN {}", cbw.tag, cbw.command[0], cbw.total_bytes);
        self.cbw = cbw;
        self.csw = Csw {
            tag: cbw.tag,
            residue: 0,
            status: CswStatus::Passed,
        };
        self.stage = Stage::Data;
        self.total_len = cbw.total_bytes as usize;
        self.transferred = 0;

        match cbw.command[0] {
            opcode::READ_10 => self.start_read10(app, ctx),
            opcode::WRITE_10 => self.start_write10(app, ctx),
            _ => self.start_command(app, ctx),
        }
    }

    /// Leave the DATA stage
    ///
    /// Stalls the data endpoint when the device moved less than the host
    /// expected.
    fn enter_status(&mut self, ctx: &mut Context) {
        self.stage = Stage::Status;
        if (self.transferred as u32) < self.cbw.total_bytes {
            let ep = match self.cbw.direction {
                UsbDirection::In => self.ep_in,
                UsbDirection::Out => self.ep_out,
            };
            if !ctx.is_stalled(ep) {
                ctx.stall(ep);
            }
        }
    }

    fn start_command<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context) {
        let lun = self.cbw.lun;
        let command = self.cbw.command;

        if self.cbw.total_bytes == 0 {
            self.total_len = 0;
            if let Err(sense) = app.scsi(lun, &command, &mut []) {
                self.fail(sense);
            }
            self.enter_status(ctx);
            return;
        }

        let limit = self.total_len.min(BUF);
        if self.cbw.direction == UsbDirection::Out {
            if ctx.xfer_out(self.ep_out, limit).is_err() {
                self.fail(Sense::INVALID_COMMAND);
                self.enter_status(ctx);
            }
            return;
        }

        let reply = match self.builtin(app) {
            Some(len) => Ok(len),
            None => app.scsi(lun, &command, &mut self.buffer[..limit]),
        };
        match reply {
            Ok(len) => {
                assert!(len <= limit, "SCSI reply exceeds its buffer");
                self.total_len = len;
                if len == 0 {
                    self.enter_status(ctx);
                } else if ctx.xfer_in(self.ep_in, &self.buffer[..len]).is_err() {
                    self.fail(Sense::INVALID_COMMAND);
                    self.enter_status(ctx);
                }
            }
            Err(sense) => {
                self.fail(sense);
                self.total_len = 0;
                self.enter_status(ctx);
            }
        }
    }

    /// Answer a built-in command into the buffer
    ///
    /// Responses are truncated to the host's allocation.
    fn builtin<A: MscApp>(&mut self, app: &mut A) -> Option<usize> {
        let lun = self.cbw.lun;
        let limit = self.total_len.min(BUF);
        let buffer = &mut self.buffer[..limit];
        let len = match self.cbw.command[0] {
            opcode::INQUIRY => put(buffer, &scsi::inquiry(&app.inquiry(lun))),
            opcode::READ_CAPACITY_10 => put(buffer, &scsi::read_capacity10(&app.capacity(lun))),
            opcode::READ_FORMAT_CAPACITY => {
                put(buffer, &scsi::read_format_capacity(&app.capacity(lun)))
            }
            opcode::MODE_SENSE_6 => put(buffer, &scsi::mode_sense6(!app.is_writable(lun))),
            opcode::REQUEST_SENSE => {
                let len = put(buffer, &scsi::request_sense(self.sense));
                self.sense = Sense::NONE;
                len
            }
            _ => return None,
        };
        Some(len)
    }

    /// Check a READ(10) / WRITE(10) against its CBW, and find the block size
    ///
    /// On a mismatch, the command is finished, and this returns `None`.
    fn check_rdwr10(&mut self, ctx: &mut Context, direction: UsbDirection) -> Option<u32> {
        let blocks = scsi::rdwr10_block_count(&self.cbw.command) as u32;
        let total = self.cbw.total_bytes;

        if total == 0 {
            // The host expects no data. That's only right if there's none.
            if blocks != 0 {
                self.csw.status = CswStatus::PhaseError;
            }
            self.enter_status(ctx);
            return None;
        }
        if self.cbw.direction != direction {
            self.csw.status = CswStatus::PhaseError;
            self.enter_status(ctx);
            return None;
        }
        let block_size = if blocks == 0 { 0 } else { total / blocks };
        if block_size == 0 {
            self.fail(Sense::INVALID_FIELD);
            self.enter_status(ctx);
            return None;
        }
        Some(block_size)
    }

    /// Position of the next chunk: block, and offset into that block
    fn position(&self) -> (u32, u32) {
        let transferred = self.transferred as u32;
        let lba = scsi::rdwr10_lba(&self.cbw.command).wrapping_add(transferred / self.block_size);
        (lba, transferred % self.block_size)
    }

    fn start_read10<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context) {
        let Some(block_size) = self.check_rdwr10(ctx, UsbDirection::In) else {
            return;
        };
        self.block_size = block_size;
        self.read10(app, ctx);
    }

    fn read10<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context) {
        let (lba, offset) = self.position();
        let len = BUF.min(self.total_len - self.transferred);
        match app.read10(self.cbw.lun, lba, offset, &mut self.buffer[..len]) {
            Ok(0) => self.retry(ctx, self.ep_in, 0),
            Ok(produced) => {
                assert!(produced <= len, "read10 exceeds its buffer");
                if ctx.xfer_in(self.ep_in, &self.buffer[..produced]).is_err() {
                    self.fail(Sense::INVALID_COMMAND);
                    self.enter_status(ctx);
                }
            }
            Err(sense) => {
                self.fail(sense);
                self.enter_status(ctx);
            }
        }
    }

    fn start_write10<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context) {
        let Some(block_size) = self.check_rdwr10(ctx, UsbDirection::Out) else {
            return;
        };
        if !app.is_writable(self.cbw.lun) {
            self.fail(Sense::WRITE_PROTECTED);
            self.enter_status(ctx);
            return;
        }
        self.block_size = block_size;
        self.receive_chunk(ctx);
    }

    /// Arm the next chunk of host data
    fn receive_chunk(&mut self, ctx: &mut Context) {
        let len = BUF.min(self.total_len - self.transferred);
        if ctx.xfer_out(self.ep_out, len).is_err() {
            self.fail(Sense::INVALID_COMMAND);
            self.enter_status(ctx);
        }
    }

    /// Hand `len` buffered bytes to the application
    fn write10<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context, len: usize) {
        let (lba, offset) = self.position();
        match app.write10(self.cbw.lun, lba, offset, &self.buffer[..len]) {
            Ok(consumed) if consumed < len => {
                self.transferred += consumed;
                self.buffer.copy_within(consumed..len, 0);
                self.retry(ctx, self.ep_out, len - consumed);
            }
            Ok(_) => {
                self.transferred += len;
                if self.transferred >= self.total_len {
                    self.enter_status(ctx);
                } else {
                    self.receive_chunk(ctx);
                }
            }
            Err(sense) => {
                self.fail(sense);
                self.enter_status(ctx);
            }
        }
    }

    fn on_data<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context, completion: Completion) {
        match self.cbw.direction {
            UsbDirection::Out => {
                if completion.ep != self.ep_out {
                    return;
                }
                let len = if completion.deferred {
                    completion.len.min(BUF)
                } else {
                    let len = completion.len.min(BUF);
                    ctx.read(self.ep_out, &mut self.buffer[..len])
                };
                if self.cbw.command[0] == opcode::WRITE_10 {
                    self.write10(app, ctx, len);
                    return;
                }

                let command = self.cbw.command;
                let result = app.scsi(self.cbw.lun, &command, &mut self.buffer[..len]);
                self.transferred += len;
                if let Err(sense) = result {
                    self.fail(sense);
                    self.enter_status(ctx);
                } else if self.transferred >= self.total_len || len == 0 {
                    self.enter_status(ctx);
                } else {
                    self.receive_chunk(ctx);
                }
            }
            UsbDirection::In => {
                if completion.ep != self.ep_in {
                    return;
                }
                self.transferred += completion.len;
                if self.transferred >= self.total_len {
                    self.enter_status(ctx);
                } else if self.cbw.command[0] == opcode::READ_10 {
                    self.read10(app, ctx);
                } else {
                    // Only READ(10) sends more than one chunk.
                    self.enter_status(ctx);
                }
            }
        }
    }

    /// Send the CSW, unless the host still has to clear a stall
    fn status<A: MscApp>(&mut self, app: &mut A, ctx: &mut Context) {
        if ctx.is_stalled(self.ep_in) || ctx.is_stalled(self.ep_out) {
            self.retry(ctx, self.ep_out, 0);
            return;
        }

        let lun = self.cbw.lun;
        match self.cbw.command[0] {
            opcode::READ_10 => app.read10_complete(lun),
            opcode::WRITE_10 => app.write10_complete(lun),
            _ => app.scsi_complete(lun, &self.cbw.command),
        }

        self.csw.residue = self.cbw.total_bytes.saturating_sub(self.transferred as u32);
        trace!(
            "CSW TAG {} STATUS {} RESIDUE {}",
            self.csw.tag,
            self.csw.status as u8,
            self.csw.residue
        );
        self.stage = Stage::Cmd;
        if ctx.xfer_in(self.ep_in, &self.csw.to_bytes()).is_err() {
            warn!("MSC CSW NOT SENT");
        }
        if self.arm_cbw(ctx).is_err() {
            warn!("MSC CBW NOT ARMED");
        }
    }

    /// The host cleared a halt on one of our endpoints
    fn on_clear_halt(&mut self, ctx: &mut Context, ep: EndpointAddress) {
        if self.reset_lock {
            ctx.stall(ep);
        } else if ep == self.ep_out
            && self.stage == Stage::Cmd
            && !ctx.is_busy(ep)
            && self.arm_cbw(ctx).is_err()
        {
            warn!("MSC CBW NOT ARMED");
        }
    }
}

/// A mass storage class driver
///
/// `BUF` is the size of each interface's data buffer, and the largest chunk
/// of a READ(10) / WRITE(10). `ITFS` is the number of mass storage interfaces
/// this driver can open at once. A handle is an interface's slot, in
/// `0..ITFS`.
pub struct Msc<A, const BUF: usize = 512, const ITFS: usize = 1> {
    app: A,
    config: Config,
    interfaces: [Option<Interface<BUF>>; ITFS],
    /// GET_MAX_LUN reply
    reply: [u8; 1],
}

impl<A: MscApp, const BUF: usize, const ITFS: usize> Msc<A, BUF, ITFS> {
    /// # Panics
    ///
    /// Panics if `BUF` can't hold the largest built-in response.
    pub fn new(app: A) -> Self {
        Self::with_config(app, Config::default())
    }

    pub fn with_config(app: A, config: Config) -> Self {
        assert!(BUF >= 36, "MSC buffer can't hold an INQUIRY response");
        Msc {
            app,
            config,
            interfaces: core::array::from_fn(|_| None),
            reply: [0],
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// The handle of the opened interface `number`
    pub fn handle(&self, number: u8) -> Option<usize> {
        self.interfaces
            .iter()
            .position(|itf| itf.as_ref().map(|itf| itf.number) == Some(number))
    }

    /// Indicates if `handle` names an opened interface
    pub fn is_ready(&self, handle: usize) -> bool {
        matches!(self.interfaces.get(handle), Some(Some(_)))
    }

    /// Set the sense data that the next REQUEST SENSE reports
    ///
    /// Returns `false` if `handle` isn't open.
    pub fn set_sense(&mut self, handle: usize, key: u8, asc: u8, ascq: u8) -> bool {
        match self.interfaces.get_mut(handle) {
            Some(Some(itf)) => {
                itf.sense = Sense::new(key, asc, ascq);
                true
            }
            _ => false,
        }
    }

    /// The current sense data of `handle`
    pub fn sense(&self, handle: usize) -> Option<Sense> {
        self.interfaces.get(handle)?.as_ref().map(|itf| itf.sense)
    }

    /// The BOT stage of `handle`
    pub fn stage(&self, handle: usize) -> Option<Stage> {
        self.interfaces.get(handle)?.as_ref().map(|itf| itf.stage)
    }

    fn by_endpoint(&mut self, ep: EndpointAddress) -> Option<&mut Interface<BUF>> {
        self.interfaces
            .iter_mut()
            .flatten()
            .find(|itf| itf.ep_in == ep || itf.ep_out == ep)
    }
}

impl<A: MscApp, const BUF: usize, const ITFS: usize> Class for Msc<A, BUF, ITFS> {
    fn name(&self) -> &'static str {
        "MSC"
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
        if interface.class != INTERFACE_CLASS {
            return Err(Error::UnsupportedInterface);
        }
        if interface.subclass != SUBCLASS_SCSI || interface.protocol != PROTOCOL_BOT {
            return Err(Error::UnsupportedProtocol);
        }
        let slot = self
            .interfaces
            .iter()
            .position(Option::is_none)
            .ok_or(Error::UnsupportedInterface)?;

        let mut iter = DescriptorIter::new(descriptors);
        let mut consumed = iter.next().ok_or(Error::InvalidDescriptor)?.len();
        let mut ep_in: Option<EndpointDescriptor> = None;
        let mut ep_out: Option<EndpointDescriptor> = None;
        for descriptor in iter {
            match descriptor_type(descriptor) {
                Some(kind::INTERFACE | kind::INTERFACE_ASSOCIATION) => break,
                Some(kind::ENDPOINT) => {
                    let endpoint = EndpointDescriptor::parse(descriptor)?;
                    if endpoint.ep_type != EndpointType::Bulk {
                        return Err(Error::InvalidDescriptor);
                    }
                    match endpoint.address.direction() {
                        UsbDirection::In => ep_in = Some(endpoint),
                        UsbDirection::Out => ep_out = Some(endpoint),
                    }
                }
                _ => {}
            }
            consumed += descriptor.len();
            if ep_in.is_some() && ep_out.is_some() {
                break;
            }
        }
        let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) else {
            return Err(Error::InvalidDescriptor);
        };

        ctx.open_endpoint(&ep_in)?;
        ctx.open_endpoint(&ep_out)?;
        let mut itf = Interface::new(interface.number, ep_in.address, ep_out.address);
        itf.arm_cbw(ctx)?;
        self.interfaces[slot] = Some(itf);
        Ok(consumed)
    }

    fn control_request(&mut self, ctx: &mut Context, request: &Request) -> ControlReply<'_> {
        match (request.request_type, request.recipient) {
            (RequestType::Standard, Recipient::Endpoint) => {
                let ep = EndpointAddress::from(request.index_low());
                if request.is_standard(standard::CLEAR_FEATURE)
                    && request.value == feature::ENDPOINT_HALT
                {
                    if let Some(itf) = self.by_endpoint(ep) {
                        itf.on_clear_halt(ctx, ep);
                    }
                }
                ControlReply::Status
            }
            (RequestType::Class, _) => {
                let lun_count = self.app.lun_count();
                let Some(handle) = self.handle(request.index_low()) else {
                    return ControlReply::Reject;
                };
                let Some(itf) = self.interfaces[handle].as_mut() else {
                    return ControlReply::Reject;
                };
                match request.request {
                    REQ_RESET if request.direction == UsbDirection::Out && request.length == 0 => {
                        itf.reset(ctx);
                        ControlReply::Status
                    }
                    REQ_GET_MAX_LUN
                        if request.direction == UsbDirection::In && request.length != 0 =>
                    {
                        self.reply[0] = lun_count.saturating_sub(1);
                        ControlReply::In(&self.reply)
                    }
                    _ => ControlReply::Reject,
                }
            }
            _ => ControlReply::Reject,
        }
    }

    fn xfer_complete(&mut self, ctx: &mut Context, completion: Completion) {
        let Some(itf) = self
            .interfaces
            .iter_mut()
            .flatten()
            .find(|itf| itf.ep_in == completion.ep || itf.ep_out == completion.ep)
        else {
            return;
        };
        itf.on_complete(&mut self.app, ctx, &self.config, completion);
    }

    fn close(&mut self) {
        for itf in self.interfaces.iter_mut() {
            *itf = None;
        }
    }
}

#[cfg(test)]
mod tests;
