//! Test doubles: a recording controller, a RAM disk, and a host that
//! drives the device through its events

extern crate std;

use crate::{
    class::Class,
    dcd::Dcd,
    descriptor::EndpointDescriptor,
    device::Device,
    event::{Completion, Event},
    msc::{
        scsi::{opcode, sense_key, Capacity, InquiryFields, Sense},
        MscApp,
    },
};
use std::{collections::VecDeque, vec::Vec};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

pub fn ep(index: usize, direction: UsbDirection) -> EndpointAddress {
    EndpointAddress::from_parts(index, direction)
}

pub fn ep0_in() -> EndpointAddress {
    ep(0, UsbDirection::In)
}

pub fn ep0_out() -> EndpointAddress {
    ep(0, UsbDirection::Out)
}

/// Something the stack asked the controller to do
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Op {
    Open(EndpointAddress),
    CloseAll,
    XferIn(EndpointAddress, Vec<u8>),
    XferOut(EndpointAddress, usize),
    Stall(EndpointAddress),
    ClearStall(EndpointAddress),
    SetAddress(u8),
    RemoteWakeup,
}

/// A controller that records every call
///
/// Queued transfers wait until a test takes them. OUT data that the test
/// "receives" is staged with [`queue_out`](MockDcd::queue_out), and copied
/// out by `edpt_read`.
#[derive(Default)]
pub struct MockDcd {
    pub ops: Vec<Op>,
    pub address_before_status: bool,
    pub refuse_open: bool,
    ins: VecDeque<(EndpointAddress, Vec<u8>)>,
    outs: VecDeque<(EndpointAddress, usize)>,
    rx: Vec<(EndpointAddress, VecDeque<u8>)>,
    stalled: Vec<EndpointAddress>,
}

impl MockDcd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest queued IN transfer on `ep`
    pub fn take_in(&mut self, ep: EndpointAddress) -> Option<Vec<u8>> {
        let position = self.ins.iter().position(|(addr, _)| *addr == ep)?;
        self.ins.remove(position).map(|(_, data)| data)
    }

    /// Take the oldest armed OUT transfer on `ep`, returning its length
    pub fn take_out_len(&mut self, ep: EndpointAddress) -> Option<usize> {
        let position = self.outs.iter().position(|(addr, _)| *addr == ep)?;
        self.outs.remove(position).map(|(_, len)| len)
    }

    /// Number of IN transfers queued on `ep`
    pub fn pending_in(&self, ep: EndpointAddress) -> usize {
        self.ins.iter().filter(|(addr, _)| *addr == ep).count()
    }

    /// Number of OUT transfers armed on `ep`
    pub fn pending_out(&self, ep: EndpointAddress) -> usize {
        self.outs.iter().filter(|(addr, _)| *addr == ep).count()
    }

    /// Stage bytes that the host sent on `ep`
    pub fn queue_out(&mut self, ep: EndpointAddress, data: &[u8]) {
        match self.rx.iter_mut().find(|(addr, _)| *addr == ep) {
            Some((_, pending)) => pending.extend(data.iter().copied()),
            None => self.rx.push((ep, data.iter().copied().collect())),
        }
    }

    /// The host clears a stall without a control transfer, like a
    /// controller does for EP0 when a SETUP arrives
    pub fn unstall(&mut self, ep: EndpointAddress) {
        self.stalled.retain(|addr| *addr != ep);
    }
}

impl Dcd for MockDcd {
    fn set_address(&mut self, address: u8) {
        self.ops.push(Op::SetAddress(address));
    }

    fn set_address_before_status(&self) -> bool {
        self.address_before_status
    }

    fn edpt_open(&mut self, descriptor: &EndpointDescriptor) -> bool {
        if self.refuse_open {
            return false;
        }
        self.ops.push(Op::Open(descriptor.address));
        true
    }

    fn edpt_close_all(&mut self) {
        self.ops.push(Op::CloseAll);
        self.ins.retain(|(addr, _)| addr.index() == 0);
        self.outs.retain(|(addr, _)| addr.index() == 0);
        self.stalled.retain(|addr| addr.index() == 0);
    }

    fn edpt_xfer_in(&mut self, ep: EndpointAddress, data: &[u8]) -> bool {
        self.ops.push(Op::XferIn(ep, data.to_vec()));
        self.ins.push_back((ep, data.to_vec()));
        true
    }

    fn edpt_xfer_out(&mut self, ep: EndpointAddress, len: usize) -> bool {
        self.ops.push(Op::XferOut(ep, len));
        self.outs.push_back((ep, len));
        true
    }

    fn edpt_read(&mut self, ep: EndpointAddress, buffer: &mut [u8]) -> usize {
        let Some((_, pending)) = self.rx.iter_mut().find(|(addr, _)| *addr == ep) else {
            return 0;
        };
        let len = buffer.len().min(pending.len());
        for (dst, src) in buffer.iter_mut().zip(pending.drain(..len)) {
            *dst = src;
        }
        len
    }

    fn edpt_stall(&mut self, ep: EndpointAddress) {
        self.ops.push(Op::Stall(ep));
        if !self.stalled.contains(&ep) {
            self.stalled.push(ep);
        }
    }

    fn edpt_clear_stall(&mut self, ep: EndpointAddress) {
        self.ops.push(Op::ClearStall(ep));
        self.unstall(ep);
    }

    fn edpt_is_stalled(&self, ep: EndpointAddress) -> bool {
        self.stalled.contains(&ep)
    }

    fn remote_wakeup(&mut self) {
        self.ops.push(Op::RemoteWakeup);
    }
}

/// Plays the host side of the bus
pub struct Host<'d, 'a, const N: usize> {
    pub device: &'d mut Device<'a, N>,
    pub dcd: MockDcd,
}

impl<'d, 'a, const N: usize> Host<'d, 'a, N> {
    pub fn new(device: &'d mut Device<'a, N>) -> Self {
        Host {
            device,
            dcd: MockDcd::new(),
        }
    }

    pub fn post(&mut self, event: Event) {
        self.device.post(event).unwrap();
    }

    /// One task call
    pub fn task(&mut self, classes: &mut [&mut dyn Class]) {
        self.device.task(&mut self.dcd, classes);
    }

    /// Task until no events are left, at most `limit` calls
    ///
    /// Returns the number of calls.
    pub fn settle(&mut self, classes: &mut [&mut dyn Class], limit: usize) -> usize {
        let mut calls = 0;
        while self.device.has_events() && calls < limit {
            self.task(classes);
            calls += 1;
        }
        calls
    }

    pub fn complete(&mut self, ep: EndpointAddress, len: usize, classes: &mut [&mut dyn Class]) {
        self.post(Event::XferComplete(Completion::new(ep, len)));
        self.task(classes);
    }

    fn ep0_stalled(&self) -> bool {
        self.dcd.edpt_is_stalled(ep0_in()) || self.dcd.edpt_is_stalled(ep0_out())
    }

    fn begin(&mut self, setup: [u8; 8], classes: &mut [&mut dyn Class]) {
        // Controllers clear an EP0 stall when a SETUP arrives.
        self.dcd.unstall(ep0_in());
        self.dcd.unstall(ep0_out());
        self.post(Event::Setup(setup));
        self.task(classes);
    }

    /// Run a control transfer with an IN DATA stage, or with no DATA stage
    ///
    /// Returns the DATA stage bytes, or `None` if the device stalled.
    pub fn control_in(
        &mut self,
        setup: [u8; 8],
        classes: &mut [&mut dyn Class],
    ) -> Option<Vec<u8>> {
        self.begin(setup, classes);
        let mut data = Vec::new();
        loop {
            if self.ep0_stalled() {
                return None;
            }
            if let Some(packet) = self.dcd.take_in(ep0_in()) {
                let len = packet.len();
                data.extend(packet);
                self.complete(ep0_in(), len, classes);
            } else if let Some(len) = self.dcd.take_out_len(ep0_out()) {
                assert_eq!(len, 0, "expected an OUT status stage");
                self.complete(ep0_out(), 0, classes);
                return Some(data);
            } else {
                panic!("control transfer stalled without STALL");
            }
        }
    }

    /// Run a control transfer with an OUT DATA stage, or with no DATA stage
    ///
    /// Returns `true` if the device acknowledged the STATUS stage.
    pub fn control_out(
        &mut self,
        setup: [u8; 8],
        data: &[u8],
        classes: &mut [&mut dyn Class],
    ) -> bool {
        self.begin(setup, classes);
        let mut offset = 0;
        loop {
            if self.ep0_stalled() {
                return false;
            }
            if let Some(packet) = self.dcd.take_in(ep0_in()) {
                assert!(packet.is_empty(), "expected an IN status stage");
                self.complete(ep0_in(), 0, classes);
                return true;
            } else if let Some(len) = self.dcd.take_out_len(ep0_out()) {
                let len = len.min(data.len() - offset);
                self.dcd.queue_out(ep0_out(), &data[offset..offset + len]);
                offset += len;
                self.complete(ep0_out(), len, classes);
            } else {
                panic!("control transfer stalled without STALL");
            }
        }
    }

    /// The host sends `data` on a bulk OUT endpoint with an armed transfer
    ///
    /// Returns `false` if nothing was armed.
    pub fn bulk_out(
        &mut self,
        ep: EndpointAddress,
        data: &[u8],
        classes: &mut [&mut dyn Class],
    ) -> bool {
        let Some(len) = self.dcd.take_out_len(ep) else {
            return false;
        };
        let len = len.min(data.len());
        self.dcd.queue_out(ep, &data[..len]);
        self.complete(ep, len, classes);
        true
    }

    /// The host reads one queued bulk IN transfer
    pub fn bulk_in(
        &mut self,
        ep: EndpointAddress,
        classes: &mut [&mut dyn Class],
    ) -> Option<Vec<u8>> {
        let data = self.dcd.take_in(ep)?;
        self.complete(ep, data.len(), classes);
        Some(data)
    }
}

/// Builds SETUP packets
pub fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let [value_lo, value_hi] = value.to_le_bytes();
    let [index_lo, index_hi] = index.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        request_type,
        request,
        value_lo,
        value_hi,
        index_lo,
        index_hi,
        length_lo,
        length_hi,
    ]
}

/// A RAM disk
///
/// Knobs let tests make the application slow, or failing.
pub struct RamDisk {
    pub data: Vec<u8>,
    pub block_size: u32,
    pub writable: bool,
    /// `read10` answers "not ready" this many times first.
    pub not_ready: usize,
    /// `read10` fails.
    pub fail_reads: bool,
    /// The next `write10` consumes at most this many bytes.
    pub write_limit: Option<usize>,
    pub reads: Vec<(u32, u32, usize)>,
    pub writes: Vec<(u32, u32, usize)>,
    pub completions: Vec<&'static str>,
    /// Bytes received by the vendor OUT command.
    pub vendor_data: Vec<u8>,
}

/// An IN command that returns four bytes
pub const VENDOR_IN: u8 = 0xC0;
/// An OUT command that records its data
pub const VENDOR_OUT: u8 = 0xC1;

impl RamDisk {
    pub fn new(blocks: usize, block_size: u32) -> Self {
        RamDisk {
            data: (0..blocks * block_size as usize).map(|i| i as u8).collect(),
            block_size,
            writable: true,
            not_ready: 0,
            fail_reads: false,
            write_limit: None,
            reads: Vec::new(),
            writes: Vec::new(),
            completions: Vec::new(),
            vendor_data: Vec::new(),
        }
    }

    fn offset(&self, lba: u32, offset: u32) -> usize {
        (lba * self.block_size + offset) as usize
    }
}

impl MscApp for RamDisk {
    fn inquiry(&mut self, _: u8) -> InquiryFields {
        InquiryFields::new("usbd", "RAM disk", "0.1")
    }

    fn capacity(&mut self, _: u8) -> Capacity {
        Capacity {
            block_count: self.data.len() as u32 / self.block_size,
            block_size: self.block_size,
        }
    }

    fn is_writable(&mut self, _: u8) -> bool {
        self.writable
    }

    fn read10(&mut self, _: u8, lba: u32, offset: u32, buffer: &mut [u8]) -> Result<usize, Sense> {
        self.reads.push((lba, offset, buffer.len()));
        if self.not_ready > 0 {
            self.not_ready -= 1;
            return Ok(0);
        }
        if self.fail_reads {
            return Err(Sense::new(sense_key::MEDIUM_ERROR, 0x11, 0x00));
        }
        let start = self.offset(lba, offset);
        buffer.copy_from_slice(&self.data[start..start + buffer.len()]);
        Ok(buffer.len())
    }

    fn write10(&mut self, _: u8, lba: u32, offset: u32, data: &[u8]) -> Result<usize, Sense> {
        let len = match self.write_limit.take() {
            Some(limit) => limit.min(data.len()),
            None => data.len(),
        };
        self.writes.push((lba, offset, len));
        let start = self.offset(lba, offset);
        self.data[start..start + len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn scsi(&mut self, _: u8, command: &[u8; 16], buffer: &mut [u8]) -> Result<usize, Sense> {
        match command[0] {
            opcode::TEST_UNIT_READY
            | opcode::PREVENT_ALLOW_MEDIUM_REMOVAL
            | opcode::START_STOP_UNIT => Ok(0),
            VENDOR_IN => {
                let reply = [1, 2, 3, 4];
                let len = reply.len().min(buffer.len());
                buffer[..len].copy_from_slice(&reply[..len]);
                Ok(len)
            }
            VENDOR_OUT => {
                self.vendor_data.extend_from_slice(buffer);
                Ok(buffer.len())
            }
            _ => Err(Sense::INVALID_COMMAND),
        }
    }

    fn read10_complete(&mut self, _: u8) {
        self.completions.push("read10");
    }

    fn write10_complete(&mut self, _: u8) {
        self.completions.push("write10");
    }

    fn scsi_complete(&mut self, _: u8, _: &[u8; 16]) {
        self.completions.push("scsi");
    }
}
