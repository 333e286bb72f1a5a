extern crate std;

use super::{
    bot::{Cbw, Csw, CswStatus},
    scsi::{opcode, sense_key},
    CbwPolicy, Config, Msc, Stage,
};
use crate::{
    class::Class,
    dcd::{Dcd, Speed},
    descriptor::Descriptors,
    device::Device,
    event::Event,
    mock::{ep, setup, Host, RamDisk, VENDOR_OUT},
};
use std::vec::Vec;
use usb_device::{endpoint::EndpointAddress, UsbDirection};

#[rustfmt::skip]
static DEVICE: [u8; 18] = [
    18, 1, 0x00, 0x02, 0, 0, 0, 64,
    0x09, 0x12, 0x01, 0x00, 0x00, 0x01,
    0, 0, 0, 1,
];

#[rustfmt::skip]
static CONFIG: [u8; 32] = [
    9, 2, 32, 0, 1, 1, 0, 0x80, 50,
    9, 4, 0, 0, 2, 0x08, 0x06, 0x50, 0,
    7, 5, 0x81, 0x02, 0x00, 0x02, 0,
    7, 5, 0x02, 0x02, 0x00, 0x02, 0,
];

static CONFIGS: [&[u8]; 1] = [&CONFIG];

type Disk = Msc<RamDisk, 512>;

fn descriptors() -> Descriptors<'static> {
    Descriptors::new(&DEVICE, &CONFIGS)
}

fn ep_in() -> EndpointAddress {
    ep(1, UsbDirection::In)
}

fn ep_out() -> EndpointAddress {
    ep(2, UsbDirection::Out)
}

fn classes(msc: &mut Disk) -> [&mut dyn Class; 1] {
    [msc]
}

fn cbw(tag: u32, total_bytes: u32, direction: UsbDirection, command: &[u8]) -> [u8; 31] {
    let mut cdb = [0; 16];
    cdb[..command.len()].copy_from_slice(command);
    Cbw {
        tag,
        total_bytes,
        direction,
        lun: 0,
        command_len: command.len() as u8,
        command: cdb,
    }
    .to_bytes()
}

fn read10(lba: u32, blocks: u16) -> [u8; 10] {
    let [a, b, c, d] = lba.to_be_bytes();
    let [hi, lo] = blocks.to_be_bytes();
    [opcode::READ_10, 0, a, b, c, d, 0, hi, lo, 0]
}

fn write10(lba: u32, blocks: u16) -> [u8; 10] {
    let mut command = read10(lba, blocks);
    command[0] = opcode::WRITE_10;
    command
}

fn enumerate(host: &mut Host<'_, '_, 16>, msc: &mut Disk) {
    host.post(Event::BusReset(Speed::High));
    host.task(&mut classes(msc));
    assert!(host.control_out(setup(0x00, 9, 1, 0, 0), &[], &mut classes(msc)));
    assert!(msc.is_ready(0));
    assert_eq!(host.dcd.pending_out(ep_out()), 1);
}

/// Send a CBW, then run any deferred work
fn send_cbw(host: &mut Host<'_, '_, 16>, msc: &mut Disk, cbw: &[u8]) {
    assert!(host.bulk_out(ep_out(), cbw, &mut classes(msc)), "no CBW armed");
    host.settle(&mut classes(msc), 8);
}

/// Read the CSW from the IN endpoint
fn read_csw(host: &mut Host<'_, '_, 16>, msc: &mut Disk) -> Csw {
    let bytes = host.bulk_in(ep_in(), &mut classes(msc)).expect("no CSW");
    Csw::parse(&bytes).expect("not a CSW")
}

/// The host clears a halt, as it does after a stalled data stage
fn clear_halt(host: &mut Host<'_, '_, 16>, msc: &mut Disk, ep: EndpointAddress) {
    let index = u8::from(ep) as u16;
    assert!(host.control_out(setup(0x02, 1, 0, index, 0), &[], &mut classes(msc)));
    host.settle(&mut classes(msc), 8);
}

#[test]
fn inquiry() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    let inquiry = [opcode::INQUIRY, 0, 0, 0, 36, 0];
    send_cbw(&mut host, &mut msc, &cbw(0xA5, 36, UsbDirection::In, &inquiry));
    assert_eq!(msc.stage(0), Some(Stage::Data));
    let data = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!(data.len(), 36);
    assert_eq!(data[1], 0x80);
    assert_eq!(&data[8..16], b"usbd    ");
    assert_eq!(&data[16..24], b"RAM disk");

    let csw = read_csw(&mut host, &mut msc);
    assert_eq!(csw.tag, 0xA5);
    assert_eq!(csw.status, CswStatus::Passed);
    assert_eq!(csw.residue, 0);
    assert_eq!(msc.stage(0), Some(Stage::Cmd));
    assert_eq!(host.dcd.pending_out(ep_out()), 1);
    assert_eq!(msc.app().completions, ["scsi"]);
}

#[test]
fn read10_in_buffer_sized_chunks() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(2, 3 * 512, UsbDirection::In, &read10(1, 3)));
    let mut data = Vec::new();
    for _ in 0..3 {
        assert_eq!(host.dcd.pending_in(ep_in()), 1);
        let chunk = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
        assert_eq!(chunk.len(), 512);
        data.extend(chunk);
    }
    assert_eq!(data, msc.app().data[512..2048]);

    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.tag, csw.status, csw.residue), (2, CswStatus::Passed, 0));
    assert_eq!(msc.app().reads, [(1, 0, 512), (2, 0, 512), (3, 0, 512)]);
    assert_eq!(msc.app().completions, ["read10"]);
}

#[test]
fn read10_not_ready_retries_later() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut disk = RamDisk::new(8, 512);
    disk.not_ready = 1;
    let mut msc = Disk::new(disk);
    enumerate(&mut host, &mut msc);

    let read = cbw(3, 512, UsbDirection::In, &read10(4, 1));
    assert!(host.bulk_out(ep_out(), &read, &mut classes(&mut msc)));
    // One deferred completion, and nothing for the host yet.
    assert!(host.device.has_events());
    assert_eq!(host.dcd.pending_in(ep_in()), 0);
    host.task(&mut classes(&mut msc));
    assert!(!host.device.has_events());
    assert_eq!(host.dcd.pending_in(ep_in()), 1);
    assert_eq!(msc.app().reads, [(4, 0, 512), (4, 0, 512)]);

    let data = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!(data, msc.app().data[2048..2560]);
    assert_eq!(read_csw(&mut host, &mut msc).status, CswStatus::Passed);
}

#[test]
fn write10_partial_consumption() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut disk = RamDisk::new(8, 512);
    disk.write_limit = Some(100);
    let mut msc = Disk::new(disk);
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(4, 512, UsbDirection::Out, &write10(0, 1)));
    assert_eq!(host.dcd.pending_out(ep_out()), 1);
    let payload: Vec<u8> = (0..512).map(|i| (i * 7) as u8).collect();
    assert!(host.bulk_out(ep_out(), &payload, &mut classes(&mut msc)));
    assert_eq!(msc.app().writes, [(0, 0, 100)]);
    assert!(host.device.has_events());

    host.task(&mut classes(&mut msc));
    assert_eq!(msc.app().writes, [(0, 0, 100), (0, 100, 412)]);
    assert_eq!(msc.app().data[..512], payload[..]);

    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.tag, csw.status, csw.residue), (4, CswStatus::Passed, 0));
    assert_eq!(msc.app().completions, ["write10"]);
}

#[test]
fn write10_partial_chunk_then_next_chunk() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut disk = RamDisk::new(8, 512);
    disk.write_limit = Some(300);
    let mut msc = Disk::new(disk);
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(7, 1024, UsbDirection::Out, &write10(2, 2)));
    let payload: Vec<u8> = (0..1024).map(|i| (i * 13 + 1) as u8).collect();
    assert!(host.bulk_out(ep_out(), &payload[..512], &mut classes(&mut msc)));
    assert_eq!(host.dcd.pending_out(ep_out()), 0);
    host.settle(&mut classes(&mut msc), 8);
    assert_eq!(msc.app().writes, [(2, 0, 300), (2, 300, 212)]);

    // The rest of the first chunk went to the disk, so the second chunk is armed.
    assert_eq!(host.dcd.pending_out(ep_out()), 1);
    assert!(host.bulk_out(ep_out(), &payload[512..], &mut classes(&mut msc)));
    assert_eq!(msc.app().writes, [(2, 0, 300), (2, 300, 212), (3, 0, 512)]);
    assert_eq!(msc.app().data[1024..2048], payload[..]);

    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.tag, csw.status, csw.residue), (7, CswStatus::Passed, 0));
    assert_eq!(msc.app().completions, ["write10"]);
}

#[test]
fn invalid_cbw_rearms() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    let mut bad = cbw(5, 0, UsbDirection::Out, &[opcode::TEST_UNIT_READY]);
    bad[0] = b'X';
    send_cbw(&mut host, &mut msc, &bad);
    assert_eq!(host.dcd.pending_in(ep_in()), 0);
    assert_eq!(host.dcd.pending_out(ep_out()), 1);
    assert_eq!(msc.stage(0), Some(Stage::Cmd));

    send_cbw(&mut host, &mut msc, &bad[..13]);
    assert_eq!(host.dcd.pending_in(ep_in()), 0);
    assert_eq!(host.dcd.pending_out(ep_out()), 1);

    // The next good CBW works as usual.
    send_cbw(&mut host, &mut msc, &cbw(6, 0, UsbDirection::Out, &[opcode::TEST_UNIT_READY]));
    assert_eq!(read_csw(&mut host, &mut msc).tag, 6);
}

#[test]
fn meaningless_cbw_rearms() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    let good = cbw(5, 0, UsbDirection::Out, &[opcode::TEST_UNIT_READY]);
    // A LUN past lun_count, then command block lengths out of range
    for (at, value) in [(13, 1), (14, 0), (14, 17)] {
        let mut bad = good;
        bad[at] = value;
        send_cbw(&mut host, &mut msc, &bad);
        assert_eq!(host.dcd.pending_in(ep_in()), 0);
        assert_eq!(host.dcd.pending_out(ep_out()), 1);
        assert_eq!(msc.stage(0), Some(Stage::Cmd));
    }
    assert!(msc.app().completions.is_empty());

    send_cbw(&mut host, &mut msc, &good);
    assert_eq!(read_csw(&mut host, &mut msc).tag, 5);
    assert_eq!(msc.app().completions, ["scsi"]);
}

#[test]
fn invalid_cbw_stalls_until_reset() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let config = Config {
        cbw_policy: CbwPolicy::StallUntilReset,
    };
    let mut msc = Disk::with_config(RamDisk::new(8, 512), config);
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &[0; 31]);
    assert!(host.dcd.edpt_is_stalled(ep_in()));
    assert!(host.dcd.edpt_is_stalled(ep_out()));

    // Clearing the halt alone doesn't help.
    clear_halt(&mut host, &mut msc, ep_in());
    assert!(host.dcd.edpt_is_stalled(ep_in()));
    assert_eq!(host.dcd.pending_out(ep_out()), 0);

    assert!(host.control_out(setup(0x21, 0xFF, 0, 0, 0), &[], &mut classes(&mut msc)));
    assert_eq!(host.dcd.pending_out(ep_out()), 1);
    clear_halt(&mut host, &mut msc, ep_in());
    clear_halt(&mut host, &mut msc, ep_out());
    assert!(!host.dcd.edpt_is_stalled(ep_in()));
    assert!(!host.dcd.edpt_is_stalled(ep_out()));
    assert_eq!(host.dcd.pending_out(ep_out()), 1);

    send_cbw(&mut host, &mut msc, &cbw(7, 0, UsbDirection::Out, &[opcode::TEST_UNIT_READY]));
    assert_eq!(read_csw(&mut host, &mut msc).status, CswStatus::Passed);
}

#[test]
fn tags_echo() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    for tag in [0, 1, 0xFFFF_FFFF, 0x1234_5678] {
        send_cbw(&mut host, &mut msc, &cbw(tag, 0, UsbDirection::Out, &[opcode::TEST_UNIT_READY]));
        let csw = read_csw(&mut host, &mut msc);
        assert_eq!((csw.tag, csw.status, csw.residue), (tag, CswStatus::Passed, 0));
        assert_eq!(msc.stage(0), Some(Stage::Cmd));
    }
}

#[test]
fn short_reply_stalls_and_reports_residue() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    let inquiry = [opcode::INQUIRY, 0, 0, 0, 64, 0];
    send_cbw(&mut host, &mut msc, &cbw(8, 64, UsbDirection::In, &inquiry));
    let data = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!(data.len(), 36);
    host.settle(&mut classes(&mut msc), 4);
    assert!(host.dcd.edpt_is_stalled(ep_in()));
    assert_eq!(host.dcd.pending_in(ep_in()), 0);

    clear_halt(&mut host, &mut msc, ep_in());
    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.tag, csw.status, csw.residue), (8, CswStatus::Passed, 28));
}

#[test]
fn read_error_fails_with_sense() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut disk = RamDisk::new(8, 512);
    disk.fail_reads = true;
    let mut msc = Disk::new(disk);
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(9, 512, UsbDirection::In, &read10(0, 1)));
    assert!(host.dcd.edpt_is_stalled(ep_in()));
    assert_eq!(host.dcd.pending_in(ep_in()), 0);
    assert_eq!(msc.stage(0), Some(Stage::Status));

    clear_halt(&mut host, &mut msc, ep_in());
    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.tag, csw.status, csw.residue), (9, CswStatus::Failed, 512));

    let request_sense = [opcode::REQUEST_SENSE, 0, 0, 0, 18, 0];
    send_cbw(&mut host, &mut msc, &cbw(10, 18, UsbDirection::In, &request_sense));
    let sense = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!((sense[2], sense[12], sense[13]), (sense_key::MEDIUM_ERROR, 0x11, 0));
    assert_eq!(read_csw(&mut host, &mut msc).status, CswStatus::Passed);

    // Reading the sense data clears it.
    send_cbw(&mut host, &mut msc, &cbw(11, 18, UsbDirection::In, &request_sense));
    let sense = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!((sense[2], sense[12], sense[13]), (sense_key::NO_SENSE, 0, 0));
    read_csw(&mut host, &mut msc);
}

#[test]
fn write_protected() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut disk = RamDisk::new(8, 512);
    disk.writable = false;
    let mut msc = Disk::new(disk);
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(12, 512, UsbDirection::Out, &write10(0, 1)));
    assert!(host.dcd.edpt_is_stalled(ep_out()));
    clear_halt(&mut host, &mut msc, ep_out());

    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.status, csw.residue), (CswStatus::Failed, 512));
    assert_eq!(msc.sense(0), Some(super::Sense::WRITE_PROTECTED));
    assert!(msc.app().writes.is_empty());
}

#[test]
fn read10_without_data_phase_is_phase_error() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(13, 0, UsbDirection::In, &read10(0, 1)));
    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.status, csw.residue), (CswStatus::PhaseError, 0));
    assert!(msc.app().reads.is_empty());
}

#[test]
fn unknown_command_fails() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(14, 0, UsbDirection::Out, &[0x5A]));
    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.status, csw.residue), (CswStatus::Failed, 0));
    assert_eq!(msc.sense(0), Some(super::Sense::INVALID_COMMAND));
}

#[test]
fn generic_out_command() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(15, 8, UsbDirection::Out, &[VENDOR_OUT]));
    assert!(host.bulk_out(ep_out(), &[8, 7, 6, 5, 4, 3, 2, 1], &mut classes(&mut msc)));
    assert_eq!(msc.app().vendor_data, [8, 7, 6, 5, 4, 3, 2, 1]);
    let csw = read_csw(&mut host, &mut msc);
    assert_eq!((csw.tag, csw.status, csw.residue), (15, CswStatus::Passed, 0));
}

#[test]
fn capacity_commands() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(16, 8, UsbDirection::In, &[opcode::READ_CAPACITY_10]));
    let data = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!(data, [0, 0, 0, 7, 0, 0, 2, 0]);
    read_csw(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(17, 4, UsbDirection::In, &[opcode::MODE_SENSE_6]));
    let data = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!(data, [3, 0, 0, 0]);
    read_csw(&mut host, &mut msc);
}

#[test]
fn class_requests() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    let max_lun = host.control_in(setup(0xA1, 0xFE, 0, 0, 1), &mut classes(&mut msc));
    assert_eq!(max_lun.as_deref(), Some(&[0][..]));

    // Wrong interface
    assert!(host.control_in(setup(0xA1, 0xFE, 0, 3, 1), &mut classes(&mut msc)).is_none());
    // Reset with a data stage
    assert!(!host.control_out(setup(0x21, 0xFF, 0, 0, 1), &[0], &mut classes(&mut msc)));
}

#[test]
fn bot_reset_returns_to_command() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);

    send_cbw(&mut host, &mut msc, &cbw(18, 1024, UsbDirection::Out, &write10(0, 2)));
    assert_eq!(msc.stage(0), Some(Stage::Data));
    assert!(host.control_out(setup(0x21, 0xFF, 0, 0, 0), &[], &mut classes(&mut msc)));
    assert_eq!(msc.stage(0), Some(Stage::Cmd));
}

#[test]
fn sense_set_by_application() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    assert!(!msc.set_sense(0, sense_key::UNIT_ATTENTION, 0x28, 0));
    enumerate(&mut host, &mut msc);
    assert!(msc.set_sense(0, sense_key::UNIT_ATTENTION, 0x28, 0));

    let request_sense = [opcode::REQUEST_SENSE, 0, 0, 0, 18, 0];
    send_cbw(&mut host, &mut msc, &cbw(19, 18, UsbDirection::In, &request_sense));
    let sense = host.bulk_in(ep_in(), &mut classes(&mut msc)).unwrap();
    assert_eq!((sense[2], sense[12]), (sense_key::UNIT_ATTENTION, 0x28));
    read_csw(&mut host, &mut msc);
}

#[test]
fn bus_reset_closes() {
    let mut device = Device::<16>::new(descriptors());
    let mut host = Host::new(&mut device);
    let mut msc = Disk::new(RamDisk::new(8, 512));
    enumerate(&mut host, &mut msc);
    assert_eq!(msc.handle(0), Some(0));

    host.post(Event::BusReset(Speed::Full));
    host.task(&mut classes(&mut msc));
    assert!(!msc.is_ready(0));
    assert_eq!(msc.stage(0), None);
}
