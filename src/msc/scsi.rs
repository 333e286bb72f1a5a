//! SCSI commands, sense data, and the built-in responses

/// SCSI operation codes
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    pub const READ_FORMAT_CAPACITY: u8 = 0x23;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
}

/// Sense keys
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
}

/// Sense data: key, additional sense code, and qualifier
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    pub const NONE: Sense = Sense::new(sense_key::NO_SENSE, 0, 0);
    /// ILLEGAL REQUEST, invalid command operation code
    pub const INVALID_COMMAND: Sense = Sense::new(sense_key::ILLEGAL_REQUEST, 0x20, 0x00);
    /// ILLEGAL REQUEST, invalid field in CDB
    pub const INVALID_FIELD: Sense = Sense::new(sense_key::ILLEGAL_REQUEST, 0x24, 0x00);
    /// ILLEGAL REQUEST, LBA out of range
    pub const LBA_OUT_OF_RANGE: Sense = Sense::new(sense_key::ILLEGAL_REQUEST, 0x21, 0x00);
    /// DATA PROTECT, write protected
    pub const WRITE_PROTECTED: Sense = Sense::new(sense_key::DATA_PROTECT, 0x27, 0x00);
    /// NOT READY, medium not present
    pub const MEDIUM_NOT_PRESENT: Sense = Sense::new(sense_key::NOT_READY, 0x3A, 0x00);

    pub const fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Sense { key, asc, ascq }
    }
}

/// Identification strings for the INQUIRY response
///
/// Each field is space padded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InquiryFields {
    pub vendor_id: [u8; 8],
    pub product_id: [u8; 16],
    pub product_rev: [u8; 4],
}

const fn pad<const N: usize>(text: &str) -> [u8; N] {
    let text = text.as_bytes();
    let mut field = [b' '; N];
    let mut i = 0;
    while i < N && i < text.len() {
        field[i] = text[i];
        i += 1;
    }
    field
}

impl InquiryFields {
    /// Truncates or pads each string to its field
    pub const fn new(vendor_id: &str, product_id: &str, product_rev: &str) -> Self {
        InquiryFields {
            vendor_id: pad(vendor_id),
            product_id: pad(product_id),
            product_rev: pad(product_rev),
        }
    }
}

/// A logical unit's size
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Capacity {
    pub block_count: u32,
    pub block_size: u32,
}

/// Standard INQUIRY data for a removable direct-access device
pub fn inquiry(fields: &InquiryFields) -> [u8; 36] {
    let mut data = [0; 36];
    data[1] = 0x80; // removable
    data[2] = 0x02; // SPC-2
    data[3] = 0x02; // response data format
    data[4] = 36 - 5;
    data[8..16].copy_from_slice(&fields.vendor_id);
    data[16..32].copy_from_slice(&fields.product_id);
    data[32..36].copy_from_slice(&fields.product_rev);
    data
}

pub fn read_capacity10(capacity: &Capacity) -> [u8; 8] {
    let mut data = [0; 8];
    data[0..4].copy_from_slice(&capacity.block_count.saturating_sub(1).to_be_bytes());
    data[4..8].copy_from_slice(&capacity.block_size.to_be_bytes());
    data
}

pub fn read_format_capacity(capacity: &Capacity) -> [u8; 12] {
    let mut data = [0; 12];
    data[3] = 8; // capacity list length
    data[4..8].copy_from_slice(&capacity.block_count.to_be_bytes());
    data[8] = 2; // formatted media
    data[9..12].copy_from_slice(&capacity.block_size.to_be_bytes()[1..]);
    data
}

pub fn mode_sense6(write_protected: bool) -> [u8; 4] {
    [3, 0, if write_protected { 0x80 } else { 0 }, 0]
}

/// Fixed-format sense data
pub fn request_sense(sense: Sense) -> [u8; 18] {
    let mut data = [0; 18];
    data[0] = 0xF0; // valid, current errors
    data[2] = sense.key;
    data[7] = 18 - 8;
    data[12] = sense.asc;
    data[13] = sense.ascq;
    data
}

/// READ(10) / WRITE(10) logical block address
pub fn rdwr10_lba(command: &[u8; 16]) -> u32 {
    u32::from_be_bytes([command[2], command[3], command[4], command[5]])
}

/// READ(10) / WRITE(10) transfer length, in blocks
pub fn rdwr10_block_count(command: &[u8; 16]) -> u16 {
    u16::from_be_bytes([command[7], command[8]])
}
