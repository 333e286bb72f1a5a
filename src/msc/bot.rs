//! Bulk-Only Transport wrappers

use usb_device::UsbDirection;

/// `dCBWSignature`, "USBC"
pub const CBW_SIGNATURE: u32 = 0x4342_5355;
/// `dCSWSignature`, "USBS"
pub const CSW_SIGNATURE: u32 = 0x5342_5355;
/// Size of a command block wrapper
pub const CBW_LEN: usize = 31;
/// Size of a command status wrapper
pub const CSW_LEN: usize = 13;

/// Command Block Wrapper
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Cbw {
    pub tag: u32,
    /// `dCBWDataTransferLength`; the bytes the host expects to move.
    pub total_bytes: u32,
    /// Data direction. Meaningless when `total_bytes` is zero.
    pub direction: UsbDirection,
    pub lun: u8,
    pub command_len: u8,
    pub command: [u8; 16],
}

impl Default for Cbw {
    fn default() -> Self {
        Cbw {
            tag: 0,
            total_bytes: 0,
            direction: UsbDirection::Out,
            lun: 0,
            command_len: 0,
            command: [0; 16],
        }
    }
}

impl Cbw {
    /// Parse a CBW
    ///
    /// Returns `None` unless `bytes` is exactly [`CBW_LEN`] long, starts
    /// with [`CBW_SIGNATURE`], and carries a 1 to 16 byte command block.
    pub fn parse(bytes: &[u8]) -> Option<Cbw> {
        let bytes: &[u8; CBW_LEN] = bytes.try_into().ok()?;
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        if word(0) != CBW_SIGNATURE {
            return None;
        }
        let command_len = bytes[14] & 0x1F;
        if !(1..=16).contains(&command_len) {
            return None;
        }
        let mut command = [0; 16];
        command.copy_from_slice(&bytes[15..31]);
        Some(Cbw {
            tag: word(4),
            total_bytes: word(8),
            direction: if bytes[12] & 0x80 != 0 {
                UsbDirection::In
            } else {
                UsbDirection::Out
            },
            lun: bytes[13] & 0x0F,
            command_len,
            command,
        })
    }

    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        let mut bytes = [0; CBW_LEN];
        bytes[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.tag.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.total_bytes.to_le_bytes());
        bytes[12] = if self.direction == UsbDirection::In { 0x80 } else { 0 };
        bytes[13] = self.lun;
        bytes[14] = self.command_len;
        bytes[15..31].copy_from_slice(&self.command);
        bytes
    }
}

/// `bCSWStatus`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum CswStatus {
    Passed = 0,
    Failed = 1,
    PhaseError = 2,
}

/// Command Status Wrapper
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Csw {
    /// Echoes the CBW tag.
    pub tag: u32,
    /// `dCSWDataResidue`
    pub residue: u32,
    pub status: CswStatus,
}

impl Default for Csw {
    fn default() -> Self {
        Csw {
            tag: 0,
            residue: 0,
            status: CswStatus::Passed,
        }
    }
}

impl Csw {
    pub fn to_bytes(&self) -> [u8; CSW_LEN] {
        let mut bytes = [0; CSW_LEN];
        bytes[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.tag.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.residue.to_le_bytes());
        bytes[12] = self.status as u8;
        bytes
    }

    /// Parse a CSW, as a host would
    pub fn parse(bytes: &[u8]) -> Option<Csw> {
        let bytes: &[u8; CSW_LEN] = bytes.try_into().ok()?;
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        if word(0) != CSW_SIGNATURE {
            return None;
        }
        let status = match bytes[12] {
            0 => CswStatus::Passed,
            1 => CswStatus::Failed,
            2 => CswStatus::PhaseError,
            _ => return None,
        };
        Some(Csw {
            tag: word(4),
            residue: word(8),
            status,
        })
    }
}
