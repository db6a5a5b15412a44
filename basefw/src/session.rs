use crate::{Error, FirmwareImage, Section};

/// Vendor id of the detachable bases this crate targets.
pub const DEFAULT_VENDOR_ID: u16 = 0x18d1;
/// Product id of the first base, used when none is given.
pub const DEFAULT_PRODUCT_ID: u16 = 0x5022;

/// Picks one base among the attached USB devices. `None` for bus or port
/// matches any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLocator {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: Option<u8>,
    pub port: Option<u8>,
}

impl DeviceLocator {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        DeviceLocator {
            vendor_id,
            product_id,
            bus: None,
            port: None,
        }
    }

    /// Restricts the locator to one bus/port.
    pub fn at(self, bus: Option<u8>, port: Option<u8>) -> Self {
        DeviceLocator { bus, port, ..self }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16, bus: u8, port: u8) -> bool {
        self.vendor_id == vendor_id
            && self.product_id == product_id
            && self.bus.map_or(true, |b| b == bus)
            && self.port.map_or(true, |p| p == port)
    }
}

impl Default for DeviceLocator {
    fn default() -> Self {
        DeviceLocator::new(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID)
    }
}

///trait to implement a firmware update backend
pub trait FirmwareUpdater {
    type Session: UpdateSession;

    /// Connects to the base. The connection is closed when the session is dropped.
    fn open(&mut self, locator: &DeviceLocator) -> Result<Self::Session, Error>;
}

/// One live connection to the base. Every call blocks until the base answers
/// or the transport times out.
pub trait UpdateSession {
    /// Section the base is executing from.
    fn current_section(&mut self) -> Result<Section, Error>;
    fn section_version(&mut self, section: Section) -> Result<String, Error>;
    fn is_section_locked(&mut self, section: Section) -> Result<bool, Error>;
    fn unlock_section(&mut self, section: Section) -> Result<(), Error>;
    /// Write-protects the section.
    fn lock_section(&mut self, section: Section) -> Result<(), Error>;
    /// Whether the base accepts this image (board, signing key, rollback).
    fn is_compatible(&mut self, image: &FirmwareImage<'_>) -> Result<bool, Error>;
    fn transfer_image(&mut self, section: Section, image: &FirmwareImage<'_>)
        -> Result<(), Error>;
    /// CRC-32 of what is stored in the section.
    fn section_checksum(&mut self, section: Section) -> Result<u32, Error>;
    fn jump_to_rw(&mut self) -> Result<(), Error>;
    fn reset(&mut self) -> Result<(), Error>;
}
