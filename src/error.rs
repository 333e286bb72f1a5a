//! Stack errors

/// Errors surfaced by the stack and its class drivers
///
/// None of these reach the USB host directly. The host only ever observes
/// a STALL, or a failed command status on a class that has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// A SETUP packet was too short, or used a reserved type / recipient.
    InvalidSetup,
    /// A descriptor was truncated, or had the wrong type.
    InvalidDescriptor,
    /// The class driver doesn't recognize the interface.
    UnsupportedInterface,
    /// The interface subclass / protocol isn't supported by the driver.
    UnsupportedProtocol,
    /// The controller refused to open an endpoint.
    EndpointOpen,
    /// The controller refused to queue a transfer.
    Transfer,
    /// Another driver already owns this interface number.
    InterfaceInUse,
    /// No registered driver accepted the interface.
    NoDriver,
    /// The event queue is full; the event was dropped.
    QueueFull,
}

/// Result type used throughout the stack
pub type Result<T> = core::result::Result<T, Error>;
