//! Error types for chameleon board operations

use thiserror::Error;

/// Result type alias for board handler operations
pub type Result<T> = std::result::Result<T, ChamError>;

/// Errors that can occur while configuring or operating a chameleon board
#[derive(Debug, Error)]
pub enum ChamError {
    /// Descriptor text could not be parsed
    #[error("Descriptor syntax error at line {line}: {reason}")]
    DescriptorSyntax {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// Descriptor key present but unusable (wrong type, out of range)
    #[error("Descriptor key {key}: {reason}")]
    Descriptor {
        /// Key path
        key: String,
        /// What was wrong
        reason: String,
    },

    /// Required descriptor key absent
    #[error("Missing descriptor key: {key}")]
    MissingKey {
        /// Key (or alternatives) that was expected
        key: String,
    },

    /// Manual enumeration requested but no device declared
    #[error("No devices specified in descriptor")]
    NoDevices,

    /// No function responds at a bridge-chain position
    #[error("No PCI device at {domain:04x}:{bus:02x}:{device:02x}.{function}")]
    DeviceNotFound {
        /// PCI domain
        domain: u16,
        /// Bus number
        bus: u8,
        /// Device number
        device: u8,
        /// Function number
        function: u8,
    },

    /// Bridge chain element is not a PCI-to-PCI bridge
    #[error(
        "PCI device {domain:04x}:{bus:02x}:{device:02x}.{function} is not a bridge \
         (vendor={vendor:#06x} device={device_id:#06x} header={header_type:#04x})"
    )]
    NotABridge {
        /// PCI domain
        domain: u16,
        /// Bus number
        bus: u8,
        /// Device number
        device: u8,
        /// Function number
        function: u8,
        /// Vendor id read
        vendor: u32,
        /// Device id read
        device_id: u32,
        /// Raw header type read
        header_type: u32,
    },

    /// Config-space access failed
    #[error(
        "PCI config access failed at {domain:04x}:{bus:02x}:{device:02x}.{function} \
         reg {register:#04x}: {reason}"
    )]
    PciConfigAccess {
        /// PCI domain
        domain: u16,
        /// Bus number
        bus: u8,
        /// Device number
        device: u8,
        /// Function number
        function: u8,
        /// Register offset
        register: u16,
        /// Underlying failure
        reason: String,
    },

    /// No chameleon table at the given location / address space
    #[error("Chameleon table not found: {location}")]
    TableNotFound {
        /// Where the table was searched
        location: String,
    },

    /// Chameleon table service failed
    #[error("Chameleon table error: {reason}")]
    Table {
        /// Reason for failure
        reason: String,
    },

    /// Slot number beyond board capacity
    #[error("Slot {slot} out of range (board has {capacity} slots)")]
    SlotOutOfRange {
        /// Requested slot
        slot: usize,
        /// Slot capacity
        capacity: usize,
    },

    /// Slot holds no usable module
    #[error("Slot {slot} is not occupied")]
    SlotEmpty {
        /// Requested slot
        slot: usize,
    },

    /// Group member index beyond the group's member count
    #[error("Slot {slot}: group member {member} out of range (group has {count})")]
    IllegalMember {
        /// Requested slot
        slot: usize,
        /// Requested member
        member: usize,
        /// Members in the group
        count: usize,
    },

    /// Address mode not applicable to the slot
    #[error("Slot {slot}: {reason}")]
    IllegalAddrMode {
        /// Requested slot
        slot: usize,
        /// Reason for failure
        reason: String,
    },

    /// Module has no interrupt line in the GIRQ
    #[error("Slot {slot} has no interrupt capability")]
    NoInterrupt {
        /// Requested slot
        slot: usize,
    },

    /// Register window could not be mapped
    #[error("Mapping {phys:#x} (+{size:#x}) failed: {reason}")]
    Mapping {
        /// Physical address
        phys: u64,
        /// Window size
        size: usize,
        /// Reason for failure
        reason: String,
    },

    /// GIRQ in-use bit never released
    #[error("GIRQ register block busy after {retries} retries")]
    GirqBusy {
        /// Polls performed
        retries: u32,
    },

    /// Unsupported info or status code
    #[error("Unsupported code: {code}")]
    UnknownCode {
        /// Code description
        code: String,
    },

    /// Platform service failed
    #[error("Platform error: {reason}")]
    Platform {
        /// Reason for failure
        reason: String,
    },

    /// I/O error while talking to the operating system
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl ChamError {
    /// Create a descriptor value error
    pub fn descriptor(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Descriptor {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing key error
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    /// Create a table service error
    pub fn table(reason: impl Into<String>) -> Self {
        Self::Table {
            reason: reason.into(),
        }
    }

    /// Create a table-not-found error
    pub fn table_not_found(location: impl Into<String>) -> Self {
        Self::TableNotFound {
            location: location.into(),
        }
    }

    /// Create a platform error
    pub fn platform(reason: impl Into<String>) -> Self {
        Self::Platform {
            reason: reason.into(),
        }
    }

    /// Create an unknown code error
    pub fn unknown_code(code: impl Into<String>) -> Self {
        Self::UnknownCode { code: code.into() }
    }

    /// Whether the error means "no table here" rather than a table failure
    #[must_use]
    pub const fn is_table_not_found(&self) -> bool {
        matches!(self, Self::TableNotFound { .. })
    }
}
