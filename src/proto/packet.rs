use std::fmt;
use std::str::FromStr;

/// Leading tag byte of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    ResetDeviceMatrix = 0x00,
    FullSync = 0x01,
    DeltaUpdate = 0x02,
    ValueReport = 0x10,
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0x00 => Ok(PacketType::ResetDeviceMatrix),
            0x01 => Ok(PacketType::FullSync),
            0x02 => Ok(PacketType::DeltaUpdate),
            0x10 => Ok(PacketType::ValueReport),
            other => Err(other),
        }
    }
}

/// Kind of controllable device. Each kind is its own id space on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceType {
    Volume = 0,
    Brightness = 1,
}

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [DeviceType::Volume, DeviceType::Brightness];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Volume => "volume",
            DeviceType::Brightness => "brightness",
        }
    }
}

impl TryFrom<u8> for DeviceType {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0 => Ok(DeviceType::Volume),
            1 => Ok(DeviceType::Brightness),
            other => Err(other),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "volume" | "vol" | "0" => Ok(DeviceType::Volume),
            "brightness" | "bri" | "1" => Ok(DeviceType::Brightness),
            other => Err(other.to_string()),
        }
    }
}

/// Width of the fixed name field in a device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameWidth {
    Short,
    #[default]
    Long,
}

impl NameWidth {
    pub fn bytes(self) -> usize {
        match self {
            NameWidth::Short => 16,
            NameWidth::Long => 32,
        }
    }

    pub fn from_bytes(n: usize) -> Option<Self> {
        match n {
            16 => Some(NameWidth::Short),
            32 => Some(NameWidth::Long),
            _ => None,
        }
    }

    /// Encoded size of one descriptor: name + id + value + type.
    pub fn descriptor_len(self) -> usize {
        self.bytes() + 3
    }
}

/// One device as the panel sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub id: u8,
    pub value: u8,
    pub device_type: DeviceType,
}

/// Panel-originated knob change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueReport {
    pub id: u8,
    pub value: u8,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    // ---- host -> panel ----
    ResetDeviceMatrix,
    FullSync(Vec<DeviceDescriptor>),
    DeltaUpdate(DeviceDescriptor),

    // ---- panel -> host ----
    ValueReport(ValueReport),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ResetDeviceMatrix => PacketType::ResetDeviceMatrix,
            Packet::FullSync(_) => PacketType::FullSync,
            Packet::DeltaUpdate(_) => PacketType::DeltaUpdate,
            Packet::ValueReport(_) => PacketType::ValueReport,
        }
    }
}
