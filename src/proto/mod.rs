//! Wire protocol between host and panel.
//!
//! ```text
//! Frame       := 0xAA LEN:u8 Payload[LEN]
//! ValueReport := 0x10 Id Value DeviceType
//! DeltaUpdate := 0x02 Device
//! ResetMatrix := 0x00
//! FullSync    := 0x01 Count Device[Count]
//! Device      := Name[16|32] Id Value DeviceType
//! ```

pub mod codec;
pub mod packet;
pub mod receiver;

pub use codec::{Codec, CodecError, FRAME_HEADER, MAX_PAYLOAD_LEN};
pub use packet::{DeviceDescriptor, DeviceType, NameWidth, Packet, PacketType, ValueReport};
pub use receiver::{DEFAULT_RX_CAPACITY, FrameReceiver, RxStats};
