use crate::error::ProtocolError;

macro_rules! packet_ids {
    ($($name:ident = $val:expr),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub(crate) enum PacketId { $($name = $val,)* }

        impl PacketId {
            pub(crate) const fn as_u8(self) -> u8 { self as u8 }
        }

        impl TryFrom<u8> for PacketId {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($val => Ok(Self::$name),)*
                    _ => Err(ProtocolError::UnknownPacketId(value)),
                }
            }
        }
    };
}

packet_ids! {
    // Client to endpoint (0x01-0x1F)
    Identify = 0x01,
    SelectProtocol = 0x02,
    Heartbeat = 0x03,
    Speaking = 0x04,
    Resume = 0x05,
    Leave = 0x06,

    // Endpoint to client (0x20-0x3F)
    Ready = 0x21,
    SessionDescription = 0x22,
    HeartbeatAck = 0x23,
    InvalidSession = 0x24,
}
