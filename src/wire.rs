// Canonical definitions for the on-wire format.
//
// Each UDP datagram carries exactly one protobuf-encoded `Packet`. The
// message shapes are fixed so that independent implementations interoperate:
//
//   enum PacketType { UNSPECIFIED=0; HELO=1; INITIATE_SESSION=2;
//                     ACK_SESSION=3; FRAGMENTED_DATA=4 }
//   message Packet {
//     PacketType type = 1;
//     oneof payload {
//       Helo helo = 2;
//       InitiateSession initiate_session = 3;
//       AckSession ack_session = 4;
//       FragmentedData fragmented_data = 5;
//     }
//   }

/// Largest 31-bit field value; used to probe worst-case header overhead.
pub const MAX_FIELD: u32 = i32::MAX as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PacketType {
    Unspecified = 0,
    Helo = 1,
    InitiateSession = 2,
    AckSession = 3,
    FragmentedData = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Packet {
    #[prost(enumeration = "PacketType", tag = "1")]
    pub r#type: i32,
    #[prost(oneof = "packet::Payload", tags = "2, 3, 4, 5")]
    pub payload: Option<packet::Payload>,
}

pub mod packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Helo(super::Helo),
        #[prost(message, tag = "3")]
        InitiateSession(super::InitiateSession),
        #[prost(message, tag = "4")]
        AckSession(super::AckSession),
        #[prost(message, tag = "5")]
        FragmentedData(super::FragmentedData),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Helo {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitiateSession {
    #[prost(uint32, tag = "1")]
    pub mtu: u32,
    #[prost(uint32, tag = "2")]
    pub network_mtu: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AckSession {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FragmentedData {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint32, tag = "2")]
    pub fragment: u32,
    #[prost(uint32, tag = "3")]
    pub fragment_max: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn helo() -> Self {
        Packet {
            r#type: PacketType::Helo as i32,
            payload: Some(packet::Payload::Helo(Helo {})),
        }
    }

    pub fn initiate_session(mtu: u32, network_mtu: u32) -> Self {
        Packet {
            r#type: PacketType::InitiateSession as i32,
            payload: Some(packet::Payload::InitiateSession(InitiateSession {
                mtu,
                network_mtu,
            })),
        }
    }

    pub fn ack_session(id: String) -> Self {
        Packet {
            r#type: PacketType::AckSession as i32,
            payload: Some(packet::Payload::AckSession(AckSession { id })),
        }
    }

    pub fn fragmented_data(id: u32, fragment: u32, fragment_max: u32, payload: Vec<u8>) -> Self {
        Packet {
            r#type: PacketType::FragmentedData as i32,
            payload: Some(packet::Payload::FragmentedData(FragmentedData {
                id,
                fragment,
                fragment_max,
                payload,
            })),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        PacketType::try_from(self.r#type).unwrap_or(PacketType::Unspecified)
    }
}
