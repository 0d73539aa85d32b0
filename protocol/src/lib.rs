//! Wire formats for talking to a voice endpoint.
//!
//! The control channel carries length-prefixed [`Packet`]s over a stream; media
//! travels as datagrams made of a [`MediaHeader`] and a payload sealed with
//! [`MediaCipher`].

mod crypto;
mod error;
mod io;
mod media;
mod packet;
mod packet_id;

pub use crypto::{MediaCipher, MODE_CHACHA20_POLY1305, SUPPORTED_MODES};
pub use error::ProtocolError;
pub use media::{encode_keepalive, parse_keepalive, MediaHeader, HEADER_LEN};
pub use packet::{Packet, SECRET_KEY_LEN};
