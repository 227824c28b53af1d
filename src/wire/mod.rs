mod handshake;
mod message;

pub use handshake::Handshake;
pub use message::Message;
