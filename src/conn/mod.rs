pub mod authentication;
mod wire_channel;
mod wire_crypt;

#[cfg(feature = "async")]
pub use self::wire_channel::AsyncWireChannel;
#[cfg(feature = "sync")]
pub use self::wire_channel::WireChannel;

pub use self::wire_crypt::{Arc4, CIPHER_NAME, SESSION_KEY_NAME};
