mod authenticate;
mod authenticator;
mod srp;
mod user_identification;

#[cfg(feature = "async")]
pub use self::authenticate::authenticate_async;
#[cfg(feature = "sync")]
pub use self::authenticate::authenticate_sync;

pub use self::{
    authenticate::{AuthNegotiator, AuthState, AuthStep},
    authenticator::{plugin_preference, Identity},
    srp::SESSION_KEY_LENGTH,
    user_identification::normalize_login,
};
