//! Machine credential lifecycle.
//!
//! Registration, login and token freshness checks. Token expiry is read from
//! the JWT payload without verifying the server signature; integrity is left
//! to TLS.

pub mod claims;
pub mod clock;
pub mod credentials;

pub use claims::{TokenClaims, token_expiry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialManager, token_is_fresh};
