//! Private PKI: a root CA with email, TLS and code-signing subordinates,
//! fronted by an RFC 8555 ACME order machine.

pub mod acme;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod pki;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AcmeErrorKind, AcmeProblem, PkiError, PkiResult};
