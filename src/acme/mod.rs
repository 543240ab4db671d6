pub mod machine;
pub mod nonce;
pub mod order;
pub mod types;
pub mod validator;

pub use machine::{AcmeOrderMachine, SweepReport, thumbprint};
pub use nonce::NonceAuthority;
pub use order::{AcmeAuthorization, AcmeChallenge, AcmeOrder};
pub use types::{
    AccountStatus, AcmeAccount, AuthorizationStatus, CertificateRef, CertificateSigningRequest,
    ChallengeStatus, ChallengeType, Lifecycle, NewAccount, NewOrder, OrderStatus,
};
pub use validator::{AcceptAllValidator, ChallengeValidator, ValidationOutcome, ValidationTask};
