pub mod ca;
pub mod certificate;
pub mod crl;
pub mod hierarchy;
pub mod issuance;
pub mod ledger;
pub mod policy;
pub mod revocation;
pub mod serial;
pub mod validation;

pub use ca::CertificateAuthority;
pub use certificate::{
    BasicConstraints, CERTIFICATE_PEM_LABEL, CertificateRecord, CertificateStatus,
    DistinguishedName, ExtendedKeyUsage, Extensions, Identifier, IdentifierKind, KeyUsage,
    Revocation, RevocationReason, Serial, SignedCertificate, TbsCertificate,
};
pub use crl::{CRL_PEM_LABEL, Crl, CrlBuilder, CrlEntry};
pub use hierarchy::CaHierarchy;
pub use issuance::IssuanceRequest;
pub use ledger::CertificateLedger;
pub use policy::{CaClass, CertificateProfile, ClassPolicy, validate_identifier};
pub use serial::SerialAllocator;
pub use validation::ValidationReport;
