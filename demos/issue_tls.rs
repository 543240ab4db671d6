//! Issues a TLS server certificate straight from the TLS CA, without ACME,
//! and checks it back against the hierarchy.

use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use pkiman::config::PkiConfig;
use pkiman::crypto::HardwareSecurityModule;
use pkiman::pki::{CaClass, CaHierarchy, DistinguishedName, Identifier, IssuanceRequest};
use pkiman::storage::MemoryStore;
use pkiman::SystemClock;
use rand::rngs::OsRng;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    println!("Direct TLS issuance demo\n");

    let hierarchy = CaHierarchy::bootstrap(
        &PkiConfig::default(),
        Arc::new(HardwareSecurityModule::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
    )
    .await?;

    let key = SigningKey::generate(&mut OsRng);
    let request = IssuanceRequest::new(
        DistinguishedName::new("example.org").with_organization("Green AS"),
        key.verifying_key().to_bytes().to_vec(),
        Duration::days(90),
    )
    .with_identifier(Identifier::dns("example.org"))
    .with_identifier(Identifier::dns("www.example.org"));

    let record = hierarchy.issue(CaClass::Tls, request).await?;
    println!("✓ Issued serial {} to {}", record.serial, record.subject);
    println!("✓ Valid {} .. {}", record.not_before, record.not_after);

    let report = hierarchy.validate(&record.to_pem(), Utc::now()).await?;
    println!("✓ Chain check: valid={} chain_error={:?}", report.valid, report.chain_error);

    print!("{}", hierarchy.chain_pem(&record)?);
    Ok(())
}
