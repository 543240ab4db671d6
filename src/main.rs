use anyhow::Context;
use ed25519_dalek::SigningKey;
use pkiman::acme::{
    AcceptAllValidator, AcmeOrderMachine, CertificateRef, CertificateSigningRequest,
    ChallengeStatus, NewAccount, NewOrder, OrderStatus,
};
use pkiman::crypto::HardwareSecurityModule;
use pkiman::pki::{CaClass, CaHierarchy, Identifier, RevocationReason, SignedCertificate};
use pkiman::storage::{FileStore, MemoryStore, StateStore};
use pkiman::{Config, SystemClock};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;

/// Walks one certificate through its whole life: hierarchy bootstrap, ACME
/// account and order, challenge, finalize, revocation and CRL publication.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::var("PKIMAN_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::default(),
    };
    let store: Arc<dyn StateStore> = match std::env::var("PKIMAN_STATE_DIR") {
        Ok(dir) => Arc::new(FileStore::open(dir).await?),
        Err(_) => Arc::new(MemoryStore::new()),
    };
    let clock = Arc::new(SystemClock);
    let keys = Arc::new(HardwareSecurityModule::new());

    println!("\npkiman: private PKI with ACME\n");

    println!("[1/6] Bootstrapping CA hierarchy...");
    let hierarchy = Arc::new(
        CaHierarchy::bootstrap(&config.pki, keys.clone(), store.clone(), clock.clone())
            .await
            .context("bootstrapping hierarchy")?,
    );
    for class in hierarchy.classes() {
        let ca = hierarchy.ca_by_class(class)?;
        println!("      ✓ {} ({})", ca.name(), class);
    }
    println!();

    let machine = Arc::new(
        AcmeOrderMachine::open(
            config.acme.clone(),
            hierarchy.clone(),
            Arc::new(AcceptAllValidator),
            store.clone(),
            clock,
        )
        .await?,
    );

    println!("[2/6] Registering ACME account...");
    let account_key = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();
    let (account, _) = machine
        .new_account(
            &machine.new_nonce().await,
            &account_key,
            NewAccount {
                contact: vec!["mailto:hostmaster@green.no".into()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
        )
        .await?;
    println!("      ✓ Account {}\n", account.id);

    println!("[3/6] Ordering certificate for www.green.no...");
    let order = machine
        .new_order(
            &machine.new_nonce().await,
            &account.id,
            NewOrder::new([Identifier::dns("www.green.no")]),
        )
        .await?;
    println!(
        "      ✓ Order {} with {} authorization(s)\n",
        order.id,
        order.authorizations.len()
    );

    println!("[4/6] Answering challenges...");
    for authz in &order.authorizations {
        let challenge = authz
            .challenges
            .first()
            .context("authorization offers no challenge")?;
        machine
            .respond_challenge(&machine.new_nonce().await, &account.id, &challenge.id)
            .await?;
        loop {
            let current = machine.authorization(&authz.id).await?;
            let settled = current
                .challenge(&challenge.id)
                .is_some_and(|c| c.status != ChallengeStatus::Processing);
            if settled {
                println!("      ✓ {} is {}", current.identifier, current.status);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    println!();

    println!("[5/6] Finalizing order...");
    let certificate_key = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();
    let order = machine
        .finalize(
            &machine.new_nonce().await,
            &account.id,
            &order.id,
            CertificateSigningRequest {
                subject: None,
                identifiers: order.identifiers.clone(),
                public_key: certificate_key.to_vec(),
            },
        )
        .await?;
    anyhow::ensure!(order.status == OrderStatus::Valid, "order ended {}", order.status);
    let certificate: CertificateRef = order.certificate.context("valid order without certificate")?;
    let chain = machine.certificate(&account.id, &order.id).await?;
    println!(
        "      ✓ Certificate {} issued by {} ({} PEM blocks)\n",
        certificate.serial,
        certificate.ca,
        SignedCertificate::chain_from_pem(&chain)?.len()
    );

    println!("[6/6] Revoking and publishing CRL...");
    machine
        .revoke_certificate(
            &machine.new_nonce().await,
            &account.id,
            certificate,
            Some(RevocationReason::Superseded.code()),
        )
        .await?;
    let crl = hierarchy.build_crl(CaClass::Tls).await?;
    println!(
        "      ✓ CRL version {} lists {} revoked certificate(s)",
        crl.version(),
        crl.entries().len()
    );

    let mut index = Vec::new();
    hierarchy
        .ca_by_class(CaClass::Tls)?
        .ledger()
        .export_index(&mut index, chrono::Utc::now())
        .await?;
    println!("\nindex.txt:\n{}", String::from_utf8_lossy(&index));
    Ok(())
}
