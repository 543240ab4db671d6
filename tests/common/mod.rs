#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use pkiman::acme::{
    AcmeAccount, AcmeOrder, AcmeOrderMachine, CertificateSigningRequest, ChallengeType,
    ChallengeValidator, NewAccount, NewOrder, ValidationOutcome, ValidationTask,
};
use pkiman::config::{AcmeConfig, PkiConfig};
use pkiman::crypto::{HardwareSecurityModule, KeyProvider};
use pkiman::pki::{CaHierarchy, Identifier};
use pkiman::storage::{MemoryStore, StateStore};
use pkiman::{ManualClock, PkiError, PkiResult};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub fn subject_key() -> Vec<u8> {
    SigningKey::generate(&mut OsRng).verifying_key().to_bytes().to_vec()
}

/// Remembers every task it is given and never answers; tests settle
/// challenges through `complete_challenge`.
#[derive(Default)]
pub struct RecordingValidator {
    tasks: Mutex<Vec<ValidationTask>>,
}

impl RecordingValidator {
    pub async fn tasks(&self) -> Vec<ValidationTask> {
        self.tasks.lock().await.clone()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<ValidationTask> {
        for _ in 0..200 {
            let tasks = self.tasks().await;
            if tasks.len() >= count {
                return tasks;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("validator never received {} tasks", count);
    }
}

#[async_trait]
impl ChallengeValidator for RecordingValidator {
    async fn validate(&self, task: ValidationTask) -> ValidationOutcome {
        self.tasks.lock().await.push(task);
        std::future::pending().await
    }
}

/// Delegates to an HSM but refuses to generate one named key.
pub struct FailingKeyProvider {
    pub inner: Arc<HardwareSecurityModule>,
    pub fail_on: &'static str,
}

#[async_trait]
impl KeyProvider for FailingKeyProvider {
    async fn generate(&self, key_id: &str) -> PkiResult<Vec<u8>> {
        if key_id == self.fail_on {
            return Err(PkiError::Signing(format!("injected failure for {}", key_id)));
        }
        self.inner.generate(key_id).await
    }

    async fn public_key(&self, key_id: &str) -> PkiResult<Vec<u8>> {
        self.inner.public_key(key_id).await
    }

    async fn sign(&self, key_id: &str, data: &[u8]) -> PkiResult<Vec<u8>> {
        self.inner.sign(key_id, data).await
    }

    async fn destroy(&self, key_id: &str) -> PkiResult<()> {
        self.inner.destroy(key_id).await
    }
}

/// Delegates to an HSM; once armed every signature takes `delay`.
pub struct SlowSigner {
    pub inner: HardwareSecurityModule,
    pub armed: AtomicBool,
    pub delay: Duration,
}

impl SlowSigner {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HardwareSecurityModule::new(),
            armed: AtomicBool::new(false),
            delay,
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyProvider for SlowSigner {
    async fn generate(&self, key_id: &str) -> PkiResult<Vec<u8>> {
        self.inner.generate(key_id).await
    }

    async fn public_key(&self, key_id: &str) -> PkiResult<Vec<u8>> {
        self.inner.public_key(key_id).await
    }

    async fn sign(&self, key_id: &str, data: &[u8]) -> PkiResult<Vec<u8>> {
        if self.armed.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.sign(key_id, data).await
    }

    async fn destroy(&self, key_id: &str) -> PkiResult<()> {
        self.inner.destroy(key_id).await
    }
}

pub async fn bootstrap(clock: Arc<ManualClock>) -> Arc<CaHierarchy> {
    Arc::new(
        CaHierarchy::bootstrap(
            &PkiConfig::default(),
            Arc::new(HardwareSecurityModule::new()),
            Arc::new(MemoryStore::new()),
            clock,
        )
        .await
        .unwrap(),
    )
}

/// A full hierarchy plus order machine on a manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub hierarchy: Arc<CaHierarchy>,
    pub machine: Arc<AcmeOrderMachine>,
    pub validator: Arc<RecordingValidator>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(AcmeConfig::default()).await
    }

    pub async fn with_config(config: AcmeConfig) -> Self {
        Self::build(config, PkiConfig::default(), Arc::new(HardwareSecurityModule::new())).await
    }

    pub async fn build(
        config: AcmeConfig,
        pki: PkiConfig,
        keys: Arc<dyn KeyProvider>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::new());
        let hierarchy = Arc::new(
            CaHierarchy::bootstrap(&pki, keys, store.clone(), clock.clone())
                .await
                .unwrap(),
        );
        let validator = Arc::new(RecordingValidator::default());
        let machine = Arc::new(
            AcmeOrderMachine::open(
                config,
                hierarchy.clone(),
                validator.clone(),
                store.clone() as Arc<dyn StateStore>,
                clock.clone(),
            )
            .await
            .unwrap(),
        );
        Self {
            clock,
            hierarchy,
            machine,
            validator,
            store,
        }
    }

    pub async fn nonce(&self) -> String {
        self.machine.new_nonce().await
    }

    pub async fn account(&self) -> AcmeAccount {
        let request = NewAccount {
            contact: vec!["mailto:admin@green.no".into()],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };
        let (account, created) = self
            .machine
            .new_account(&self.nonce().await, &subject_key(), request)
            .await
            .unwrap();
        assert!(created);
        account
    }

    pub async fn order(&self, account: &AcmeAccount, identifiers: Vec<Identifier>) -> AcmeOrder {
        self.machine
            .new_order(&self.nonce().await, &account.id, NewOrder::new(identifiers))
            .await
            .unwrap()
    }

    pub async fn dns_order(&self, account: &AcmeAccount, names: &[&str]) -> AcmeOrder {
        self.order(account, names.iter().map(|n| Identifier::dns(*n)).collect())
            .await
    }

    /// Attempts the challenge of `kind` on every authorization and reports it valid.
    pub async fn pass_all(&self, account: &AcmeAccount, order: &AcmeOrder, kind: ChallengeType) {
        for authz in &order.authorizations {
            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.kind == kind)
                .unwrap();
            self.machine
                .respond_challenge(&self.nonce().await, &account.id, &challenge.id)
                .await
                .unwrap();
            self.machine
                .complete_challenge(&challenge.id, ValidationOutcome::Valid)
                .await
                .unwrap();
        }
    }

    pub async fn finalize(
        &self,
        account: &AcmeAccount,
        order: &AcmeOrder,
    ) -> PkiResult<AcmeOrder> {
        self.machine
            .finalize(&self.nonce().await, &account.id, &order.id, csr(order))
            .await
    }
}

pub fn csr(order: &AcmeOrder) -> CertificateSigningRequest {
    CertificateSigningRequest {
        subject: None,
        identifiers: order.identifiers.clone(),
        public_key: subject_key(),
    }
}
