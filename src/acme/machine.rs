use super::nonce::{NonceAuthority, random_token};
use super::order::{AcmeAuthorization, AcmeChallenge, AcmeOrder};
use super::types::{
    AccountStatus, AcmeAccount, AuthorizationStatus, CertificateRef, CertificateSigningRequest,
    ChallengeType, Lifecycle, NewAccount, NewOrder, OrderStatus,
};
use super::validator::{ChallengeValidator, ValidationOutcome, ValidationTask};
use crate::clock::Clock;
use crate::config::{AcmeConfig, deadline};
use crate::crypto::check_public_key;
use crate::error::{PkiError, PkiResult};
use crate::pki::{
    CaClass, CaHierarchy, CertificateProfile, CertificateRecord, DistinguishedName, Identifier,
    IdentifierKind, IssuanceRequest, RevocationReason, validate_identifier,
};
use crate::storage::StateStore;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const ACCOUNTS: &str = "accounts";
const ORDERS: &str = "orders";
const ID_BYTES: usize = 12;
const TOKEN_BYTES: usize = 32;

/// Result of one `sweep_expired` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_nonces: usize,
    pub orders_checked: usize,
    pub invalid_orders: usize,
    /// Orders whose refresh could not be applied this pass.
    pub failed_orders: usize,
    /// Invalid orders dropped after their retention window.
    pub evicted_orders: usize,
}

/// RFC 8555 account, order, authorization and challenge handling in front
/// of a [`CaHierarchy`].
///
/// Each order sits behind its own mutex; every access first applies due
/// expiry, then mutates a copy, persists it, and only then replaces the
/// live order. Accounts and orders are written through to the store.
pub struct AcmeOrderMachine {
    config: AcmeConfig,
    hierarchy: Arc<CaHierarchy>,
    nonces: NonceAuthority,
    validator: Arc<dyn ChallengeValidator>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    accounts: RwLock<HashMap<String, AcmeAccount>>,
    orders: RwLock<HashMap<String, Arc<Mutex<AcmeOrder>>>>,
    /// authorization id -> order id
    authorizations: RwLock<HashMap<String, String>>,
    /// challenge id -> (order id, authorization id)
    challenges: RwLock<HashMap<String, (String, String)>>,
    /// certificate -> account that ordered it
    certificates: RwLock<HashMap<CertificateRef, String>>,
}

impl AcmeOrderMachine {
    /// Opens the machine, reloading any accounts and orders in `store`.
    pub async fn open(
        config: AcmeConfig,
        hierarchy: Arc<CaHierarchy>,
        validator: Arc<dyn ChallengeValidator>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> PkiResult<Self> {
        config.validate()?;
        let nonces = NonceAuthority::new(
            config.max_outstanding_nonces,
            config.nonce_validity(),
            clock.clone(),
        )?;

        let mut accounts = HashMap::new();
        for document in store.load_documents(ACCOUNTS).await? {
            let account: AcmeAccount = serde_json::from_value(document)?;
            accounts.insert(account.id.clone(), account);
        }

        let mut orders = HashMap::new();
        let mut authorizations = HashMap::new();
        let mut challenges = HashMap::new();
        let mut certificates = HashMap::new();
        for document in store.load_documents(ORDERS).await? {
            let order: AcmeOrder = serde_json::from_value(document)?;
            for authz in &order.authorizations {
                authorizations.insert(authz.id.clone(), order.id.clone());
                for challenge in &authz.challenges {
                    challenges.insert(challenge.id.clone(), (order.id.clone(), authz.id.clone()));
                }
            }
            if let Some(certificate) = order.certificate {
                certificates.insert(certificate, order.account_id.clone());
            }
            orders.insert(order.id.clone(), Arc::new(Mutex::new(order)));
        }
        if !accounts.is_empty() || !orders.is_empty() {
            log::info!(
                "restored {} ACME accounts and {} orders",
                accounts.len(),
                orders.len()
            );
        }

        Ok(Self {
            config,
            hierarchy,
            nonces,
            validator,
            store,
            clock,
            accounts: RwLock::new(accounts),
            orders: RwLock::new(orders),
            authorizations: RwLock::new(authorizations),
            challenges: RwLock::new(challenges),
            certificates: RwLock::new(certificates),
        })
    }

    pub fn hierarchy(&self) -> &Arc<CaHierarchy> {
        &self.hierarchy
    }

    pub async fn new_nonce(&self) -> String {
        self.nonces.issue().await
    }

    pub async fn consume_nonce(&self, nonce: &str) -> PkiResult<()> {
        self.nonces.consume(nonce).await
    }

    /// Registers the key, or returns the account it already has. The flag is
    /// true when a new account was created.
    pub async fn new_account(
        &self,
        nonce: &str,
        public_key: &[u8],
        request: NewAccount,
    ) -> PkiResult<(AcmeAccount, bool)> {
        self.consume_nonce(nonce).await?;
        check_public_key(public_key)?;
        let id = thumbprint(public_key);

        let mut accounts = self.accounts.write().await;
        if let Some(existing) = accounts.get(&id) {
            return Ok((existing.clone(), false));
        }
        if request.only_return_existing {
            return Err(PkiError::AccountDoesNotExist);
        }
        validate_contacts(&request.contact)?;
        if self.config.terms_of_service.is_some() && !request.terms_of_service_agreed {
            return Err(PkiError::Malformed(
                "the terms of service must be agreed to".into(),
            ));
        }

        let account = AcmeAccount {
            id: id.clone(),
            public_key: public_key.to_vec(),
            contact: request.contact,
            status: AccountStatus::Valid,
            terms_of_service_agreed: request.terms_of_service_agreed,
            created_at: self.clock.now(),
        };
        self.persist_account(&account).await?;
        accounts.insert(id, account.clone());
        log::info!("created ACME account {}", account.id);
        Ok((account, true))
    }

    pub async fn account(&self, account_id: &str) -> PkiResult<AcmeAccount> {
        self.accounts
            .read()
            .await
            .get(account_id)
            .cloned()
            .ok_or(PkiError::AccountDoesNotExist)
    }

    pub async fn update_account(
        &self,
        nonce: &str,
        account_id: &str,
        contact: Vec<String>,
    ) -> PkiResult<AcmeAccount> {
        self.consume_nonce(nonce).await?;
        validate_contacts(&contact)?;
        self.modify_account(account_id, |account| {
            account.ensure_valid()?;
            account.contact = contact;
            Ok(())
        })
        .await
    }

    pub async fn deactivate_account(&self, nonce: &str, account_id: &str) -> PkiResult<AcmeAccount> {
        self.consume_nonce(nonce).await?;
        let account = self
            .modify_account(account_id, |account| {
                account.status.advance(AccountStatus::Deactivated)
            })
            .await?;
        log::info!("deactivated ACME account {}", account_id);
        Ok(account)
    }

    async fn modify_account(
        &self,
        account_id: &str,
        change: impl FnOnce(&mut AcmeAccount) -> PkiResult<()>,
    ) -> PkiResult<AcmeAccount> {
        let mut accounts = self.accounts.write().await;
        let mut draft = accounts
            .get(account_id)
            .cloned()
            .ok_or(PkiError::AccountDoesNotExist)?;
        change(&mut draft)?;
        self.persist_account(&draft).await?;
        accounts.insert(draft.id.clone(), draft.clone());
        Ok(draft)
    }

    async fn valid_account(&self, account_id: &str) -> PkiResult<AcmeAccount> {
        let account = self.account(account_id).await?;
        account.ensure_valid()?;
        Ok(account)
    }

    pub async fn new_order(
        &self,
        nonce: &str,
        account_id: &str,
        request: NewOrder,
    ) -> PkiResult<AcmeOrder> {
        self.consume_nonce(nonce).await?;
        self.valid_account(account_id).await?;

        let identifiers = self.check_order_identifiers(&request.identifiers)?;
        let class = route(&identifiers)?;
        let ca = self.hierarchy.ca_by_class(class).map_err(|_| {
            PkiError::UnsupportedIdentifier(format!("no CA is provisioned for {} orders", class))
        })?;
        if let Some(wildcard) = identifiers.iter().find(|i| i.is_wildcard()) {
            if !ca.policy().allow_wildcard {
                return Err(PkiError::RejectedIdentifier(format!(
                    "wildcard names are not issued: {}",
                    wildcard.value
                )));
            }
        }
        if let (Some(start), Some(end)) = (request.not_before, request.not_after) {
            if end <= start {
                return Err(PkiError::Malformed("notAfter must be later than notBefore".into()));
            }
        }

        let now = self.clock.now();
        let expires = deadline(now, self.config.order_lifetime())?;
        let authz_expires = deadline(now, self.config.authorization_lifetime())?.min(expires);
        let order_id = random_token(ID_BYTES);
        let mut authorizations = Vec::with_capacity(identifiers.len());
        for identifier in &identifiers {
            let challenges: Vec<AcmeChallenge> =
                offered_challenges(identifier, &self.config.challenge_types)
                    .into_iter()
                    .map(|kind| {
                        AcmeChallenge::new(random_token(ID_BYTES), kind, random_token(TOKEN_BYTES))
                    })
                    .collect();
            if challenges.is_empty() {
                return Err(PkiError::UnsupportedIdentifier(format!(
                    "no enabled challenge type can validate {}",
                    identifier
                )));
            }
            authorizations.push(AcmeAuthorization {
                id: random_token(ID_BYTES),
                order_id: order_id.clone(),
                identifier: identifier.clone(),
                status: AuthorizationStatus::Pending,
                wildcard: identifier.is_wildcard(),
                expires: authz_expires,
                challenges,
            });
        }

        let order = AcmeOrder {
            id: order_id.clone(),
            account_id: account_id.to_string(),
            status: OrderStatus::Pending,
            identifiers,
            ca: class,
            not_before: request.not_before,
            not_after: request.not_after,
            expires,
            authorizations,
            processing_since: None,
            certificate: None,
            error: None,
        };
        self.persist_order(&order).await?;

        {
            let mut index = self.authorizations.write().await;
            let mut challenges = self.challenges.write().await;
            for authz in &order.authorizations {
                index.insert(authz.id.clone(), order_id.clone());
                for challenge in &authz.challenges {
                    challenges.insert(challenge.id.clone(), (order_id.clone(), authz.id.clone()));
                }
            }
        }
        self.orders
            .write()
            .await
            .insert(order_id.clone(), Arc::new(Mutex::new(order.clone())));
        log::info!(
            "account {} opened order {} for {} identifiers",
            account_id,
            order_id,
            order.identifiers.len()
        );
        Ok(order)
    }

    /// Normalizes, deduplicates and syntax-checks the requested names. More
    /// than one failure is reported as a single compound problem.
    fn check_order_identifiers(&self, requested: &[Identifier]) -> PkiResult<Vec<Identifier>> {
        if requested.is_empty() {
            return Err(PkiError::Malformed("an order needs at least one identifier".into()));
        }
        let mut seen = BTreeSet::new();
        let mut identifiers = Vec::with_capacity(requested.len());
        let mut failures = Vec::new();
        for identifier in requested.iter().map(Identifier::normalized) {
            if !seen.insert(identifier.clone()) {
                continue;
            }
            match validate_identifier(&identifier) {
                Ok(()) => identifiers.push(identifier),
                Err(err) => failures.push((identifier, err)),
            }
        }

        match failures.len() {
            0 => Ok(identifiers),
            1 => Err(failures.remove(0).1),
            _ => Err(PkiError::Compound(
                failures
                    .into_iter()
                    .map(|(identifier, err)| err.problem().with_identifier(identifier))
                    .collect(),
            )),
        }
    }

    async fn order_handle(&self, order_id: &str) -> PkiResult<Arc<Mutex<AcmeOrder>>> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| PkiError::not_found("order", order_id))
    }

    /// Runs `change` against a refreshed copy of the order under its lock and
    /// commits the copy once persisted. Expiry applied by the refresh is kept
    /// even if `change` fails.
    async fn with_order<T>(
        &self,
        order_id: &str,
        change: impl FnOnce(&mut AcmeOrder, DateTime<Utc>) -> PkiResult<T>,
    ) -> PkiResult<T> {
        let handle = self.order_handle(order_id).await?;
        let mut live = handle.lock().await;
        let now = self.clock.now();

        let mut draft = live.clone();
        if draft.refresh(now, self.processing_bound())? {
            self.persist_order(&draft).await?;
            log::debug!("order {} refreshed to {}", draft.id, draft.status);
            *live = draft.clone();
        }

        let value = change(&mut draft, now)?;
        if draft != *live {
            self.persist_order(&draft).await?;
            *live = draft;
        }
        Ok(value)
    }

    /// A processing order still unfinished after this long is given up on.
    fn processing_bound(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.finalize_timeout() * 2)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub async fn order(&self, order_id: &str) -> PkiResult<AcmeOrder> {
        self.with_order(order_id, |order, _| Ok(order.clone())).await
    }

    pub async fn orders_for(&self, account_id: &str) -> Vec<String> {
        let handles: Vec<_> = self.orders.read().await.values().cloned().collect();
        let mut ids = Vec::new();
        for handle in handles {
            let order = handle.lock().await;
            if order.account_id == account_id {
                ids.push(order.id.clone());
            }
        }
        ids
    }

    async fn order_of_authorization(&self, authorization_id: &str) -> PkiResult<String> {
        self.authorizations
            .read()
            .await
            .get(authorization_id)
            .cloned()
            .ok_or_else(|| PkiError::not_found("authorization", authorization_id))
    }

    pub async fn authorization(&self, authorization_id: &str) -> PkiResult<AcmeAuthorization> {
        let order_id = self.order_of_authorization(authorization_id).await?;
        self.with_order(&order_id, |order, _| {
            Ok(order.authorization_mut(authorization_id)?.clone())
        })
        .await
    }

    /// Marks the challenge processing and hands it to the validator on a
    /// separate task. The outcome arrives through `complete_challenge`.
    pub async fn respond_challenge(
        self: &Arc<Self>,
        nonce: &str,
        account_id: &str,
        challenge_id: &str,
    ) -> PkiResult<AcmeChallenge> {
        self.consume_nonce(nonce).await?;
        let account = self.valid_account(account_id).await?;
        let (order_id, authz_id) = self.challenge_location(challenge_id).await?;

        let (challenge, identifier) = self
            .with_order(&order_id, |order, _| {
                ensure_owner(order, account_id)?;
                let authz = order.authorization_mut(&authz_id)?;
                let challenge = authz.start_challenge(challenge_id)?;
                Ok((challenge, authz.identifier.clone()))
            })
            .await?;

        let task = ValidationTask {
            order_id,
            authorization_id: authz_id,
            challenge_id: challenge.id.clone(),
            kind: challenge.kind,
            identifier,
            key_authorization: format!("{}.{}", challenge.token, account.id),
            token: challenge.token.clone(),
        };
        log::debug!("dispatching {} validation for {}", task.kind, task.identifier);
        let machine = Arc::clone(self);
        tokio::spawn(async move {
            let challenge_id = task.challenge_id.clone();
            let outcome = machine.validator.validate(task).await;
            if let Err(err) = machine.complete_challenge(&challenge_id, outcome).await {
                log::warn!("could not record outcome of challenge {}: {}", challenge_id, err);
            }
        });
        Ok(challenge)
    }

    async fn challenge_location(&self, challenge_id: &str) -> PkiResult<(String, String)> {
        self.challenges
            .read()
            .await
            .get(challenge_id)
            .cloned()
            .ok_or_else(|| PkiError::not_found("challenge", challenge_id))
    }

    /// Records a validator result and re-derives authorization and order status.
    pub async fn complete_challenge(
        &self,
        challenge_id: &str,
        outcome: ValidationOutcome,
    ) -> PkiResult<AcmeChallenge> {
        let (order_id, authz_id) = self.challenge_location(challenge_id).await?;
        let challenge = self
            .with_order(&order_id, |order, now| {
                let challenge = order
                    .authorization_mut(&authz_id)?
                    .record_outcome(challenge_id, outcome, now)?;
                order.recompute()?;
                Ok(challenge)
            })
            .await?;
        log::info!(
            "challenge {} of order {} is {}",
            challenge_id,
            order_id,
            challenge.status
        );
        Ok(challenge)
    }

    pub async fn deactivate_authorization(
        &self,
        nonce: &str,
        account_id: &str,
        authorization_id: &str,
    ) -> PkiResult<AcmeAuthorization> {
        self.consume_nonce(nonce).await?;
        self.valid_account(account_id).await?;
        let order_id = self.order_of_authorization(authorization_id).await?;
        self.with_order(&order_id, |order, _| {
            ensure_owner(order, account_id)?;
            let authz = order.authorization_mut(authorization_id)?;
            authz.status.advance(AuthorizationStatus::Deactivated)?;
            let authz = authz.clone();
            order.recompute()?;
            Ok(authz)
        })
        .await
    }

    /// Server-side withdrawal of a valid authorization.
    pub async fn revoke_authorization(&self, authorization_id: &str) -> PkiResult<AcmeAuthorization> {
        let order_id = self.order_of_authorization(authorization_id).await?;
        let authz = self
            .with_order(&order_id, |order, _| {
                let authz = order.authorization_mut(authorization_id)?;
                authz.status.advance(AuthorizationStatus::Revoked)?;
                let authz = authz.clone();
                order.recompute()?;
                Ok(authz)
            })
            .await?;
        log::warn!("revoked authorization {} for {}", authorization_id, authz.identifier);
        Ok(authz)
    }

    /// Moves a ready order to processing, issues outside the order lock under
    /// the finalize timeout, then settles the order as valid or invalid.
    pub async fn finalize(
        &self,
        nonce: &str,
        account_id: &str,
        order_id: &str,
        csr: CertificateSigningRequest,
    ) -> PkiResult<AcmeOrder> {
        self.consume_nonce(nonce).await?;
        self.valid_account(account_id).await?;

        let (class, request) = self
            .with_order(order_id, |order, now| {
                ensure_owner(order, account_id)?;
                if !order.can_finalize() {
                    return Err(PkiError::OrderNotReady {
                        order: order.id.clone(),
                        status: order.status.to_string(),
                    });
                }
                check_csr_identifiers(order, &csr)?;
                let request = issuance_request(order, &csr, now, &self.config);
                order.begin_processing(now)?;
                Ok(request)
            })
            .await?;

        let limit = self.config.finalize_timeout();
        let issued = match tokio::time::timeout(limit, self.hierarchy.issue(class, request)).await {
            Ok(result) => result,
            Err(_) => Err(PkiError::IssuanceTimeout(limit)),
        };

        match issued {
            Ok(record) => {
                let certificate = CertificateRef {
                    ca: record.issuer,
                    serial: record.serial,
                };
                // the owner is known before the order settles
                self.certificates
                    .write()
                    .await
                    .insert(certificate, account_id.to_string());
                let settled = self
                    .with_order(order_id, |order, _| {
                        order.complete(certificate)?;
                        Ok(order.clone())
                    })
                    .await;
                match settled {
                    Ok(order) => {
                        log::info!(
                            "order {} finalized with certificate {}",
                            order_id,
                            record.serial
                        );
                        Ok(order)
                    }
                    Err(err) => {
                        log::error!(
                            "order {} could not take certificate {}: {}",
                            order_id,
                            record.serial,
                            err
                        );
                        if let Err(revoke_err) = self
                            .hierarchy
                            .revoke(record.issuer, record.serial, RevocationReason::Superseded)
                            .await
                        {
                            log::error!(
                                "orphaned certificate {} left unrevoked: {}",
                                record.serial,
                                revoke_err
                            );
                        }
                        Err(err)
                    }
                }
            }
            Err(err) => {
                log::warn!("finalization of order {} failed: {}", order_id, err);
                let problem = err.problem();
                if let Err(settle_err) = self
                    .with_order(order_id, |order, _| {
                        if order.status == OrderStatus::Processing {
                            order.fail(problem)?;
                        }
                        Ok(())
                    })
                    .await
                {
                    log::error!("could not mark order {} invalid: {}", order_id, settle_err);
                }
                Err(err)
            }
        }
    }

    /// PEM chain for a valid order's certificate, leaf first.
    pub async fn certificate(&self, account_id: &str, order_id: &str) -> PkiResult<String> {
        let certificate = self
            .with_order(order_id, |order, _| {
                ensure_owner(order, account_id)?;
                order.certificate.ok_or_else(|| {
                    PkiError::Malformed(format!("order {} has no certificate", order.id))
                })
            })
            .await?;
        let record = self
            .hierarchy
            .find(certificate.ca, certificate.serial)
            .await?;
        self.hierarchy.chain_pem(&record)
    }

    /// Revokes a certificate on behalf of the account whose order produced it.
    /// `reason` is the CRL reason code; absent means unspecified.
    pub async fn revoke_certificate(
        &self,
        nonce: &str,
        account_id: &str,
        certificate: CertificateRef,
        reason: Option<u8>,
    ) -> PkiResult<CertificateRecord> {
        self.consume_nonce(nonce).await?;
        self.valid_account(account_id).await?;
        let owner = self.certificates.read().await.get(&certificate).cloned();
        if owner.as_deref() != Some(account_id) {
            return Err(PkiError::Unauthorized(format!(
                "account {} did not order certificate {}",
                account_id, certificate.serial
            )));
        }
        let ca = self.hierarchy.ca_by_class(certificate.ca)?;
        ca.revoke_with_code(certificate.serial, reason.unwrap_or(0))
            .await
    }

    /// Drops stale nonces, applies due expiry to every order and evicts invalid
    /// orders whose retention window has passed. A failing order is logged and
    /// skipped.
    pub async fn sweep_expired(&self) -> PkiResult<SweepReport> {
        let mut report = SweepReport {
            expired_nonces: self.nonces.sweep_expired().await,
            ..SweepReport::default()
        };
        let retention = self.config.order_retention();
        let ids: Vec<String> = self.orders.read().await.keys().cloned().collect();
        for id in ids {
            let order = match self.order(&id).await {
                Ok(order) => order,
                Err(err) => {
                    log::warn!("sweep could not refresh order {}: {}", id, err);
                    report.failed_orders += 1;
                    continue;
                }
            };
            report.orders_checked += 1;
            if order.status != OrderStatus::Invalid {
                continue;
            }
            report.invalid_orders += 1;
            let expired_for_good = order
                .expires
                .checked_add_signed(retention)
                .is_some_and(|limit| self.clock.now() >= limit);
            if expired_for_good {
                match self.evict_order(&order).await {
                    Ok(()) => report.evicted_orders += 1,
                    Err(err) => {
                        log::warn!("sweep could not evict order {}: {}", id, err);
                        report.failed_orders += 1;
                    }
                }
            }
        }
        log::debug!("sweep: {:?}", report);
        Ok(report)
    }

    async fn evict_order(&self, order: &AcmeOrder) -> PkiResult<()> {
        self.store.delete_document(ORDERS, &order.id).await?;
        self.orders.write().await.remove(&order.id);
        let mut authorizations = self.authorizations.write().await;
        let mut challenges = self.challenges.write().await;
        for authz in &order.authorizations {
            authorizations.remove(&authz.id);
            for challenge in &authz.challenges {
                challenges.remove(&challenge.id);
            }
        }
        log::info!("evicted invalid order {}", order.id);
        Ok(())
    }

    async fn persist_order(&self, order: &AcmeOrder) -> PkiResult<()> {
        self.store
            .put_document(ORDERS, &order.id, serde_json::to_value(order)?)
            .await
    }

    async fn persist_account(&self, account: &AcmeAccount) -> PkiResult<()> {
        self.store
            .put_document(ACCOUNTS, &account.id, serde_json::to_value(account)?)
            .await
    }
}

/// Base64url SHA-256 of the raw account key, used as the account id.
pub fn thumbprint(public_key: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(public_key))
}

fn validate_contacts(contacts: &[String]) -> PkiResult<()> {
    for contact in contacts {
        let address = contact.strip_prefix("mailto:").ok_or_else(|| {
            PkiError::InvalidContact(format!("only mailto: contacts are supported: {}", contact))
        })?;
        validate_identifier(&Identifier::email(address))
            .map_err(|_| PkiError::InvalidContact(format!("invalid mailbox {:?}", address)))?;
    }
    Ok(())
}

fn ensure_owner(order: &AcmeOrder, account_id: &str) -> PkiResult<()> {
    if order.account_id != account_id {
        return Err(PkiError::Unauthorized(format!(
            "order {} belongs to another account",
            order.id
        )));
    }
    Ok(())
}

/// Email orders go to the email CA; DNS and IP orders to the TLS CA.
fn route(identifiers: &[Identifier]) -> PkiResult<CaClass> {
    let email = identifiers
        .iter()
        .filter(|i| i.kind == IdentifierKind::Email)
        .count();
    match email {
        0 => Ok(CaClass::Tls),
        n if n == identifiers.len() => Ok(CaClass::Email),
        _ => Err(PkiError::UnsupportedIdentifier(
            "email identifiers cannot be combined with DNS or IP identifiers".into(),
        )),
    }
}

fn offered_challenges(identifier: &Identifier, enabled: &[ChallengeType]) -> Vec<ChallengeType> {
    let candidates: &[ChallengeType] = match identifier.kind {
        IdentifierKind::Dns if identifier.is_wildcard() => &[ChallengeType::Dns01],
        IdentifierKind::Dns => &[
            ChallengeType::Http01,
            ChallengeType::Dns01,
            ChallengeType::TlsAlpn01,
        ],
        IdentifierKind::Ip => &[ChallengeType::Http01, ChallengeType::TlsAlpn01],
        IdentifierKind::Email => &[ChallengeType::EmailReply00],
    };
    candidates
        .iter()
        .copied()
        .filter(|kind| enabled.contains(kind))
        .collect()
}

fn check_csr_identifiers(order: &AcmeOrder, csr: &CertificateSigningRequest) -> PkiResult<()> {
    let requested: BTreeSet<Identifier> = csr.identifiers.iter().map(Identifier::normalized).collect();
    let ordered: BTreeSet<Identifier> = order.identifiers.iter().cloned().collect();
    if requested != ordered {
        return Err(PkiError::BadCsr(
            "CSR identifiers do not match the order identifiers".into(),
        ));
    }
    Ok(())
}

fn issuance_request(
    order: &AcmeOrder,
    csr: &CertificateSigningRequest,
    now: DateTime<Utc>,
    config: &AcmeConfig,
) -> (CaClass, IssuanceRequest) {
    let not_before = order.not_before.unwrap_or(now);
    let ttl = match order.not_after {
        Some(not_after) => not_after - not_before,
        None => config.default_ttl(),
    };
    let subject = csr.subject.clone().unwrap_or_else(|| {
        DistinguishedName::new(
            order
                .identifiers
                .first()
                .map(|i| i.value.clone())
                .unwrap_or_default(),
        )
    });
    let profile = match order.ca {
        CaClass::Email => CertificateProfile::Email,
        _ => CertificateProfile::TlsServer,
    };
    let mut request = IssuanceRequest::new(subject, csr.public_key.clone(), ttl)
        .with_identifiers(order.identifiers.iter().cloned())
        .with_profile(profile);
    if order.not_before.is_some() {
        request = request.starting_at(not_before);
    }
    (order.ca, request)
}
