mod common;

use chrono::Duration;
use common::{Harness, SlowSigner, csr, subject_key};
use pkiman::acme::{
    AccountStatus, AcmeOrderMachine, AuthorizationStatus, CertificateSigningRequest,
    ChallengeStatus, ChallengeType, NewAccount, NewOrder, OrderStatus, ValidationOutcome,
    thumbprint,
};
use pkiman::config::{AcmeConfig, PkiConfig};
use pkiman::pki::{
    CaClass, CertificateProfile, Identifier, RevocationReason, SignedCertificate,
};
use pkiman::storage::StateStore;
use pkiman::{AcmeErrorKind, AcmeProblem, PkiError};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn two_name_order_runs_to_a_chained_certificate() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["a.com", "b.com"]).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.authorizations.len(), 2);
    assert_eq!(order.ca, CaClass::Tls);

    let err = h.finalize(&account, &order).await.unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::OrderNotReady);
    assert_eq!(h.machine.order(&order.id).await.unwrap().status, OrderStatus::Pending);

    h.pass_all(&account, &order, ChallengeType::Http01).await;
    assert_eq!(h.machine.order(&order.id).await.unwrap().status, OrderStatus::Ready);

    let done = h.finalize(&account, &order).await.unwrap();
    assert_eq!(done.status, OrderStatus::Valid);
    let certificate = done.certificate.unwrap();
    assert_eq!(certificate.ca, CaClass::Tls);

    let chain = h.machine.certificate(&account.id, &order.id).await.unwrap();
    let parsed = SignedCertificate::chain_from_pem(&chain).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].tbs.serial, certificate.serial);
    assert!(!chain.contains("BEGIN CERTIFICATE-----"));

    let record = h.hierarchy.find(CaClass::Tls, certificate.serial).await.unwrap();
    let mut names: Vec<_> = record.identifiers.iter().map(|i| i.value.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["a.com", "b.com"]);
}

#[tokio::test]
async fn expired_authorization_sinks_the_order() {
    let h = Harness::with_config(AcmeConfig {
        authorization_lifetime_secs: 24 * 60 * 60,
        ..AcmeConfig::default()
    })
    .await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["a.com", "b.com"]).await;

    let first = &order.authorizations[0];
    let http = first
        .challenges
        .iter()
        .find(|c| c.kind == ChallengeType::Http01)
        .unwrap();
    h.machine
        .respond_challenge(&h.nonce().await, &account.id, &http.id)
        .await
        .unwrap();
    h.machine
        .complete_challenge(&http.id, ValidationOutcome::Valid)
        .await
        .unwrap();

    h.clock.advance(Duration::days(2));

    let validated = h.machine.authorization(&first.id).await.unwrap();
    assert_eq!(validated.status, AuthorizationStatus::Expired);
    let untouched = h
        .machine
        .authorization(&order.authorizations[1].id)
        .await
        .unwrap();
    assert_eq!(untouched.status, AuthorizationStatus::Invalid);
    assert_eq!(h.machine.order(&order.id).await.unwrap().status, OrderStatus::Invalid);

    let err = h.finalize(&account, &order).await.unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::OrderNotReady);
}

#[tokio::test]
async fn nonce_is_accepted_exactly_once() {
    let h = Harness::new().await;
    let nonce = h.machine.new_nonce().await;

    let racers: Vec<_> = (0..2)
        .map(|_| {
            let machine = h.machine.clone();
            let nonce = nonce.clone();
            tokio::spawn(async move { machine.consume_nonce(&nonce).await.is_ok() })
        })
        .collect();
    let mut wins = 0;
    for racer in racers {
        if racer.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);

    let account = h.account().await;
    let used = h.nonce().await;
    h.machine
        .new_order(&used, &account.id, NewOrder::new([Identifier::dns("a.com")]))
        .await
        .unwrap();
    let err = h
        .machine
        .new_order(&used, &account.id, NewOrder::new([Identifier::dns("b.com")]))
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::BadNonce));
    assert_eq!(err.problem().status(), 400);
}

#[tokio::test]
async fn several_bad_identifiers_form_a_compound_problem() {
    let h = Harness::new().await;
    let account = h.account().await;

    let err = h
        .machine
        .new_order(
            &h.nonce().await,
            &account.id,
            NewOrder::new([
                Identifier::dns("fine.com"),
                Identifier::dns("a..b.com"),
                Identifier::dns("bad_name.com"),
            ]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::Compound);
    let problem = err.problem();
    assert_eq!(problem.subproblems.len(), 2);
    let flagged: Vec<_> = problem
        .subproblems
        .iter()
        .map(|p: &AcmeProblem| p.identifier.clone().unwrap().value)
        .collect();
    assert_eq!(flagged, vec!["a..b.com", "bad_name.com"]);

    let single = h
        .machine
        .new_order(
            &h.nonce().await,
            &account.id,
            NewOrder::new([Identifier::dns("fine.com"), Identifier::dns("bad_name.com")]),
        )
        .await
        .unwrap_err();
    assert_eq!(single.kind(), AcmeErrorKind::Malformed);
}

#[tokio::test]
async fn failed_challenge_leaves_alternatives_open() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["green.no"]).await;
    let authz = &order.authorizations[0];
    let by_kind = |kind: ChallengeType| authz.challenges.iter().find(|c| c.kind == kind).unwrap();

    let http = by_kind(ChallengeType::Http01);
    h.machine
        .respond_challenge(&h.nonce().await, &account.id, &http.id)
        .await
        .unwrap();
    h.machine
        .complete_challenge(
            &http.id,
            ValidationOutcome::Invalid(AcmeProblem::new(
                AcmeErrorKind::IncorrectResponse,
                "wrong token served",
            )),
        )
        .await
        .unwrap();

    let current = h.machine.authorization(&authz.id).await.unwrap();
    assert_eq!(current.status, AuthorizationStatus::Pending);
    let failed = current.challenge(&http.id).unwrap();
    assert_eq!(failed.status, ChallengeStatus::Invalid);
    assert_eq!(failed.error.as_ref().unwrap().kind, AcmeErrorKind::IncorrectResponse);

    let dns = by_kind(ChallengeType::Dns01);
    h.machine
        .respond_challenge(&h.nonce().await, &account.id, &dns.id)
        .await
        .unwrap();
    h.machine
        .complete_challenge(&dns.id, ValidationOutcome::Valid)
        .await
        .unwrap();
    assert_eq!(
        h.machine.authorization(&authz.id).await.unwrap().status,
        AuthorizationStatus::Valid
    );
    assert_eq!(h.machine.order(&order.id).await.unwrap().status, OrderStatus::Ready);
}

#[tokio::test]
async fn validator_receives_key_authorization() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["green.no"]).await;
    let challenge = &order.authorizations[0].challenges[0];

    let started = h
        .machine
        .respond_challenge(&h.nonce().await, &account.id, &challenge.id)
        .await
        .unwrap();
    assert_eq!(started.status, ChallengeStatus::Processing);

    let tasks = h.validator.wait_for(1).await;
    assert_eq!(tasks[0].challenge_id, challenge.id);
    assert_eq!(tasks[0].identifier, Identifier::dns("green.no"));
    assert_eq!(
        tasks[0].key_authorization,
        format!("{}.{}", challenge.token, thumbprint(&account.public_key))
    );

    // a processing challenge cannot be attempted twice
    assert_err!(
        h.machine
            .respond_challenge(&h.nonce().await, &account.id, &challenge.id)
            .await
    );
}

#[tokio::test]
async fn slow_issuance_times_out_and_invalidates_order() {
    let signer = Arc::new(SlowSigner::new(std::time::Duration::from_secs(5)));
    let h = Harness::build(
        AcmeConfig {
            finalize_timeout_ms: 50,
            ..AcmeConfig::default()
        },
        PkiConfig::default(),
        signer.clone(),
    )
    .await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["slow.green.no"]).await;
    h.pass_all(&account, &order, ChallengeType::Dns01).await;

    signer.arm();
    let err = h.finalize(&account, &order).await.unwrap_err();
    assert!(matches!(err, PkiError::IssuanceTimeout(_)));

    let settled = h.machine.order(&order.id).await.unwrap();
    assert_eq!(settled.status, OrderStatus::Invalid);
    assert!(settled.certificate.is_none());
    let problem = settled.error.unwrap();
    assert_eq!(problem.kind, AcmeErrorKind::ServerInternal);
    assert_eq!(problem.detail, AcmeErrorKind::ServerInternal.description());
}

#[tokio::test]
async fn withdrawn_authorizations_invalidate_the_order() {
    let h = Harness::new().await;
    let account = h.account().await;

    let revoked = h.dns_order(&account, &["a.green.no", "b.green.no"]).await;
    h.pass_all(&account, &revoked, ChallengeType::Http01).await;
    let authz = h
        .machine
        .revoke_authorization(&revoked.authorizations[0].id)
        .await
        .unwrap();
    assert_eq!(authz.status, AuthorizationStatus::Revoked);
    assert_eq!(h.machine.order(&revoked.id).await.unwrap().status, OrderStatus::Invalid);

    let deactivated = h.dns_order(&account, &["c.green.no"]).await;
    let pending = &deactivated.authorizations[0];
    let err = h
        .machine
        .deactivate_authorization(&h.nonce().await, &account.id, &pending.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::InvalidTransition { .. }));

    h.pass_all(&account, &deactivated, ChallengeType::Http01).await;
    let authz = h
        .machine
        .deactivate_authorization(&h.nonce().await, &account.id, &pending.id)
        .await
        .unwrap();
    assert_eq!(authz.status, AuthorizationStatus::Deactivated);
    assert_eq!(
        h.machine.order(&deactivated.id).await.unwrap().status,
        OrderStatus::Invalid
    );
}

#[tokio::test]
async fn account_registration_rules() {
    let h = Harness::with_config(AcmeConfig {
        terms_of_service: Some("https://green.no/terms".into()),
        ..AcmeConfig::default()
    })
    .await;
    let key = subject_key();
    let request = |agreed| NewAccount {
        contact: vec!["mailto:ops@green.no".into()],
        terms_of_service_agreed: agreed,
        only_return_existing: false,
    };

    let err = h
        .machine
        .new_account(&h.nonce().await, &key, request(false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::Malformed);

    let lookup = NewAccount {
        only_return_existing: true,
        ..NewAccount::default()
    };
    let err = h
        .machine
        .new_account(&h.nonce().await, &key, lookup.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::AccountDoesNotExist));

    let bad_contact = NewAccount {
        contact: vec!["tel:+4712345678".into()],
        ..request(true)
    };
    let err = h
        .machine
        .new_account(&h.nonce().await, &key, bad_contact)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::InvalidContact);

    let (account, created) = h
        .machine
        .new_account(&h.nonce().await, &key, request(true))
        .await
        .unwrap();
    assert!(created);
    assert_eq!(account.status, AccountStatus::Valid);
    assert_eq!(account.id, thumbprint(&key));

    let (again, created) = h
        .machine
        .new_account(&h.nonce().await, &key, lookup)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, account.id);

    let updated = h
        .machine
        .update_account(
            &h.nonce().await,
            &account.id,
            vec!["mailto:security@green.no".into()],
        )
        .await
        .unwrap();
    assert_eq!(updated.contact, vec!["mailto:security@green.no".to_string()]);
}

#[tokio::test]
async fn deactivated_account_is_locked_out() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["green.no"]).await;

    let account = h
        .machine
        .deactivate_account(&h.nonce().await, &account.id)
        .await
        .unwrap();
    assert_eq!(account.status, AccountStatus::Deactivated);

    let err = h
        .machine
        .new_order(&h.nonce().await, &account.id, NewOrder::new([Identifier::dns("x.com")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::Unauthorized);
    let challenge = &order.authorizations[0].challenges[0];
    assert_err!(
        h.machine
            .respond_challenge(&h.nonce().await, &account.id, &challenge.id)
            .await
    );
    assert_err!(
        h.machine
            .deactivate_account(&h.nonce().await, &account.id)
            .await
    );
}

#[tokio::test]
async fn mismatched_csr_keeps_order_ready() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["a.com", "b.com"]).await;
    h.pass_all(&account, &order, ChallengeType::TlsAlpn01).await;

    let short = CertificateSigningRequest {
        subject: None,
        identifiers: vec![Identifier::dns("a.com")],
        public_key: subject_key(),
    };
    let err = h
        .machine
        .finalize(&h.nonce().await, &account.id, &order.id, short)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::BadCsr);
    assert_eq!(h.machine.order(&order.id).await.unwrap().status, OrderStatus::Ready);

    // case and trailing dots do not count as a mismatch
    let mut request = csr(&order);
    request.identifiers = vec![Identifier::dns("B.COM."), Identifier::dns("a.com")];
    let done = assert_ok!(
        h.machine
            .finalize(&h.nonce().await, &account.id, &order.id, request)
            .await
    );
    assert_eq!(done.status, OrderStatus::Valid);
}

#[tokio::test]
async fn only_the_ordering_account_may_revoke() {
    let h = Harness::new().await;
    let owner = h.account().await;
    let stranger = h.account().await;
    let order = h.dns_order(&owner, &["owned.green.no"]).await;
    h.pass_all(&owner, &order, ChallengeType::Http01).await;
    let certificate = h.finalize(&owner, &order).await.unwrap().certificate.unwrap();

    let err = h
        .machine
        .certificate(&stranger.id, &order.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::Unauthorized);
    let err = h
        .machine
        .revoke_certificate(&h.nonce().await, &stranger.id, certificate, Some(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::Unauthorized);

    let err = h
        .machine
        .revoke_certificate(&h.nonce().await, &owner.id, certificate, Some(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::BadRevocationReason);

    let record = h
        .machine
        .revoke_certificate(&h.nonce().await, &owner.id, certificate, Some(1))
        .await
        .unwrap();
    assert_eq!(record.revocation.unwrap().reason, RevocationReason::KeyCompromise);
    let err = h
        .machine
        .revoke_certificate(&h.nonce().await, &owner.id, certificate, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::AlreadyRevoked);

    let crl = h.hierarchy.build_crl(CaClass::Tls).await.unwrap();
    assert!(crl.contains(certificate.serial));
}

#[tokio::test]
async fn orders_are_routed_by_identifier_type() {
    let h = Harness::new().await;
    let account = h.account().await;

    let wildcard = h.dns_order(&account, &["*.green.no"]).await;
    let authz = &wildcard.authorizations[0];
    assert!(authz.wildcard);
    assert!(authz.challenges.iter().all(|c| c.kind == ChallengeType::Dns01));

    let email = h
        .order(&account, vec![Identifier::email("fred@green.no")])
        .await;
    assert_eq!(email.ca, CaClass::Email);
    let kinds: Vec<_> = email.authorizations[0]
        .challenges
        .iter()
        .map(|c| c.kind)
        .collect();
    assert_eq!(kinds, vec![ChallengeType::EmailReply00]);
    h.pass_all(&account, &email, ChallengeType::EmailReply00).await;
    let certificate = h.finalize(&account, &email).await.unwrap().certificate.unwrap();
    assert_eq!(certificate.ca, CaClass::Email);
    let record = h.hierarchy.find(CaClass::Email, certificate.serial).await.unwrap();
    assert_eq!(record.profile, CertificateProfile::Email);

    let err = h
        .machine
        .new_order(
            &h.nonce().await,
            &account.id,
            NewOrder::new([Identifier::dns("green.no"), Identifier::email("fred@green.no")]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::UnsupportedIdentifier);
}

#[tokio::test]
async fn disabled_challenge_types_are_not_offered() {
    let h = Harness::with_config(AcmeConfig {
        challenge_types: vec![ChallengeType::Http01],
        ..AcmeConfig::default()
    })
    .await;
    let account = h.account().await;

    let order = h.dns_order(&account, &["green.no"]).await;
    let kinds: Vec<_> = order.authorizations[0]
        .challenges
        .iter()
        .map(|c| c.kind)
        .collect();
    assert_eq!(kinds, vec![ChallengeType::Http01]);

    let err = h
        .machine
        .new_order(
            &h.nonce().await,
            &account.id,
            NewOrder::new([Identifier::dns("*.green.no")]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::UnsupportedIdentifier);
}

#[tokio::test]
async fn sweep_reports_expired_orders_and_nonces() {
    let h = Harness::new().await;
    let account = h.account().await;
    let stale = h.dns_order(&account, &["stale.green.no"]).await;
    let finished = h.dns_order(&account, &["done.green.no"]).await;
    h.pass_all(&account, &finished, ChallengeType::Http01).await;
    h.finalize(&account, &finished).await.unwrap();
    h.machine.new_nonce().await;

    h.clock.advance(Duration::days(8));
    let report = h.machine.sweep_expired().await.unwrap();
    assert_eq!(report.orders_checked, 2);
    assert_eq!(report.invalid_orders, 1);
    assert_eq!(report.expired_nonces, 1);

    assert_eq!(h.machine.order(&stale.id).await.unwrap().status, OrderStatus::Invalid);
    assert_eq!(h.machine.order(&finished.id).await.unwrap().status, OrderStatus::Valid);
}

#[tokio::test]
async fn accounts_and_orders_survive_restart() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["persist.green.no"]).await;
    h.pass_all(&account, &order, ChallengeType::Http01).await;
    let certificate = h.finalize(&account, &order).await.unwrap().certificate.unwrap();
    let pending = h.dns_order(&account, &["later.green.no"]).await;

    assert_eq!(h.store.load_documents("orders").await.unwrap().len(), 2);

    let restarted = Arc::new(
        AcmeOrderMachine::open(
            AcmeConfig::default(),
            h.hierarchy.clone(),
            h.validator.clone(),
            h.store.clone(),
            h.clock.clone(),
        )
        .await
        .unwrap(),
    );
    assert_eq!(restarted.account(&account.id).await.unwrap(), account);
    assert_eq!(restarted.order(&order.id).await.unwrap().status, OrderStatus::Valid);
    let mut owned = restarted.orders_for(&account.id).await;
    owned.sort();
    let mut expected = vec![order.id.clone(), pending.id.clone()];
    expected.sort();
    assert_eq!(owned, expected);

    let challenge = &pending.authorizations[0].challenges[0];
    restarted
        .respond_challenge(&restarted.new_nonce().await, &account.id, &challenge.id)
        .await
        .unwrap();

    let record = restarted
        .revoke_certificate(&restarted.new_nonce().await, &account.id, certificate, None)
        .await
        .unwrap();
    assert_eq!(record.revocation.unwrap().reason, RevocationReason::Unspecified);
}

#[tokio::test]
async fn issuance_failure_keeps_its_error_kind_on_the_order() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["weak.green.no"]).await;
    h.pass_all(&account, &order, ChallengeType::Http01).await;

    let mut small_order = vec![0u8; 32];
    small_order[0] = 1;
    let request = CertificateSigningRequest {
        subject: None,
        identifiers: order.identifiers.clone(),
        public_key: small_order,
    };
    let err = h
        .machine
        .finalize(&h.nonce().await, &account.id, &order.id, request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AcmeErrorKind::BadPublicKey);

    let settled = h.machine.order(&order.id).await.unwrap();
    assert_eq!(settled.status, OrderStatus::Invalid);
    assert_eq!(settled.error.unwrap().kind, AcmeErrorKind::BadPublicKey);
    assert_eq!(h.hierarchy.ca_by_class(CaClass::Tls).unwrap().total_issued().await, 0);
}

#[tokio::test]
async fn concurrent_finalizes_issue_once() {
    let h = Harness::new().await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["race.green.no"]).await;
    h.pass_all(&account, &order, ChallengeType::Http01).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let machine = h.machine.clone();
        let nonce = h.nonce().await;
        let account_id = account.id.clone();
        let order_id = order.id.clone();
        let request = csr(&order);
        handles.push(tokio::spawn(async move {
            machine.finalize(&nonce, &account_id, &order_id, request).await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(done) => {
                assert_eq!(done.status, OrderStatus::Valid);
                wins += 1;
            }
            Err(err) => assert_eq!(err.kind(), AcmeErrorKind::OrderNotReady),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(h.hierarchy.ca_by_class(CaClass::Tls).unwrap().total_issued().await, 1);
}

#[tokio::test]
async fn certificate_for_a_reclaimed_order_is_superseded() {
    let signer = Arc::new(SlowSigner::new(std::time::Duration::from_millis(200)));
    let h = Harness::build(
        AcmeConfig {
            finalize_timeout_ms: 1_000,
            ..AcmeConfig::default()
        },
        PkiConfig::default(),
        signer.clone(),
    )
    .await;
    let account = h.account().await;
    let order = h.dns_order(&account, &["late.green.no"]).await;
    h.pass_all(&account, &order, ChallengeType::Http01).await;

    signer.arm();
    let machine = h.machine.clone();
    let nonce = h.nonce().await;
    let account_id = account.id.clone();
    let order_id = order.id.clone();
    let request = csr(&order);
    let finalizing = tokio::spawn(async move {
        machine.finalize(&nonce, &account_id, &order_id, request).await
    });

    // issuance is now stuck in the signer; let the processing bound pass
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    h.clock.advance(Duration::hours(1));
    assert_err!(finalizing.await.unwrap());

    let settled = h.machine.order(&order.id).await.unwrap();
    assert_eq!(settled.status, OrderStatus::Invalid);
    assert!(settled.certificate.is_none());

    let records = h
        .hierarchy
        .ca_by_class(CaClass::Tls)
        .unwrap()
        .ledger()
        .records()
        .await;
    assert_eq!(records.len(), 1);
    let revocation = records[0].revocation.as_ref().unwrap();
    assert_eq!(revocation.reason, RevocationReason::Superseded);
}

#[tokio::test]
async fn sweep_skips_orders_it_cannot_persist() {
    let h = Harness::new().await;
    let account = h.account().await;
    let first = h.dns_order(&account, &["one.green.no"]).await;
    let second = h.dns_order(&account, &["two.green.no"]).await;

    h.clock.advance(Duration::days(8));
    h.store.set_fail_writes(true);
    let report = assert_ok!(h.machine.sweep_expired().await);
    assert_eq!(report.failed_orders, 2);
    assert_eq!(report.orders_checked, 0);

    h.store.set_fail_writes(false);
    let report = h.machine.sweep_expired().await.unwrap();
    assert_eq!(report.failed_orders, 0);
    assert_eq!(report.invalid_orders, 2);
    for stale in [&first, &second] {
        assert_eq!(h.machine.order(&stale.id).await.unwrap().status, OrderStatus::Invalid);
    }
}

#[tokio::test]
async fn invalid_orders_are_evicted_after_retention() {
    let h = Harness::new().await;
    let account = h.account().await;
    let stale = h.dns_order(&account, &["gone.green.no"]).await;
    let finished = h.dns_order(&account, &["kept.green.no"]).await;
    h.pass_all(&account, &finished, ChallengeType::Http01).await;
    h.finalize(&account, &finished).await.unwrap();

    // expired but still inside the retention window
    h.clock.advance(Duration::days(8));
    let report = h.machine.sweep_expired().await.unwrap();
    assert_eq!(report.evicted_orders, 0);
    assert_eq!(h.store.load_documents("orders").await.unwrap().len(), 2);

    h.clock.advance(Duration::days(30));
    let report = h.machine.sweep_expired().await.unwrap();
    assert_eq!(report.evicted_orders, 1);
    assert_eq!(report.orders_checked, 2);

    let err = h.machine.order(&stale.id).await.unwrap_err();
    assert!(matches!(err, PkiError::NotFound { .. }));
    let err = h
        .machine
        .authorization(&stale.authorizations[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::NotFound { .. }));
    assert_eq!(h.store.load_documents("orders").await.unwrap().len(), 1);
    assert_eq!(h.machine.order(&finished.id).await.unwrap().status, OrderStatus::Valid);
}

#[tokio::test]
async fn oversized_order_lifetime_is_refused_at_open() {
    let h = Harness::new().await;
    let result = AcmeOrderMachine::open(
        AcmeConfig {
            order_lifetime_secs: u64::MAX,
            ..AcmeConfig::default()
        },
        h.hierarchy.clone(),
        h.validator.clone(),
        h.store.clone(),
        h.clock.clone(),
    )
    .await;
    assert!(matches!(result, Err(PkiError::Config(_))));
}
