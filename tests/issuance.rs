//! End-to-end issuance tests against a mocked ACME server and DNS API.
//!
//! The mock server never verifies JWS signatures; these tests exercise
//! the client's sequencing: account bootstrap, order creation, the TXT
//! lifecycle per authorization, finalization, download, caching, and
//! provider fallback.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use autocert::dns::{CloudflareConfig, CloudflareProvider};
use autocert::encoding::der_to_pem;
use autocert::schema::account::ExternalAccountBinding;
use autocert::service::CaProvider;
use autocert::store::{KvStore, MemoryStore};
use autocert::{Error, Issuer, IssuerConfig};

/// Build a throwaway self-signed certificate expiring `valid_days` from
/// now, returned as a PEM chain.
fn test_certificate_chain(valid_days: u64) -> String {
    use der::asn1::{BitString, UtcTime};
    use der::{Decode, Encode};
    use pkcs8::EncodePublicKey;
    use signature::Signer;
    use x509_cert::certificate::{Certificate, TbsCertificate, Version};
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
    use x509_cert::time::{Time, Validity};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("current time");
    let not_after = now + Duration::from_secs(valid_days * 86_400);

    let key = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let spki_der = key.public_key().to_public_key_der().unwrap();
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap();

    let algorithm = AlgorithmIdentifierOwned {
        oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
        parameters: None,
    };
    let name = Name::from_str("CN=example.com").unwrap();

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x01]).unwrap(),
        signature: algorithm.clone(),
        issuer: name.clone(),
        validity: Validity {
            not_before: Time::UtcTime(UtcTime::from_unix_duration(now).unwrap()),
            not_after: Time::UtcTime(UtcTime::from_unix_duration(not_after).unwrap()),
        },
        subject: name,
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    let message = tbs.to_der().unwrap();
    let signer = p256::ecdsa::SigningKey::from(&key);
    let signature: ecdsa::der::Signature<p256::NistP256> = signer.sign(&message);

    let certificate = Certificate {
        tbs_certificate: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(signature.as_bytes()).unwrap(),
    };

    der_to_pem(&certificate.to_der().unwrap(), "CERTIFICATE").unwrap()
}

fn envelope(result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"success": true, "errors": [], "result": result})
}

/// Mount the Cloudflare-shaped DNS API: zone lookup, empty record
/// listing, record creation, and deletion.
async fn mount_dns(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            serde_json::json!([{"id": "zone-1", "name": "example.com"}]),
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([]))))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
            "id": "rec-1",
            "name": "_acme-challenge.example.com",
            "content": "ignored-by-client",
            "ttl": 60,
            "type": "TXT"
        }))))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/zones/zone-1/dns_records/rec-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            serde_json::json!({"id": "rec-1"}),
        )))
        .mount(server)
        .await;
}

/// Mount a complete happy-path ACME server under `prefix` and return
/// nothing; the directory lives at `{uri}{prefix}/directory`.
async fn mount_acme(server: &MockServer, prefix: &str, chain: &str) {
    let uri = server.uri();
    let nonce_header = ("Replay-Nonce", "nonce-1");

    Mock::given(method("GET"))
        .and(path(format!("{prefix}/directory")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "newNonce": format!("{uri}{prefix}/new-nonce"),
            "newAccount": format!("{uri}{prefix}/new-account"),
            "newOrder": format!("{uri}{prefix}/new-order"),
            "revokeCert": format!("{uri}{prefix}/revoke-cert"),
            "keyChange": format!("{uri}{prefix}/key-change"),
            "meta": {"termsOfService": format!("{uri}{prefix}/terms")}
        })))
        .mount(server)
        .await;

    Mock::given(method("HEAD"))
        .and(path(format!("{prefix}/new-nonce")))
        .respond_with(ResponseTemplate::new(200).insert_header(nonce_header.0, nonce_header.1))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{prefix}/new-account")))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", format!("{uri}{prefix}/acct/1").as_str())
                .insert_header(nonce_header.0, nonce_header.1)
                .set_body_json(serde_json::json!({"status": "valid"})),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{prefix}/new-order")))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", format!("{uri}{prefix}/order/1").as_str())
                .insert_header(nonce_header.0, nonce_header.1)
                .set_body_json(serde_json::json!({
                    "status": "pending",
                    "identifiers": [
                        {"type": "dns", "value": "*.example.com"},
                        {"type": "dns", "value": "example.com"}
                    ],
                    "authorizations": [
                        format!("{uri}{prefix}/authz/wild"),
                        format!("{uri}{prefix}/authz/apex")
                    ],
                    "finalize": format!("{uri}{prefix}/order/1/finalize")
                })),
        )
        .mount(server)
        .await;

    for (slug, wildcard) in [("wild", true), ("apex", false)] {
        let pending = serde_json::json!({
            "identifier": {"type": "dns", "value": "example.com"},
            "status": "pending",
            "wildcard": wildcard,
            "challenges": [{
                "type": "dns-01",
                "url": format!("{uri}{prefix}/chall/{slug}"),
                "status": "pending",
                "token": format!("token-{slug}")
            }]
        });
        let mut valid = pending.clone();
        valid["status"] = "valid".into();
        valid["challenges"][0]["status"] = "valid".into();

        // The first fetch sees the pending authorization; polls after
        // the challenge response see it valid.
        Mock::given(method("POST"))
            .and(path(format!("{prefix}/authz/{slug}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(nonce_header.0, nonce_header.1)
                    .set_body_json(pending),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{prefix}/authz/{slug}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(nonce_header.0, nonce_header.1)
                    .set_body_json(valid),
            )
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("{prefix}/chall/{slug}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(nonce_header.0, nonce_header.1)
                    .set_body_json(serde_json::json!({
                        "type": "dns-01",
                        "url": format!("{uri}{prefix}/chall/{slug}"),
                        "status": "processing",
                        "token": format!("token-{slug}")
                    })),
            )
            .mount(server)
            .await;
    }

    Mock::given(method("POST"))
        .and(path(format!("{prefix}/order/1/finalize")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(nonce_header.0, nonce_header.1)
                .set_body_json(serde_json::json!({
                    "status": "processing",
                    "identifiers": [{"type": "dns", "value": "*.example.com"}],
                    "authorizations": [format!("{uri}{prefix}/authz/wild")],
                    "finalize": format!("{uri}{prefix}/order/1/finalize")
                })),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{prefix}/order/1")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(nonce_header.0, nonce_header.1)
                .set_body_json(serde_json::json!({
                    "status": "valid",
                    "identifiers": [{"type": "dns", "value": "*.example.com"}],
                    "authorizations": [format!("{uri}{prefix}/authz/wild")],
                    "finalize": format!("{uri}{prefix}/order/1/finalize"),
                    "certificate": format!("{uri}{prefix}/cert/1")
                })),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{prefix}/cert/1")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/pem-certificate-chain")
                .insert_header(nonce_header.0, nonce_header.1)
                .set_body_string(chain.to_owned()),
        )
        .mount(server)
        .await;
}

fn issuer_for(server: &MockServer, providers: Vec<CaProvider>, store: Arc<MemoryStore>) -> Issuer {
    let dns = Arc::new(
        CloudflareProvider::new(
            "test-token",
            CloudflareConfig {
                api_base: server.uri(),
                zone_map: BTreeMap::new(),
            },
        )
        .unwrap(),
    );
    Issuer::new(
        IssuerConfig {
            providers,
            dns_propagation: Duration::ZERO,
            ..Default::default()
        },
        dns,
        store,
    )
    .unwrap()
}

fn ca(server: &MockServer, name: &str, prefix: &str) -> CaProvider {
    CaProvider {
        name: name.to_owned(),
        directory_url: format!("{}{prefix}/directory", server.uri()),
        eab: None,
    }
}

#[tokio::test]
async fn cold_wildcard_issuance_end_to_end() {
    let server = MockServer::start().await;
    let chain = test_certificate_chain(90);
    mount_dns(&server).await;
    mount_acme(&server, "/le", &chain).await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(&server, vec![ca(&server, "letsencrypt", "/le")], store.clone());

    let issued = issuer.obtain_or_renew("*.example.com").await.unwrap();

    assert!(!issued.cached);
    assert_eq!(issued.provider, "letsencrypt");
    assert_eq!(issued.domain, "*.example.com");
    assert!(issued.cert_pem.contains("BEGIN CERTIFICATE"));
    assert!(issued.key_pem.contains("BEGIN PRIVATE KEY"));

    let days_left = (issued.not_after - chrono::Utc::now()).num_days();
    assert!((88..=90).contains(&days_left), "days_left = {days_left}");

    // The cache entry was written under the lower-cased domain.
    assert!(store
        .get("cert:*.example.com")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn second_call_is_served_from_cache() {
    let server = MockServer::start().await;
    let chain = test_certificate_chain(90);
    mount_dns(&server).await;
    mount_acme(&server, "/le", &chain).await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(&server, vec![ca(&server, "letsencrypt", "/le")], store);

    let first = issuer.obtain_or_renew("*.example.com").await.unwrap();
    assert!(!first.cached);

    let requests_after_first = server.received_requests().await.unwrap().len();

    let second = issuer.obtain_or_renew("*.example.com").await.unwrap();
    assert!(second.cached);
    assert_eq!(second.cert_pem, first.cert_pem);

    // No further ACME or DNS traffic for the cache hit.
    let requests_after_second = server.received_requests().await.unwrap().len();
    assert_eq!(requests_after_first, requests_after_second);
}

#[tokio::test]
async fn every_created_txt_record_is_deleted() {
    let server = MockServer::start().await;
    let chain = test_certificate_chain(90);
    mount_acme(&server, "/le", &chain).await;

    // DNS mocks with strict expectations: two creates, two deletes.
    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            serde_json::json!([{"id": "zone-1", "name": "example.com"}]),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
            "id": "rec-1",
            "name": "_acme-challenge.example.com",
            "content": "x",
            "ttl": 60,
            "type": "TXT"
        }))))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/zones/zone-1/dns_records/rec-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            serde_json::json!({"id": "rec-1"}),
        )))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(&server, vec![ca(&server, "letsencrypt", "/le")], store);

    issuer.obtain_or_renew("*.example.com").await.unwrap();
    // Expectations are verified when the MockServer drops.
}

#[tokio::test]
async fn provider_fallback_after_directory_failure() {
    let server = MockServer::start().await;
    let chain = test_certificate_chain(90);
    mount_dns(&server).await;

    // First provider's directory is gone for good (non-transient).
    Mock::given(method("GET"))
        .and(path("/dead/directory"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;
    mount_acme(&server, "/zerossl", &chain).await;

    let store = Arc::new(MemoryStore::new());
    let fallback = CaProvider {
        eab: Some(ExternalAccountBinding {
            kid: "eab-kid-1".into(),
            hmac_key_b64: "MDEyMzQ1Njc4OWFiY2RlZg".into(),
        }),
        ..ca(&server, "zerossl", "/zerossl")
    };
    let issuer = issuer_for(
        &server,
        vec![ca(&server, "letsencrypt", "/dead"), fallback],
        store,
    );

    let issued = issuer.obtain_or_renew("*.example.com").await.unwrap();
    assert!(!issued.cached);
    assert_eq!(issued.provider, "zerossl");
}

#[tokio::test]
async fn all_providers_failing_reports_each_failure() {
    let server = MockServer::start().await;
    mount_dns(&server).await;

    Mock::given(method("GET"))
        .and(path("/dead/directory"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(
        &server,
        vec![
            ca(&server, "letsencrypt", "/dead"),
            ca(&server, "zerossl", "/dead"),
        ],
        store,
    );

    let err = issuer.obtain_or_renew("example.com").await.unwrap_err();
    match err {
        Error::AllProvidersFailed { details } => {
            assert_eq!(details.len(), 2);
            assert!(details[0].starts_with("letsencrypt:"));
            assert!(details[1].starts_with("zerossl:"));
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_directory_errors_are_retried() {
    let server = MockServer::start().await;
    let chain = test_certificate_chain(90);
    mount_dns(&server).await;

    // Two 503s, then the real directory appears.
    Mock::given(method("GET"))
        .and(path("/flaky/directory"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_acme(&server, "/flaky", &chain).await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(&server, vec![ca(&server, "letsencrypt", "/flaky")], store);

    let issued = issuer.obtain_or_renew("*.example.com").await.unwrap();
    assert_eq!(issued.provider, "letsencrypt");
}

#[tokio::test]
async fn invalid_authorization_fails_fast_but_still_cleans_up() {
    let server = MockServer::start().await;
    let uri = server.uri();

    // DNS: one create expected, and one delete even though the
    // authorization fails.
    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            serde_json::json!([{"id": "zone-1", "name": "example.com"}]),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
            "id": "rec-1",
            "name": "_acme-challenge.example.com",
            "content": "x",
            "ttl": 60,
            "type": "TXT"
        }))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/zones/zone-1/dns_records/rec-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            serde_json::json!({"id": "rec-1"}),
        )))
        .expect(1)
        .mount(&server)
        .await;

    // ACME: directory, nonce, account, order; the authorization goes
    // straight to invalid after the challenge response.
    Mock::given(method("GET"))
        .and(path("/le/directory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "newNonce": format!("{uri}/le/new-nonce"),
            "newAccount": format!("{uri}/le/new-account"),
            "newOrder": format!("{uri}/le/new-order")
        })))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/le/new-nonce"))
        .respond_with(ResponseTemplate::new(200).insert_header("Replay-Nonce", "n"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/le/new-account"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", format!("{uri}/le/acct/1").as_str())
                .insert_header("Replay-Nonce", "n")
                .set_body_json(serde_json::json!({"status": "valid"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/le/new-order"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", format!("{uri}/le/order/1").as_str())
                .insert_header("Replay-Nonce", "n")
                .set_body_json(serde_json::json!({
                    "status": "pending",
                    "identifiers": [{"type": "dns", "value": "example.com"}],
                    "authorizations": [format!("{uri}/le/authz/1")],
                    "finalize": format!("{uri}/le/order/1/finalize")
                })),
        )
        .mount(&server)
        .await;

    let pending = serde_json::json!({
        "identifier": {"type": "dns", "value": "example.com"},
        "status": "pending",
        "challenges": [{
            "type": "dns-01",
            "url": format!("{uri}/le/chall/1"),
            "status": "pending",
            "token": "token-1"
        }]
    });
    let mut invalid = pending.clone();
    invalid["status"] = "invalid".into();
    invalid["challenges"][0]["status"] = "invalid".into();
    invalid["challenges"][0]["error"] = serde_json::json!({
        "type": "urn:ietf:params:acme:error:dns",
        "detail": "no TXT record found"
    });

    Mock::given(method("POST"))
        .and(path("/le/authz/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Replay-Nonce", "n")
                .set_body_json(pending),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/le/authz/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Replay-Nonce", "n")
                .set_body_json(invalid),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/le/chall/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Replay-Nonce", "n")
                .set_body_json(serde_json::json!({
                    "type": "dns-01",
                    "url": format!("{uri}/le/chall/1"),
                    "status": "processing",
                    "token": "token-1"
                })),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(&server, vec![ca(&server, "letsencrypt", "/le")], store);

    let err = issuer.obtain_or_renew("example.com").await.unwrap_err();
    match err {
        Error::AllProvidersFailed { details } => {
            assert_eq!(details.len(), 1);
            assert!(details[0].contains("no TXT record found"), "{}", details[0]);
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn directory_down_for_all_attempts_exhausts_the_retry_budget() {
    let server = MockServer::start().await;
    mount_dns(&server).await;

    // 525 is transient: one initial attempt plus six retries.
    Mock::given(method("GET"))
        .and(path("/le/directory"))
        .respond_with(ResponseTemplate::new(525))
        .expect(7)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let issuer = issuer_for(&server, vec![ca(&server, "letsencrypt", "/le")], store);

    let err = issuer.obtain_or_renew("example.com").await.unwrap_err();
    match err {
        Error::AllProvidersFailed { details } => {
            assert!(details[0].contains("525"), "{}", details[0]);
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
}
