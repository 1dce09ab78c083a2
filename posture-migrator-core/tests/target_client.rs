use std::time::Duration;

use posture_migrator_common::{ApiError, RetryPolicy};
use posture_migrator_core::clients::{TargetApi, TargetClient, TargetCredentials};
use posture_migrator_core::synthesis::{RuleContext, RuleSynthesizer};
use posture_migrator_core::types::{AccountGroup, AccountGroupRequest, CloudProvider, ResolutionResult};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> TargetClient {
    client_with_retry(
        server,
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        },
    )
}

fn client_with_retry(server: &MockServer, retry: RetryPolicy) -> TargetClient {
    TargetClient::new(
        &server.uri(),
        TargetCredentials {
            username: "migrator".into(),
            password: "hunter2".into(),
            customer_name: None,
        },
        retry,
        Duration::from_secs(5),
        Duration::from_secs(540),
    )
    .expect("client")
}

async fn mount_login(server: &MockServer, expected_logins: u64) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(json!({"username": "migrator", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .expect(expected_logins)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_logs_in_once_and_sends_token() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/policy"))
        .and(header("x-redlock-auth", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"policyId": "p-1", "name": "one"},
            {"policyId": "p-2", "name": "two"}
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cloud/name"))
        .and(header("x-redlock-auth", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "123456789012", "name": "prod", "cloudType": "aws"},
            {"id": "sub-1", "name": "dev", "cloudType": "gcp"}
        ])))
        .mount(&server)
        .await;

    let target = client(&server);
    let policies = target.policy_ids().await.expect("policies");
    assert_eq!(policies, ["p-1".to_string(), "p-2".to_string()].into());

    let accounts = target.cloud_accounts().await.expect("accounts");
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].provider, Some(CloudProvider::Aws));
    assert_eq!(accounts[1].provider, None);
}

#[tokio::test]
async fn test_revoked_token_logs_in_again() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/cloud/group"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cloud/group"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "g-1", "name": "Payments", "accountIds": ["123456789012"]}
        ])))
        .mount(&server)
        .await;

    let groups = client(&server).account_groups().await.expect("groups");
    assert_eq!(
        groups,
        vec![AccountGroup {
            id: "g-1".into(),
            name: "Payments".into(),
            account_ids: vec!["123456789012".into()],
        }]
    );
}

#[tokio::test]
async fn test_token_rejected_twice_is_fatal_without_backoff() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/policy"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    // Any backoff sleep would blow the timeout below
    let target = client_with_retry(
        &server,
        RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
            multiplier: 2.0,
        },
    );
    let error = tokio::time::timeout(Duration::from_secs(10), target.policy_ids())
        .await
        .expect("no backoff after a rejected token")
        .expect_err("call should fail");
    assert!(matches!(error, ApiError::Authentication(_)), "got {error:?}");
}

#[tokio::test]
async fn test_rejected_login_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let error = client(&server).policy_ids().await.expect_err("call should fail");
    assert!(matches!(error, ApiError::Authentication(_)), "got {error:?}");
}

#[tokio::test]
async fn test_taken_name_is_reported_as_already_exists() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/cloud/group"))
        .respond_with(ResponseTemplate::new(400).insert_header(
            "x-redlock-status",
            r#"[{"i18nKey":"account_group_name_already_exists","severity":"error","subject":"Payments"}]"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/cloud/group/g-1"))
        .and(body_json(json!({
            "name": "Payments",
            "description": "Migrated team",
            "accountIds": ["123456789012"]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let target = client(&server);
    let request = AccountGroupRequest {
        name: "Payments".into(),
        description: "Migrated team".into(),
        account_ids: vec!["123456789012".into()],
    };

    let error = target.create_account_group(&request).await.expect_err("call should fail");
    assert_eq!(error, ApiError::AlreadyExists("account_group_name_already_exists".into()));

    target
        .update_account_group("g-1", &request)
        .await
        .expect("update");
}

#[tokio::test]
async fn test_created_rule_echoes_its_id() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/alert/rule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "policyScanConfigId": "rule-7",
            "name": "prod Alert Rule"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/alert/rule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"policyScanConfigId": "rule-7", "name": "prod Alert Rule"},
            {"name": "half-created"}
        ])))
        .mount(&server)
        .await;

    let group = AccountGroup {
        id: "g-1".into(),
        name: "Payments".into(),
        account_ids: vec!["123456789012".into()],
    };
    let rules = RuleSynthesizer::default().synthesize(
        &RuleContext {
            account_name: "prod",
            cloud_account_id: "123456789012",
            group: &group,
        },
        &ResolutionResult::scan_all(),
    );

    let target = client(&server);
    let id = target.create_alert_rule(&rules[0].request).await.expect("create");
    assert_eq!(id.as_deref(), Some("rule-7"));

    let existing = target.alert_rules().await.expect("rules");
    assert_eq!(existing.len(), 1);
    assert_eq!(existing[0].id, "rule-7");
}

#[tokio::test]
async fn test_invalid_param_means_taken_only_for_groups() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    let invalid_param = || {
        ResponseTemplate::new(400).insert_header(
            "x-redlock-status",
            r#"[{"i18nKey":"invalid_param_value","severity":"error","subject":null}]"#,
        )
    };
    Mock::given(method("POST"))
        .and(path("/cloud/group"))
        .respond_with(invalid_param())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/alert/rule"))
        .respond_with(invalid_param())
        .expect(1)
        .mount(&server)
        .await;

    let target = client(&server);
    let group = AccountGroupRequest {
        name: "Payments".into(),
        description: "Migrated team".into(),
        account_ids: vec![],
    };
    let error = target.create_account_group(&group).await.expect_err("group create");
    assert_eq!(error, ApiError::AlreadyExists("invalid_param_value".into()));

    let owner = AccountGroup {
        id: "g-1".into(),
        name: "Payments".into(),
        account_ids: vec!["123456789012".into()],
    };
    let rules = RuleSynthesizer::default().synthesize(
        &RuleContext {
            account_name: "prod",
            cloud_account_id: "123456789012",
            group: &owner,
        },
        &ResolutionResult::scan_all(),
    );
    let error = target.create_alert_rule(&rules[0].request).await.expect_err("rule create");
    assert_eq!(
        error,
        ApiError::Status {
            status: 400,
            message: "invalid_param_value".into()
        }
    );
}
