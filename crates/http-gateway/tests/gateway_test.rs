//! Gateway refresh-and-retry behaviour against a mock backend.

use credential_store::{CredentialVault, MemoryCredentialStore};
use http_gateway::{ApiClient, ApiRequest, GatewayError, HttpGateway, DEFAULT_COLLECTION_LIMIT};
use serde_json::json;
use session_lifecycle::{
    IdentityClient, LifecycleConfig, TokenGrant, TokenLifecycleManager, UserNotice,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    server: MockServer,
    manager: TokenLifecycleManager,
    api: ApiClient,
}

impl Fixture {
    /// Signed in as `stale` / `r1` with `ttl_secs` left.
    async fn signed_in(ttl_secs: f64) -> Self {
        let server = MockServer::start().await;
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();

        let manager = TokenLifecycleManager::new(
            CredentialVault::new(Arc::new(MemoryCredentialStore::new())),
            Arc::new(IdentityClient::new(base.clone(), Duration::from_secs(5))),
            LifecycleConfig::default(),
        );
        manager
            .establish_session(
                TokenGrant::new("stale", Some("r1".to_string())).with_expires_in(ttl_secs),
            )
            .unwrap();

        let gateway = HttpGateway::new(base, Duration::from_secs(5), manager.clone());
        Self {
            server,
            manager,
            api: ApiClient::new(gateway),
        }
    }

    async fn refresh_grants(&self, access_token: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh_token"))
            .and(body_json(json!({ "refresh_token": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isSuccess": true,
                "value": { "accessToken": access_token, "refreshToken": "r2", "expiresIn": 3600 }
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    async fn collection_responds(&self, token: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/api/collection/c1"))
            .and(header("Authorization", format!("Bearer {token}").as_str()))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}

fn collection_page() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "isSuccess": true,
        "value": [
            { "imageId": "1", "link": "https://cdn.test/1.jpg" },
            { "imageId": "2", "image": { "link": "https://cdn.test/2.jpg" } }
        ]
    }))
}

#[tokio::test]
async fn test_401_is_retried_once_after_refresh() {
    let fx = Fixture::signed_in(3600.0).await;
    fx.refresh_grants("fresh", 1).await;
    fx.collection_responds("stale", ResponseTemplate::new(401)).await;
    fx.collection_responds("fresh", collection_page()).await;

    let items = fx
        .api
        .fetch_collection("c1", 1, DEFAULT_COLLECTION_LIMIT)
        .await
        .unwrap();

    assert_eq!(
        http_gateway::media_links(&items),
        vec!["https://cdn.test/1.jpg", "https://cdn.test/2.jpg"]
    );
    assert_eq!(fx.manager.current_token().unwrap().as_deref(), Some("fresh"));
    assert!(fx.manager.session_state().authenticated);
}

#[tokio::test]
async fn test_401_after_retry_logs_out() {
    let fx = Fixture::signed_in(3600.0).await;
    let mut notices = fx.manager.subscribe_notices();
    fx.refresh_grants("fresh", 1).await;
    fx.collection_responds("stale", ResponseTemplate::new(401)).await;
    fx.collection_responds("fresh", ResponseTemplate::new(401)).await;

    let err = fx.api.fetch_collection("c1", 1, 100).await.unwrap_err();

    assert_eq!(err, GatewayError::Unauthenticated);
    assert_eq!(fx.manager.current_session().unwrap(), None);
    assert!(!fx.manager.session_state().authenticated);
    // Logout after a failed retry is silent.
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn test_embedded_status_counts_as_auth_failure() {
    let fx = Fixture::signed_in(3600.0).await;
    fx.refresh_grants("fresh", 1).await;
    fx.collection_responds(
        "stale",
        ResponseTemplate::new(200).set_body_json(json!({ "statusCode": 401, "message": "expired" })),
    )
    .await;
    fx.collection_responds("fresh", collection_page()).await;

    let items = fx.api.fetch_collection("c1", 1, 100).await.unwrap();
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn test_rejected_refresh_logs_out_with_one_notice() {
    let fx = Fixture::signed_in(3600.0).await;
    let mut notices = fx.manager.subscribe_notices();
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh_token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "expired" })))
        .expect(1)
        .mount(&fx.server)
        .await;
    fx.collection_responds("stale", ResponseTemplate::new(403)).await;

    let err = fx.api.fetch_collection("c1", 1, 100).await.unwrap_err();

    assert_eq!(err, GatewayError::Unauthenticated);
    assert!(!fx.manager.is_authenticated());
    assert_eq!(notices.try_recv().unwrap(), UserNotice::session_expired());
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn test_near_expiry_token_is_refreshed_before_sending() {
    let fx = Fixture::signed_in(5.0).await;
    fx.refresh_grants("fresh", 1).await;
    fx.collection_responds("fresh", collection_page()).await;

    let items = fx.api.fetch_collection("c1", 1, 100).await.unwrap();
    assert_eq!(items.len(), 2);

    let received = fx.server.received_requests().await.unwrap();
    let protected: Vec<_> = received
        .iter()
        .filter(|request| request.url.path() == "/api/collection/c1")
        .collect();
    assert_eq!(protected.len(), 1);
}

#[tokio::test]
async fn test_collection_query_parameters() {
    let fx = Fixture::signed_in(3600.0).await;
    Mock::given(method("GET"))
        .and(path("/api/collection/c1"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let items = fx.api.fetch_collection("c1", 2, 20).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_network_failure_keeps_session() {
    let manager = TokenLifecycleManager::new(
        CredentialVault::new(Arc::new(MemoryCredentialStore::new())),
        Arc::new(IdentityClient::new(
            Url::parse("http://127.0.0.1:1/").unwrap(),
            Duration::from_secs(1),
        )),
        LifecycleConfig::default(),
    );
    manager
        .establish_session(TokenGrant::new("a", Some("r".to_string())).with_expires_in(3600.0))
        .unwrap();
    let gateway = HttpGateway::new(
        Url::parse("http://127.0.0.1:1/").unwrap(),
        Duration::from_secs(1),
        manager.clone(),
    );

    let err = gateway
        .send(&ApiRequest::get("api/collection/byUser"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::NetworkUnavailable(_)));
    assert!(err.is_transient());
    assert!(manager.session_state().authenticated);
    assert_eq!(manager.current_token().unwrap().as_deref(), Some("a"));
}

#[tokio::test]
async fn test_no_session_fails_before_network() {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let manager = TokenLifecycleManager::new(
        CredentialVault::new(Arc::new(MemoryCredentialStore::new())),
        Arc::new(IdentityClient::new(base.clone(), Duration::from_secs(5))),
        LifecycleConfig::default(),
    );
    let api = ApiClient::new(HttpGateway::new(base, Duration::from_secs(5), manager));

    let err = api.fetch_user_collections().await.unwrap_err();

    assert_eq!(err, GatewayError::Unauthenticated);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_other_status_is_reported() {
    let fx = Fixture::signed_in(3600.0).await;
    fx.collection_responds("stale", ResponseTemplate::new(404)).await;

    let err = fx.api.fetch_collection("c1", 1, 100).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 404, .. }));
    assert!(fx.manager.is_authenticated());
}

#[tokio::test]
async fn test_push_subscription_request() {
    let fx = Fixture::signed_in(3600.0).await;
    Mock::given(method("POST"))
        .and(path("/api/streaming/appsync/subscribe/requests"))
        .and(body_json(json!({ "channel": "tv-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSuccess": true,
            "value": { "url": "wss://push.test/graphql", "body": "{\"type\":\"connection_init\"}" }
        })))
        .mount(&fx.server)
        .await;

    let descriptor = fx.api.request_push_subscription("tv-1").await.unwrap();
    assert_eq!(descriptor.url, "wss://push.test/graphql");
    assert_eq!(descriptor.body, json!("{\"type\":\"connection_init\"}"));
}

#[tokio::test]
async fn test_push_subscription_refused() {
    let fx = Fixture::signed_in(3600.0).await;
    Mock::given(method("POST"))
        .and(path("/api/streaming/appsync/subscribe/requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSuccess": false,
            "message": "Device not registered"
        })))
        .mount(&fx.server)
        .await;

    let err = fx.api.request_push_subscription("tv-1").await.unwrap_err();
    assert_eq!(err, GatewayError::Api("Device not registered".to_string()));
}

#[tokio::test]
async fn test_user_collections() {
    let fx = Fixture::signed_in(3600.0).await;
    Mock::given(method("GET"))
        .and(path("/api/collection/byUser"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSuccess": true,
            "value": [
                { "collectionId": "c1", "name": "Holidays", "imageCount": 12 },
                { "collectionId": "c2" }
            ]
        })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let collections = fx.api.fetch_user_collections().await.unwrap();

    assert_eq!(collections.len(), 2);
    assert_eq!(collections[0].collection_id, "c1");
    assert_eq!(collections[0].name.as_deref(), Some("Holidays"));
    assert_eq!(collections[0].extra["imageCount"], 12);
    assert_eq!(collections[1].name, None);
}
