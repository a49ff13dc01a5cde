use super::contact::ContactInfo;
use super::credentials::{SharedCredentials, TokenPair};
use super::endpoints::{CrmOauthEndpoints, TOKEN_PATH, TokenRequest};
use crate::config::Config;
use crate::error::CrmError;
use crate::types::document::{lookup, lookup_i64};
use backon::ExponentialBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("crm-bridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadInfo {
    pub main_contact_id: Option<i64>,
}

/// amoCRM API client bound to a shared credential holder.
#[derive(Clone)]
pub struct AmoCrmClient {
    base_url: String,
    http: reqwest::Client,
    no_redirect: reqwest::Client,
    credentials: SharedCredentials,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry_policy: ExponentialBuilder,
}

impl AmoCrmClient {
    pub fn new(cfg: &Config, credentials: SharedCredentials) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.request_timeout())
            .build()?;
        // health check must see redirects instead of following them
        let no_redirect = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let per_second = NonZeroU32::new(cfg.rate_limit_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(3))
            .with_max_times(cfg.retry_attempts)
            .with_jitter();

        Ok(Self {
            base_url: cfg.crm.url.as_str().trim_end_matches('/').to_string(),
            http,
            no_redirect,
            credentials,
            limiter,
            retry_policy,
        })
    }

    pub fn credentials(&self) -> &SharedCredentials {
        &self.credentials
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange the authorization key for a fresh token pair.
    pub async fn authenticate(&self) -> Result<TokenPair, CrmError> {
        let request = TokenRequest::authorization_code(&*self.credentials.read().await)?;
        let pair = self.request_tokens(&request).await?;
        self.credentials.set_tokens(pair.clone()).await;
        info!("amoCRM authorization code exchanged for tokens");
        Ok(pair)
    }

    /// Trade the current refresh token for a new pair.
    pub async fn reissue_tokens(&self) -> Result<TokenPair, CrmError> {
        let request = TokenRequest::refresh(&*self.credentials.read().await)?;
        let pair = self.request_tokens(&request).await?;
        self.credentials.set_tokens(pair.clone()).await;
        info!("amoCRM tokens reissued");
        Ok(pair)
    }

    async fn request_tokens(&self, request: &TokenRequest) -> Result<TokenPair, CrmError> {
        self.limiter.until_ready().await;
        let token_url = format!("{}{}", self.base_url, TOKEN_PATH);
        CrmOauthEndpoints::request_tokens(&self.http, &token_url, request, self.retry_policy).await
    }

    /// Whether the CRM answers at all. A 401 counts as up: the account
    /// exists and demands authorization.
    pub async fn health_check(&self) -> bool {
        match self.no_redirect.get(&self.base_url).send().await {
            Ok(resp) => {
                let status = resp.status();
                debug!(%status, "amoCRM health check answered");
                status == StatusCode::UNAUTHORIZED || status.is_success()
            }
            Err(e) => {
                warn!(error = %e, "amoCRM health check failed");
                false
            }
        }
    }

    /// Whether the current access token opens the account endpoint.
    pub async fn can_access_api(&self) -> bool {
        let url = format!("{}/api/v2/account", self.base_url);
        match self.get_json(&url).await {
            Ok(data) => data.get("id").is_some_and(Value::is_number),
            Err(_) => false,
        }
    }

    /// `Authorization: Bearer <access token>`, read from the live holder.
    pub async fn auth_headers(&self) -> Result<HeaderMap, CrmError> {
        let guard = self.credentials.read().await;
        let token = guard.access_token().ok_or(CrmError::NotAuthenticated)?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.secret()))
            .map_err(|_| CrmError::MissingCredential("access_token"))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    pub async fn get_pipeline_status_name(
        &self,
        pipeline_id: i64,
        status_id: i64,
    ) -> Result<Option<String>, CrmError> {
        let url = format!("{}/api/v2/pipelines?id={}", self.base_url, pipeline_id);
        let data = self.get_json(&url).await?;
        let path = format!("_embedded.items.{pipeline_id}.statuses.{status_id}.name");
        Ok(lookup(&data, &path)
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    pub async fn get_lead_info(&self, lead_id: i64) -> Result<LeadInfo, CrmError> {
        let url = format!("{}/api/v2/leads?id={}", self.base_url, lead_id);
        let data = self.get_json(&url).await?;
        Ok(LeadInfo {
            main_contact_id: lookup_i64(&data, "_embedded.items.0.main_contact.id"),
        })
    }

    pub async fn get_contact_info(&self, contact_id: i64) -> Result<Option<ContactInfo>, CrmError> {
        let url = format!("{}/api/v2/contacts/?id={}", self.base_url, contact_id);
        let data = self.get_json(&url).await?;
        Ok(lookup(&data, "_embedded.items.0").map(ContactInfo::from_contact))
    }

    pub async fn get_contact_info_by_lead_id(
        &self,
        lead_id: i64,
    ) -> Result<Option<ContactInfo>, CrmError> {
        let Some(contact_id) = self.get_lead_info(lead_id).await?.main_contact_id else {
            debug!(lead_id, "lead has no main contact");
            return Ok(None);
        };
        self.get_contact_info(contact_id).await
    }

    /// Authorized GET returning the JSON body. amoCRM answers 204 for empty
    /// result sets; that becomes `Value::Null`.
    async fn get_json(&self, url: &str) -> Result<Value, CrmError> {
        let headers = self.auth_headers().await.inspect_err(|e| {
            warn!(url, error = %e, "amoCRM request skipped");
        })?;
        self.limiter.until_ready().await;
        let result = async {
            let resp = self.http.get(url).headers(headers).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(CrmError::UpstreamStatus(status));
            }
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            Ok(resp.json::<Value>().await?)
        }
        .await;
        result.inspect_err(|e| warn!(url, error = %e, "amoCRM request failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amocrm::credentials::CredentialHolder;
    use mockito::{Matcher, Server};
    use oauth2::{AccessToken, RefreshToken};
    use serde_json::json;
    use url::Url;

    fn config(url: &str) -> Config {
        let mut cfg = Config::default();
        cfg.crm.url = Url::parse(url).unwrap();
        cfg.retry_attempts = 1;
        cfg.rate_limit_per_second = 100;
        cfg
    }

    fn holder(tokens: Option<(&str, &str)>) -> CredentialHolder {
        let mut h = CredentialHolder::new();
        h.set_client_id("cid");
        h.set_client_secret("s3cr3t");
        h.set_authorization_key("auth-code");
        h.set_redirect_uri("https://bridge.example/oauth");
        if let Some((a, r)) = tokens {
            h.set_tokens(pair(a, r));
        }
        h
    }

    fn pair(a: &str, r: &str) -> TokenPair {
        TokenPair::new(AccessToken::new(a.into()), RefreshToken::new(r.into()))
    }

    fn client(url: &str, tokens: Option<(&str, &str)>) -> AmoCrmClient {
        AmoCrmClient::new(&config(url), SharedCredentials::new(holder(tokens))).unwrap()
    }

    #[tokio::test]
    async fn health_check_accepts_unauthorized_and_ok() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/")
            .with_status(401)
            .create_async()
            .await;
        assert!(client(&server.url(), None).health_check().await);
        m.assert_async().await;

        let mut server = Server::new_async().await;
        let _m = server.mock("GET", "/").with_status(200).create_async().await;
        assert!(client(&server.url(), None).health_check().await);
    }

    #[tokio::test]
    async fn health_check_rejects_redirects_and_errors() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(302)
            .with_header("location", "https://elsewhere.example/")
            .create_async()
            .await;
        assert!(!client(&server.url(), None).health_check().await);

        let mut server = Server::new_async().await;
        let _m = server.mock("GET", "/").with_status(500).create_async().await;
        assert!(!client(&server.url(), None).health_check().await);

        // nothing listens on the discard port
        assert!(!client("http://127.0.0.1:9", None).health_check().await);
    }

    #[tokio::test]
    async fn can_access_api_requires_numeric_id() {
        let cases = [
            (r#"{"id": 123}"#, true),
            (r#"{}"#, false),
            (r#"{"id": "123"}"#, false),
        ];
        for (body, expected) in cases {
            let mut server = Server::new_async().await;
            let _m = server
                .mock("GET", "/api/v2/account")
                .match_header("authorization", "Bearer a0")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(body)
                .create_async()
                .await;
            assert_eq!(
                client(&server.url(), Some(("a0", "r0"))).can_access_api().await,
                expected,
                "body {body}"
            );
        }
    }

    #[tokio::test]
    async fn can_access_api_is_false_on_failure() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v2/account")
            .with_status(401)
            .create_async()
            .await;
        assert!(!client(&server.url(), Some(("a0", "r0"))).can_access_api().await);
        // no token, no request
        assert!(!client(&server.url(), None).can_access_api().await);
        // nothing listening
        assert!(!client("http://127.0.0.1:9", Some(("a0", "r0"))).can_access_api().await);
    }

    #[tokio::test]
    async fn timed_out_refresh_is_sent_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                // hold the connection open without answering
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });

        let mut cfg = config(&format!("http://{addr}"));
        cfg.request_timeout_secs = 1;
        cfg.retry_attempts = 2;
        let client =
            AmoCrmClient::new(&cfg, SharedCredentials::new(holder(Some(("old", "ref1"))))).unwrap();

        let err = client.reissue_tokens().await.unwrap_err();
        assert!(matches!(err, CrmError::Reqwest(ref e) if e.is_timeout()));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(client.credentials().tokens().await, Some(pair("old", "ref1")));
    }

    #[tokio::test]
    async fn authenticate_installs_returned_pair() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/oauth2/access_token")
            .match_body(Matcher::Json(json!({
                "client_id": "cid",
                "client_secret": "s3cr3t",
                "grant_type": "authorization_code",
                "code": "auth-code",
                "redirect_uri": "https://bridge.example/oauth",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer","expires_in":86400,"access_token":"A","refresh_token":"B"}"#)
            .create_async()
            .await;

        let client = client(&server.url(), None);
        let returned = client.authenticate().await.unwrap();
        m.assert_async().await;
        assert_eq!(returned, pair("A", "B"));
        assert_eq!(client.credentials().tokens().await, Some(pair("A", "B")));
    }

    #[tokio::test]
    async fn rejected_exchange_leaves_tokens_unchanged() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/oauth2/access_token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"hint":"Authorization code has expired","status":400}"#)
            .create_async()
            .await;

        let client = client(&server.url(), Some(("a0", "r0")));
        let err = client.authenticate().await.unwrap_err();
        assert!(err.is_auth_failure());
        let err = client.reissue_tokens().await.unwrap_err();
        assert!(matches!(err, CrmError::TokenRejected { .. }));
        assert_eq!(client.credentials().tokens().await, Some(pair("a0", "r0")));
    }

    #[tokio::test]
    async fn reissue_sends_refresh_token() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/oauth2/access_token")
            .match_body(Matcher::PartialJson(json!({
                "grant_type": "refresh_token",
                "refresh_token": "ref1",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new","refresh_token":"ref2"}"#)
            .create_async()
            .await;

        let client = client(&server.url(), Some(("old", "ref1")));
        client.reissue_tokens().await.unwrap();
        m.assert_async().await;
        assert_eq!(client.credentials().tokens().await, Some(pair("new", "ref2")));
    }

    #[tokio::test]
    async fn reissue_without_tokens_is_not_authenticated() {
        let client = client("http://127.0.0.1:9", None);
        assert!(matches!(
            client.reissue_tokens().await,
            Err(CrmError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn auth_headers_follow_the_holder() {
        let client = client("http://localhost", None);
        assert!(matches!(
            client.auth_headers().await,
            Err(CrmError::NotAuthenticated)
        ));

        client.credentials().set_tokens(pair("a1", "r1")).await;
        let headers = client.auth_headers().await.unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer a1");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test]
    async fn resolves_pipeline_status_name() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v2/pipelines?id=1309792")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "_embedded": {"items": {"1309792": {
                        "id": 1309792,
                        "statuses": {"21234451": {"id": 21234451, "name": "назначен экзамен"}}
                    }}}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client(&server.url(), Some(("a0", "r0")));
        assert_eq!(
            client.get_pipeline_status_name(1309792, 21234451).await.unwrap().as_deref(),
            Some("назначен экзамен")
        );
        assert_eq!(client.get_pipeline_status_name(1309792, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn resolves_contact_through_lead() {
        let mut server = Server::new_async().await;
        let _lead = server
            .mock("GET", "/api/v2/leads?id=26378833")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"_embedded":{"items":[{"id":26378833,"main_contact":{"id":46925315}}]}}"#)
            .create_async()
            .await;
        let _contact = server
            .mock("GET", "/api/v2/contacts/?id=46925315")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"_embedded":{"items":[{"id":46925315,"name":"Ivan Petrov","custom_fields":[
                    {"id":1,"code":"PHONE","name":"Phone","values":[{"value":"+70000000001"}]}
                ]}]}}"#,
            )
            .create_async()
            .await;

        let client = client(&server.url(), Some(("a0", "r0")));
        let info = client
            .get_contact_info_by_lead_id(26378833)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.name.as_deref(), Some("Ivan Petrov"));
        assert_eq!(info.phone.as_ref().and_then(|p| p.first()), Some("+70000000001"));
    }

    #[tokio::test]
    async fn empty_lookups_are_not_errors() {
        let mut server = Server::new_async().await;
        let _lead = server
            .mock("GET", "/api/v2/leads?id=1")
            .with_status(204)
            .create_async()
            .await;

        let client = client(&server.url(), Some(("a0", "r0")));
        assert_eq!(client.get_lead_info(1).await.unwrap(), LeadInfo::default());
        assert_eq!(client.get_contact_info_by_lead_id(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upstream_failures_are_errors() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v2/leads?id=1")
            .with_status(401)
            .create_async()
            .await;

        let client = client(&server.url(), Some(("a0", "r0")));
        assert!(matches!(
            client.get_lead_info(1).await,
            Err(CrmError::UpstreamStatus(StatusCode::UNAUTHORIZED))
        ));
    }
}
