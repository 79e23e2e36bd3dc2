// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! reqwest-based implementation of [`DynatraceClient`].

use super::{
    endpoints::parse_oneagent_endpoints, ActiveGateConnectionInfo, DtResult, DynatraceClient,
    EventData, OneAgentConnectionInfo, ProcessModuleConfig, ProxyUrl, TokenScopes, TokenSet,
};
use crate::constants::timing;
use crate::error::DynatraceApiError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Certificate, Client, Method, NoProxy, Proxy, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_NETWORK_ZONE: &str = "default";

/// Everything needed to talk to one Dynatrace environment
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_url: String,
    pub tokens: TokenSet,
    pub network_zone: Option<String>,
    pub skip_cert_check: bool,
    /// PEM bundle of additional trusted certificates
    pub trusted_certs: Option<String>,
    pub proxy: Option<ProxyUrl>,
    pub no_proxy: Option<String>,
    pub disable_host_requests: bool,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(api_url: &str, tokens: TokenSet) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
            network_zone: None,
            skip_cert_check: false,
            trusted_certs: None,
            proxy: None,
            no_proxy: None,
            disable_host_requests: false,
            timeout: timing::DYNATRACE_HTTP_TIMEOUT,
        }
    }
}

pub struct DynatraceHttpClient {
    http: Client,
    url: String,
    api_token: String,
    paas_token: String,
    network_zone: Option<String>,
    disable_host_requests: bool,
    /// IP address to host entity ID, filled on first lookup
    hosts: Mutex<Option<HashMap<String, String>>>,
}

#[derive(Deserialize)]
struct ServerErrorResponse {
    error: ServerError,
}

#[derive(Deserialize)]
struct ServerError {
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TokenLookupResponse {
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OneAgentConnectionInfoResponse {
    #[serde(rename = "tenantUUID")]
    tenant_uuid: String,
    #[serde(default)]
    tenant_token: String,
    #[serde(default)]
    communication_endpoints: Vec<String>,
    #[serde(default)]
    formatted_communication_endpoints: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveGateConnectionInfoResponse {
    #[serde(rename = "tenantUUID")]
    tenant_uuid: String,
    #[serde(default)]
    tenant_token: String,
    #[serde(default)]
    communication_endpoints: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostInfo {
    entity_id: String,
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    last_seen_timestamp: i64,
    #[serde(default)]
    network_zone_id: Option<String>,
}

impl DynatraceHttpClient {
    pub fn new(options: ClientOptions) -> DtResult<Self> {
        let mut builder = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.skip_cert_check);

        if let Some(pem) = options.trusted_certs.as_deref() {
            let certs = Certificate::from_pem_bundle(pem.as_bytes())
                .map_err(|e| DynatraceApiError::Other(format!("invalid trusted certificates: {}", e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        builder = match &options.proxy {
            Some(proxy) => {
                let proxy = Proxy::all(proxy.to_string())
                    .map_err(|e| DynatraceApiError::Other(format!("invalid proxy: {}", e)))?
                    .no_proxy(options.no_proxy.as_deref().and_then(NoProxy::from_string));
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let http = builder
            .build()
            .map_err(|e| DynatraceApiError::Other(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            url: options.api_url,
            api_token: options.tokens.api_token.clone(),
            paas_token: options.tokens.paas_token().to_string(),
            network_zone: options.network_zone,
            disable_host_requests: options.disable_host_requests,
            hosts: Mutex::new(None),
        })
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.url, path))
            .header("Authorization", format!("Api-Token {}", token))
            .header("Accept", "application/json")
    }

    /// Send a request, decoding the body as `T` on success.
    /// GET requests are retried on transport errors and 5xx responses.
    async fn send<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> RequestBuilder,
        retry: bool,
    ) -> DtResult<Option<T>> {
        let attempts = if retry { MAX_ATTEMPTS } else { 1 };
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;

        loop {
            let result = self.send_once(build()).await;
            match result {
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    warn!(
                        "Dynatrace request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, attempts, delay, e
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> DtResult<Option<T>> {
        let response = request
            .send()
            .await
            .map_err(|e| DynatraceApiError::Transport(e.to_string()))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DynatraceApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(server_error(status, &body));
        }

        if body.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| DynatraceApiError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> DtResult<Option<T>> {
        self.send(|| self.request(Method::GET, path, token).query(query), true)
            .await
    }

    fn network_zone_query(&self, with_fallback: bool) -> Vec<(&'static str, String)> {
        match &self.network_zone {
            Some(zone) if with_fallback => vec![
                ("networkZone", zone.clone()),
                ("defaultZoneFallback", "true".to_string()),
            ],
            Some(zone) => vec![("networkZone", zone.clone())],
            None => vec![],
        }
    }

    async fn load_hosts(&self) -> DtResult<HashMap<String, String>> {
        let hosts: Vec<HostInfo> = self
            .get(
                "/v1/entity/infrastructure/hosts",
                &self.api_token,
                &[("includeDetails", "false".to_string())],
            )
            .await?
            .unwrap_or_default();

        let seen_after = Utc::now().timestamp_millis() - timing::HOST_SEEN_WINDOW.as_millis() as i64;
        let mut by_ip = HashMap::new();
        for host in hosts {
            if host.last_seen_timestamp < seen_after || !self.in_network_zone(&host) {
                continue;
            }
            for ip in host.ip_addresses {
                by_ip.insert(ip, host.entity_id.clone());
            }
        }
        debug!("Loaded {} host IP addresses", by_ip.len());
        Ok(by_ip)
    }

    fn in_network_zone(&self, host: &HostInfo) -> bool {
        let zone = host.network_zone_id.as_deref().unwrap_or_default();
        match &self.network_zone {
            Some(expected) => zone == expected,
            None => zone.is_empty() || zone == DEFAULT_NETWORK_ZONE,
        }
    }
}

fn is_retryable(err: &DynatraceApiError) -> bool {
    match err {
        DynatraceApiError::Transport(_) => true,
        DynatraceApiError::Server { code, .. } => *code >= 500,
        _ => false,
    }
}

fn server_error(status: StatusCode, body: &[u8]) -> DynatraceApiError {
    match serde_json::from_slice::<ServerErrorResponse>(body) {
        Ok(resp) => DynatraceApiError::Server {
            code: resp.error.code,
            message: resp.error.message,
        },
        Err(_) => DynatraceApiError::Server {
            code: status.as_u16(),
            message: String::from_utf8_lossy(body).chars().take(256).collect(),
        },
    }
}

fn missing_body(endpoint: &str) -> DynatraceApiError {
    DynatraceApiError::Decode(format!("empty response from {}", endpoint))
}

#[async_trait]
impl DynatraceClient for DynatraceHttpClient {
    #[instrument(skip(self, token))]
    async fn get_token_scopes(&self, token: &str) -> DtResult<TokenScopes> {
        let body = serde_json::json!({ "token": token });
        let response: TokenLookupResponse = self
            .send(
                || {
                    self.request(Method::POST, "/v1/tokens/lookup", token)
                        .json(&body)
                },
                false,
            )
            .await?
            .ok_or_else(|| missing_body("token lookup"))?;

        Ok(TokenScopes(response.scopes))
    }

    #[instrument(skip(self))]
    async fn get_oneagent_connection_info(&self) -> DtResult<OneAgentConnectionInfo> {
        let response: OneAgentConnectionInfoResponse = self
            .get(
                "/v1/deployment/installer/agent/connectioninfo",
                &self.paas_token,
                &self.network_zone_query(true),
            )
            .await?
            .ok_or_else(|| missing_body("oneagent connection info"))?;

        let endpoints = if response.formatted_communication_endpoints.is_empty() {
            response.communication_endpoints.join(";")
        } else {
            response.formatted_communication_endpoints
        };

        Ok(OneAgentConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            tenant_token: response.tenant_token,
            communication_hosts: parse_oneagent_endpoints(
                response.communication_endpoints.iter().map(String::as_str),
            ),
            endpoints,
        })
    }

    #[instrument(skip(self))]
    async fn get_activegate_connection_info(&self) -> DtResult<ActiveGateConnectionInfo> {
        let response: ActiveGateConnectionInfoResponse = self
            .get(
                "/v1/deployment/installer/gateway/connectioninfo",
                &self.paas_token,
                &self.network_zone_query(false),
            )
            .await?
            .ok_or_else(|| missing_body("activegate connection info"))?;

        Ok(ActiveGateConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            tenant_token: response.tenant_token,
            endpoints: response.communication_endpoints,
        })
    }

    #[instrument(skip(self))]
    async fn get_process_module_config(&self, prev_revision: u64) -> DtResult<ProcessModuleConfig> {
        let config: Option<ProcessModuleConfig> = self
            .get(
                "/v1/deployment/installer/agent/processmoduleconfig",
                &self.paas_token,
                &[
                    ("revision", prev_revision.to_string()),
                    ("sections", "general,agentType".to_string()),
                ],
            )
            .await?;

        // Not modified since `prev_revision`
        Ok(config.unwrap_or(ProcessModuleConfig {
            revision: prev_revision,
            properties: vec![],
        }))
    }

    #[instrument(skip(self))]
    async fn get_entity_id_for_ip(&self, ip: &str) -> DtResult<String> {
        if self.disable_host_requests {
            return Err(DynatraceApiError::HostNotFound(ip.to_string()));
        }

        let mut hosts = self.hosts.lock().await;
        if hosts.is_none() {
            *hosts = Some(self.load_hosts().await?);
        }

        hosts
            .as_ref()
            .and_then(|h| h.get(ip))
            .cloned()
            .ok_or_else(|| DynatraceApiError::HostNotFound(ip.to_string()))
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn send_event(&self, event: &EventData) -> DtResult<()> {
        self.send::<serde_json::Value>(
            || {
                self.request(Method::POST, "/v1/events", &self.api_token)
                    .json(event)
            },
            false,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_tokens() -> TokenSet {
        TokenSet {
            api_token: "api-token".to_string(),
            paas_token: Some("paas-token".to_string()),
            data_ingest_token: None,
        }
    }

    fn make_client(server: &MockServer, network_zone: Option<&str>) -> DynatraceHttpClient {
        let mut options = ClientOptions::new(&server.uri(), make_tokens());
        options.network_zone = network_zone.map(str::to_string);
        DynatraceHttpClient::new(options).unwrap()
    }

    #[tokio::test]
    async fn test_get_token_scopes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens/lookup"))
            .and(header("Authorization", "Api-Token paas-token"))
            .and(body_json(json!({"token": "paas-token"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "scopes": ["InstallerDownload", "DataExport"]
            })))
            .mount(&server)
            .await;

        let scopes = make_client(&server, None)
            .get_token_scopes("paas-token")
            .await
            .unwrap();

        assert!(scopes.contains("InstallerDownload"));
        assert!(scopes.contains("DataExport"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens/lookup"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": 401, "message": "Token Authentication failed"}
            })))
            .mount(&server)
            .await;

        let err = make_client(&server, None)
            .get_token_scopes("bad")
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(
            err.to_string(),
            "dynatrace server error 401: Token Authentication failed"
        );
    }

    #[tokio::test]
    async fn test_oneagent_connection_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/deployment/installer/agent/connectioninfo"))
            .and(header("Authorization", "Api-Token paas-token"))
            .and(query_param("networkZone", "zone-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tenantUUID": "abc123456",
                "tenantToken": "tenant-token",
                "communicationEndpoints": [
                    "https://abc.live.dynatrace.com/communication",
                    "https://10.0.0.1:9999/communication"
                ],
                "formattedCommunicationEndpoints": "https://abc.live.dynatrace.com/communication;https://10.0.0.1:9999/communication"
            })))
            .mount(&server)
            .await;

        let info = make_client(&server, Some("zone-a"))
            .get_oneagent_connection_info()
            .await
            .unwrap();

        assert_eq!(info.tenant_uuid, "abc123456");
        assert_eq!(info.tenant_token, "tenant-token");
        assert_eq!(info.communication_hosts.len(), 2);
        assert_eq!(info.communication_hosts[1].port, 9999);
        assert!(info.endpoints.contains(';'));
    }

    #[tokio::test]
    async fn test_activegate_connection_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/deployment/installer/gateway/connectioninfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tenantUUID": "abc123456",
                "tenantToken": "ag-token",
                "communicationEndpoints": "https://ag1/communication,https://ag2/communication"
            })))
            .mount(&server)
            .await;

        let info = make_client(&server, None)
            .get_activegate_connection_info()
            .await
            .unwrap();

        assert_eq!(info.tenant_token, "ag-token");
        assert_eq!(
            info.endpoints,
            "https://ag1/communication,https://ag2/communication"
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/deployment/installer/agent/processmoduleconfig"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/deployment/installer/agent/processmoduleconfig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "revision": 7,
                "properties": [{"section": "general", "key": "storage", "value": "/var/lib"}]
            })))
            .mount(&server)
            .await;

        let pmc = make_client(&server, None)
            .get_process_module_config(0)
            .await
            .unwrap();

        assert_eq!(pmc.revision, 7);
        assert_eq!(pmc.get("general", "storage"), Some("/var/lib"));
    }

    #[tokio::test]
    async fn test_too_many_requests_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/deployment/installer/gateway/connectioninfo"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let err = make_client(&server, None)
            .get_activegate_connection_info()
            .await
            .unwrap_err();

        assert!(err.is_too_many_requests());
    }

    #[tokio::test]
    async fn test_entity_id_for_ip_filters_hosts() {
        let server = MockServer::start().await;
        let now = Utc::now().timestamp_millis();
        Mock::given(method("GET"))
            .and(path("/v1/entity/infrastructure/hosts"))
            .and(header("Authorization", "Api-Token api-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"entityId": "HOST-42", "ipAddresses": ["1.2.3.4"], "lastSeenTimestamp": now},
                {"entityId": "HOST-OLD", "ipAddresses": ["5.6.7.8"], "lastSeenTimestamp": now - 3_600_000},
                {"entityId": "HOST-ZONE", "ipAddresses": ["9.9.9.9"], "lastSeenTimestamp": now, "networkZoneId": "other"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server, None);

        assert_eq!(client.get_entity_id_for_ip("1.2.3.4").await.unwrap(), "HOST-42");
        assert_eq!(
            client.get_entity_id_for_ip("5.6.7.8").await.unwrap_err(),
            DynatraceApiError::HostNotFound("5.6.7.8".to_string())
        );
        assert!(client.get_entity_id_for_ip("9.9.9.9").await.is_err());
    }

    #[tokio::test]
    async fn test_send_event() {
        let server = MockServer::start().await;
        let event = EventData::marked_for_termination("HOST-42", 1000);
        Mock::given(method("POST"))
            .and(path("/v1/events"))
            .and(header("Authorization", "Api-Token api-token"))
            .and(body_json(serde_json::to_value(&event).unwrap()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"storedEventIds": [1]})))
            .expect(1)
            .mount(&server)
            .await;

        make_client(&server, None).send_event(&event).await.unwrap();
    }
}
