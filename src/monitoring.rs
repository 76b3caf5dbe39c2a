//! PMM monitoring stack
//!
//! Provisioning writes a credentials secret, a `VMAgent` that remote-writes
//! into PMM's VictoriaMetrics with those credentials, and the bundled scrape
//! and kube-state-metrics manifests. The PMM API client mints the admin API
//! key used as the password.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::PmmConfig;
use crate::connector::Connector;
use crate::manifest::ManifestResource;
use crate::manifests::{ManifestSource, MONITORING_CLEANUP_MANIFESTS, MONITORING_MANIFESTS};
use crate::retry::RetryConfig;
use crate::Error;

/// VMAgent API version
pub const VMAGENT_API_VERSION: &str = "operator.victoriametrics.com/v1beta1";

/// Name of the credentials secret for a given random suffix
pub fn secret_name(suffix: u64) -> String {
    format!("vm-operator-{}", suffix)
}

/// Opaque secret holding the PMM login and password
pub fn credentials_secret(name: &str, namespace: &str, login: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([
            ("username".to_string(), ByteString(login.as_bytes().to_vec())),
            ("password".to_string(), ByteString(password.as_bytes().to_vec())),
        ])),
        ..Default::default()
    }
}

/// `VMAgent` writing every scraped series to the PMM server at `address`.
///
/// Basic auth is read from `secret`'s `username` and `password` keys.
pub fn vm_agent(secret: &str, namespace: &str, address: &str) -> Result<ManifestResource, Error> {
    let basic_auth_key = |key: &str| json!({ "name": secret, "key": key });

    ManifestResource::from_value(json!({
        "apiVersion": VMAGENT_API_VERSION,
        "kind": "VMAgent",
        "metadata": {
            "name": format!("pmm-vmagent-{}", secret),
            "namespace": namespace,
        },
        "spec": {
            "serviceScrapeNamespaceSelector": {},
            "serviceScrapeSelector": {},
            "podScrapeNamespaceSelector": {},
            "podScrapeSelector": {},
            "probeSelector": {},
            "probeNamespaceSelector": {},
            "staticScrapeSelector": {},
            "staticScrapeNamespaceSelector": {},
            "replicaCount": 1,
            "selectAllByDefault": true,
            "resources": {
                "requests": { "cpu": "250m", "memory": "350Mi" },
                "limits": { "cpu": "500m", "memory": "850Mi" },
            },
            "extraArgs": { "memory.allowedPercent": "40" },
            "remoteWrite": [{
                "url": format!("{}/victoriametrics/api/v1/write", address),
                "tlsConfig": { "insecureSkipVerify": true },
                "basicAuth": {
                    "username": basic_auth_key("username"),
                    "password": basic_auth_key("password"),
                },
            }],
        },
    }))
}

/// Installs and removes the monitoring stack.
pub struct MonitoringProvisioner {
    connector: Arc<Connector>,
    manifests: Arc<dyn ManifestSource>,
    namespace: String,
    retry: RetryConfig,
}

impl MonitoringProvisioner {
    /// Create a provisioner writing secrets and the agent into `namespace`
    pub fn new(
        connector: Arc<Connector>,
        manifests: Arc<dyn ManifestSource>,
        namespace: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            connector,
            manifests,
            namespace: namespace.into(),
            retry,
        }
    }

    /// Provision monitoring for the PMM server at `pmm_address`.
    ///
    /// Returns the name of the credentials secret.
    pub async fn provision_monitoring(
        &self,
        login: &str,
        password: &str,
        pmm_address: &str,
    ) -> Result<String, Error> {
        let secret = secret_name(OsRng.next_u64());
        let resource = ManifestResource::from_object(&credentials_secret(
            &secret,
            &self.namespace,
            login,
            password,
        ))?;
        self.connector
            .apply_resource(&resource)
            .await
            .map_err(|e| Error::monitoring(format!("cannot create secret {}: {}", secret, e)))?;
        debug!(secret = %secret, namespace = %self.namespace, "created monitoring credentials");

        let agent = vm_agent(&secret, &self.namespace, pmm_address)?;
        self.connector
            .apply_resource(&agent)
            .await
            .map_err(|e| Error::monitoring(format!("cannot apply vm agent spec: {}", e)))?;
        info!(vmagent = %agent.name, "applied VMAgent");

        for path in MONITORING_MANIFESTS {
            let manifest = self.manifests.read(path).await?;
            self.connector
                .apply_manifest_with_retry(&manifest, &self.retry)
                .await
                .map_err(|e| Error::monitoring(format!("cannot apply file {}: {}", path, e)))?;
            debug!(manifest = path, "applied");
        }

        info!(pmm = pmm_address, "monitoring provisioned");
        Ok(secret)
    }

    /// Delete the monitoring manifests.
    ///
    /// The secret and VMAgent are left in place.
    pub async fn cleanup_monitoring(&self) -> Result<(), Error> {
        for path in MONITORING_CLEANUP_MANIFESTS {
            let manifest = self.manifests.read(path).await?;
            self.connector
                .delete_manifest(&manifest)
                .await
                .map_err(|e| Error::monitoring(format!("cannot delete file {}: {}", path, e)))?;
            debug!(manifest = path, "deleted");
        }
        info!("monitoring removed");
        Ok(())
    }
}

#[derive(Deserialize)]
struct ApiKeyResponse {
    key: String,
}

/// Client for the PMM server HTTP API
#[derive(Clone, Debug)]
pub struct PmmClient {
    http: reqwest::Client,
    config: PmmConfig,
}

impl PmmClient {
    /// Create a client for the configured PMM server
    pub fn new(config: PmmConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(crate::connector::DEFAULT_READ_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("cannot build http client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Create an Admin API key named `name` and return its secret value.
    ///
    /// Authenticates with `token` as a bearer token when given, otherwise with
    /// the configured username and password.
    pub async fn create_admin_token(&self, name: &str, token: Option<&str>) -> Result<String, Error> {
        let url = format!(
            "{}/graph/api/auth/keys",
            self.config.endpoint.trim_end_matches('/')
        );
        let request = self
            .http
            .post(&url)
            .json(&json!({ "name": name, "role": "Admin" }));
        let request = match token {
            Some(token) => request.bearer_auth(token),
            None => request.basic_auth(&self.config.username, Some(&self.config.password)),
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("POST {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::http(format!("POST {} returned {}: {}", url, status, body)));
        }

        let body: ApiKeyResponse = response
            .json()
            .await
            .map_err(|e| Error::http(format!("invalid api key response: {}", e)))?;
        info!(account = name, "created PMM admin api key");
        Ok(body.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockPlatformClient;
    use crate::manifests::MemoryManifestSource;
    use std::sync::Mutex;
    use std::time::Duration;

    fn bundled() -> MemoryManifestSource {
        MONITORING_MANIFESTS
            .iter()
            .fold(MemoryManifestSource::new(), |source, path| {
                source.with_file(*path, *path)
            })
    }

    fn provisioner(mock: MockPlatformClient) -> MonitoringProvisioner {
        MonitoringProvisioner::new(
            Arc::new(Connector::new(Arc::new(mock))),
            Arc::new(bundled()),
            "default",
            RetryConfig::fixed(3, Duration::from_secs(10)),
        )
    }

    // ==========================================================================
    // Story: provisioning writes credentials, the agent, then every manifest
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn provision_applies_secret_agent_and_manifests_in_order() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut mock = MockPlatformClient::new();

        let l = log.clone();
        mock.expect_apply_resource().returning(move |r| {
            l.lock().unwrap().push(format!("{} {}", r.gvk.kind, r.name));
            Ok(())
        });
        let l = log.clone();
        mock.expect_apply_manifest().returning(move |bytes| {
            l.lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
            Ok(())
        });

        let secret = provisioner(mock)
            .provision_monitoring("svc-account", "api-key", "https://pmm.example.com")
            .await
            .unwrap();

        assert!(secret.starts_with("vm-operator-"));
        let log = log.lock().unwrap();
        assert_eq!(log[0], format!("Secret {}", secret));
        assert_eq!(log[1], format!("VMAgent pmm-vmagent-{}", secret));
        assert_eq!(&log[2..], MONITORING_MANIFESTS);
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_manifest_is_retried_then_succeeds() {
        let failures = Arc::new(Mutex::new(1));
        let mut mock = MockPlatformClient::new();
        mock.expect_apply_resource().returning(|_| Ok(()));
        let f = failures.clone();
        mock.expect_apply_manifest().returning(move |_| {
            let mut remaining = f.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::not_found("vmagents.operator.victoriametrics.com"));
            }
            Ok(())
        });

        let start = tokio::time::Instant::now();
        provisioner(mock)
            .provision_monitoring("svc", "key", "https://pmm")
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_manifest_failure_names_the_file() {
        let mut mock = MockPlatformClient::new();
        mock.expect_apply_resource().returning(|_| Ok(()));
        mock.expect_apply_manifest()
            .times(3)
            .returning(|_| Err(Error::not_found("crd")));

        let err = provisioner(mock)
            .provision_monitoring("svc", "key", "https://pmm")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Monitoring { .. }));
        assert!(err.to_string().contains("vmagent_rbac.yaml"));
    }

    #[tokio::test]
    async fn cleanup_deletes_in_cleanup_order() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut mock = MockPlatformClient::new();
        let l = log.clone();
        mock.expect_delete_manifest().returning(move |bytes| {
            l.lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
            Ok(())
        });

        provisioner(mock).cleanup_monitoring().await.unwrap();
        assert_eq!(*log.lock().unwrap(), MONITORING_CLEANUP_MANIFESTS);
    }

    // ==========================================================================
    // Generated objects
    // ==========================================================================

    #[test]
    fn vm_agent_points_remote_write_at_pmm() {
        let agent = vm_agent("vm-operator-42", "default", "https://pmm.example.com").unwrap();
        assert_eq!(agent.name, "pmm-vmagent-vm-operator-42");
        assert_eq!(agent.api_version(), VMAGENT_API_VERSION);

        let write = &agent.value["spec"]["remoteWrite"][0];
        assert_eq!(
            write["url"],
            "https://pmm.example.com/victoriametrics/api/v1/write"
        );
        assert_eq!(write["tlsConfig"]["insecureSkipVerify"], true);
        assert_eq!(write["basicAuth"]["password"]["name"], "vm-operator-42");
        assert_eq!(write["basicAuth"]["password"]["key"], "password");
        assert_eq!(agent.value["spec"]["resources"]["limits"]["memory"], "850Mi");
    }

    #[test]
    fn secret_carries_both_credentials() {
        let secret = credentials_secret("vm-operator-7", "default", "admin", "s3cret");
        let data = secret.data.unwrap();
        assert_eq!(data["username"].0, b"admin");
        assert_eq!(data["password"].0, b"s3cret");
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    }

    // ==========================================================================
    // Story: the PMM API mints an admin key
    // ==========================================================================

    /// Serve one canned HTTP response and hand back the raw request.
    async fn one_shot_server(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn admin_token_uses_basic_auth_without_token() {
        let (endpoint, server) =
            one_shot_server("200 OK", r#"{"id":1,"name":"svc","key":"glsa_abc"}"#).await;
        let client = PmmClient::new(PmmConfig {
            endpoint,
            username: "admin".to_string(),
            password: "admin".to_string(),
        })
        .unwrap();

        let key = client.create_admin_token("svc", None).await.unwrap();
        assert_eq!(key, "glsa_abc");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /graph/api/auth/keys "));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: basic ywrtaw46ywrtaw4="));
    }

    #[tokio::test]
    async fn admin_token_error_status_is_http_error() {
        let (endpoint, server) =
            one_shot_server("401 Unauthorized", r#"{"message":"invalid"}"#).await;
        let client = PmmClient::new(PmmConfig {
            endpoint,
            ..Default::default()
        })
        .unwrap();

        let err = client
            .create_admin_token("svc", Some("token"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http { .. }));

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.contains("authorization: bearer token"));
    }
}
