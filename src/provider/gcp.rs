//! Cloud control plane provider
//!
//! Talks to the Google Cloud REST APIs directly with `reqwest`. Creates are
//! idempotent: a 409 on create means the resource already exists and it is
//! read back instead. IAM changes are read-modify-write on the resource's
//! policy and leave the policy untouched when the member is already bound.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{poll_until, ProviderRequest, ResourceProvider};
use crate::graph::ResourceKind;
use crate::output::OutputAttributes;
use crate::{Error, Result};

const API: &str = "cloud";
const CONTAINER: &str = "https://container.googleapis.com/v1";
const IAM: &str = "https://iam.googleapis.com/v1";
const RESOURCE_MANAGER: &str = "https://cloudresourcemanager.googleapis.com/v1";
const STORAGE: &str = "https://storage.googleapis.com/storage/v1";
const STORAGE_UPLOAD: &str = "https://storage.googleapis.com/upload/storage/v1";
const FUNCTIONS: &str = "https://cloudfunctions.googleapis.com/v1";

/// Environment variable holding a pre-issued access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Cloud provider settings
#[derive(Clone, Debug)]
pub struct GcpConfig {
    /// Default project for resources that do not name one
    pub project: String,
    /// Default zone for clusters
    pub zone: String,
    /// Default region for functions
    pub region: String,
    /// Access token; falls back to the environment, then to gcloud
    pub access_token: Option<String>,
    /// Directory relative source archive paths resolve against
    pub source_dir: PathBuf,
    /// Interval between long-running operation polls
    pub poll_interval: Duration,
    /// Upper bound for cluster and function provisioning
    pub operation_timeout: Duration,
}

impl GcpConfig {
    /// Settings for `project`/`zone` with default timing
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            region: region.into(),
            access_token: None,
            source_dir: PathBuf::from("."),
            poll_interval: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of a REST call that is not an outright failure
#[derive(Debug, PartialEq)]
enum Reply {
    Ok(Value),
    Conflict,
    NotFound,
}

/// Map an error status to an [`Error::ExternalApi`]
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let message = format!("{status}: {message}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::external_retryable(API, message)
    } else {
        Error::external(API, message)
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::external_retryable(API, e.to_string())
    } else {
        Error::external(API, e.to_string())
    }
}

/// `policy` with `member` bound to `role`, or `None` if already bound
fn policy_with_member(mut policy: Value, role: &str, member: &str) -> Option<Value> {
    let bindings = policy
        .as_object_mut()?
        .entry("bindings")
        .or_insert_with(|| json!([]))
        .as_array_mut()?;

    match bindings.iter_mut().find(|b| b["role"] == role) {
        Some(binding) => {
            let members = binding
                .as_object_mut()?
                .entry("members")
                .or_insert_with(|| json!([]))
                .as_array_mut()?;
            if members.iter().any(|m| m == member) {
                return None;
            }
            members.push(json!(member));
        }
        None => bindings.push(json!({"role": role, "members": [member]})),
    }
    Some(policy)
}

/// `policy` with `member` removed from `role`, or `None` if it was not bound
fn policy_without_member(mut policy: Value, role: &str, member: &str) -> Option<Value> {
    let bindings = policy.get_mut("bindings")?.as_array_mut()?;
    let binding = bindings.iter_mut().find(|b| b["role"] == role)?;
    let members = binding.get_mut("members")?.as_array_mut()?;
    let before = members.len();
    members.retain(|m| m != member);
    if members.len() == before {
        return None;
    }
    bindings.retain(|b| b["members"].as_array().is_some_and(|m| !m.is_empty()));
    Some(policy)
}

/// Outputs of a RUNNING cluster
fn cluster_outputs(cluster: &Value, requested: &Value) -> Result<OutputAttributes> {
    let field = |pointer: &str| {
        cluster
            .pointer(pointer)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::external(API, format!("cluster response is missing {pointer}")))
    };
    let mut out = OutputAttributes::new()
        .with("name", field("/name")?)
        .with("endpoint", field("/endpoint")?)
        .with("clusterCaCertificate", field("/masterAuth/clusterCaCertificate")?)
        .with("location", field("/location")?);
    if let Some(username) = requested.pointer("/masterAuth/username") {
        out.insert("masterUsername", username.clone());
    }
    if let Some(password) = requested.pointer("/masterAuth/password") {
        out = out.with_secret("masterPassword", password.clone());
    }
    Ok(out)
}

fn encode_path_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

/// Google Cloud provider
pub struct GcpProvider {
    http: reqwest::Client,
    config: GcpConfig,
    token: OnceCell<String>,
}

impl GcpProvider {
    /// Create a provider
    pub fn new(config: GcpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| async {
                if let Some(token) = &self.config.access_token {
                    return Ok(token.clone());
                }
                if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
                    return Ok(token);
                }
                let output = tokio::process::Command::new("gcloud")
                    .args(["auth", "print-access-token"])
                    .output()
                    .await
                    .map_err(|e| {
                        Error::config(format!("cannot run gcloud for an access token: {e}"))
                    })?;
                if !output.status.success() {
                    return Err(Error::config(format!(
                        "gcloud auth print-access-token failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                Ok::<_, Error>(String::from_utf8_lossy(&output.stdout).trim().to_string())
            })
            .await
            .map(String::as_str)
    }

    async fn call(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Reply> {
        let token = self.token().await?;
        let mut builder = self.http.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(transport_error)?;
        debug!(method = %method, url = %url, status = %response.status(), "cloud API call");
        Self::reply(response).await
    }

    async fn reply(response: reqwest::Response) -> Result<Reply> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        match status {
            s if s.is_success() => {
                if text.trim().is_empty() {
                    Ok(Reply::Ok(Value::Null))
                } else {
                    Ok(Reply::Ok(serde_json::from_str(&text)?))
                }
            }
            StatusCode::CONFLICT => Ok(Reply::Conflict),
            StatusCode::NOT_FOUND => Ok(Reply::NotFound),
            s => Err(status_error(s, &text)),
        }
    }

    /// GET that must find the resource
    async fn get(&self, url: &str) -> Result<Value> {
        match self.call(Method::GET, url, None).await? {
            Reply::Ok(v) => Ok(v),
            Reply::Conflict => {
                Err(Error::external_retryable(API, format!("conflict reading {url}")))
            }
            Reply::NotFound => Err(Error::external(API, format!("{url} not found"))),
        }
    }

    /// DELETE where a missing resource counts as deleted
    async fn delete_url(&self, url: &str) -> Result<()> {
        match self.call(Method::DELETE, url, None).await? {
            Reply::Ok(_) | Reply::NotFound => Ok(()),
            Reply::Conflict => {
                Err(Error::external_retryable(API, format!("conflict deleting {url}")))
            }
        }
    }

    fn project<'a>(&'a self, request: &'a ProviderRequest) -> &'a str {
        request.opt_str("project").unwrap_or(&self.config.project)
    }

    /// Read-modify-write of an IAM policy
    async fn update_policy<F>(&self, resource: &str, get_method: Method, edit: F) -> Result<bool>
    where
        F: FnOnce(Value) -> Option<Value>,
    {
        let empty = json!({});
        let get_body = (get_method == Method::POST).then_some(&empty);
        let policy = match self
            .call(get_method, &format!("{resource}:getIamPolicy"), get_body)
            .await?
        {
            Reply::Ok(v) if v.is_null() => json!({}),
            Reply::Ok(v) => v,
            Reply::NotFound => return Err(Error::external(API, format!("{resource} not found"))),
            Reply::Conflict => {
                return Err(Error::external_retryable(
                    API,
                    format!("conflict reading {resource} policy"),
                ))
            }
        };

        let Some(updated) = edit(policy) else {
            return Ok(false);
        };
        match self
            .call(
                Method::POST,
                &format!("{resource}:setIamPolicy"),
                Some(&json!({ "policy": updated })),
            )
            .await?
        {
            Reply::Ok(_) => Ok(true),
            // Concurrent policy edits fail the etag check
            Reply::Conflict => Err(Error::external_retryable(
                API,
                format!("concurrent modification of {resource} policy"),
            )),
            Reply::NotFound => Err(Error::external(API, format!("{resource} not found"))),
        }
    }

    fn iam_target(&self, request: &ProviderRequest) -> Result<(String, Method)> {
        let project = self.project(request);
        match request.kind() {
            ResourceKind::ProjectIamBinding => {
                Ok((format!("{RESOURCE_MANAGER}/projects/{project}"), Method::POST))
            }
            ResourceKind::ServiceAccountIamBinding => Ok((
                format!(
                    "{IAM}/projects/{project}/serviceAccounts/{}",
                    request.str_field("serviceAccount")?
                ),
                Method::POST,
            )),
            ResourceKind::FunctionIamMember => Ok((self.function_url(request)?, Method::GET)),
            other => Err(Error::validation(format!("{other} has no IAM policy"))),
        }
    }

    async fn bind_member(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let role = request.str_field("role")?;
        let member = request.str_field("member")?;
        let (resource, get_method) = self.iam_target(request)?;

        let changed = self
            .update_policy(&resource, get_method, |p| policy_with_member(p, role, member))
            .await?;
        info!(role = %role, member = %member, changed, "IAM member bound");
        Ok(OutputAttributes::new().with("role", role).with("member", member))
    }

    async fn unbind_member(&self, request: &ProviderRequest) -> Result<()> {
        let role = request.str_field("role")?;
        let member = request.str_field("member")?;
        let (resource, get_method) = self.iam_target(request)?;
        self.update_policy(&resource, get_method, |p| policy_without_member(p, role, member))
            .await?;
        Ok(())
    }

    fn cluster_url(&self, request: &ProviderRequest) -> Result<(String, String)> {
        let zone = request.opt_str("zone").unwrap_or(&self.config.zone);
        let name = request
            .require("cluster")?
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation(format!("{} cluster.name is required", request.id)))?;
        let collection = format!(
            "{CONTAINER}/projects/{}/locations/{zone}/clusters",
            self.project(request)
        );
        Ok((format!("{collection}/{name}"), collection))
    }

    async fn create_cluster(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let requested = request.require("cluster")?;
        let (url, collection) = self.cluster_url(request)?;

        match self
            .call(Method::POST, &collection, Some(&json!({ "cluster": requested })))
            .await?
        {
            Reply::Ok(_) => info!(cluster = %request.name(), "cluster creation started"),
            Reply::Conflict => info!(cluster = %request.name(), "cluster already exists"),
            Reply::NotFound => {
                return Err(Error::external(API, format!("project or zone not found: {collection}")))
            }
        }

        let cluster = poll_until(
            API,
            &format!("cluster {} to be RUNNING", request.name()),
            self.config.operation_timeout,
            self.config.poll_interval,
            || async {
                let cluster = self.get(&url).await?;
                match cluster.get("status").and_then(Value::as_str) {
                    Some("RUNNING") => Ok(Some(cluster)),
                    Some("ERROR") | Some("DEGRADED") => Err(Error::external(
                        API,
                        format!(
                            "cluster entered {}: {}",
                            cluster["status"],
                            cluster.get("statusMessage").and_then(Value::as_str).unwrap_or("")
                        ),
                    )),
                    _ => Ok(None),
                }
            },
        )
        .await?;

        cluster_outputs(&cluster, requested)
    }

    async fn delete_cluster(&self, request: &ProviderRequest) -> Result<()> {
        let (url, _) = self.cluster_url(request)?;
        self.delete_url(&url).await?;
        poll_until(
            API,
            &format!("cluster {} to be deleted", request.name()),
            self.config.operation_timeout,
            self.config.poll_interval,
            || async {
                match self.call(Method::GET, &url, None).await? {
                    Reply::NotFound => Ok(Some(())),
                    _ => Ok(None),
                }
            },
        )
        .await
    }

    async fn create_service_account(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let project = self.project(request);
        let account_id = request.str_field("accountId")?;
        let body = json!({
            "accountId": account_id,
            "serviceAccount": {"displayName": request.opt_str("displayName").unwrap_or(account_id)},
        });

        let account = match self
            .call(Method::POST, &format!("{IAM}/projects/{project}/serviceAccounts"), Some(&body))
            .await?
        {
            Reply::Ok(v) => v,
            Reply::Conflict | Reply::NotFound => {
                let email = format!("{account_id}@{project}.iam.gserviceaccount.com");
                self.get(&format!("{IAM}/projects/{project}/serviceAccounts/{email}"))
                    .await?
            }
        };

        let email = account
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::external(API, "service account response has no email"))?;
        info!(email = %email, "service account ready");
        Ok(OutputAttributes::new()
            .with("accountId", account_id)
            .with("email", email)
            .with("name", account.get("name").cloned().unwrap_or(Value::Null))
            .with("uniqueId", account.get("uniqueId").cloned().unwrap_or(Value::Null)))
    }

    async fn delete_service_account(
        &self,
        request: &ProviderRequest,
        outputs: &OutputAttributes,
    ) -> Result<()> {
        let email = outputs
            .get_str("email")
            .ok_or_else(|| Error::validation(format!("{} has no recorded email", request.id)))?;
        let project = self.project(request);
        self.delete_url(&format!("{IAM}/projects/{project}/serviceAccounts/{email}"))
            .await
    }

    async fn create_bucket(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let bucket = request.str_field("bucket")?;
        let body = json!({
            "name": bucket,
            "location": request.opt_str("location").unwrap_or("US"),
        });
        let url = format!("{STORAGE}/b?project={}", self.project(request));
        if self.call(Method::POST, &url, Some(&body)).await? == Reply::Conflict {
            // Bucket names are global; a 403 here means someone else owns it
            self.get(&format!("{STORAGE}/b/{bucket}")).await?;
        }
        info!(bucket = %bucket, "bucket ready");
        Ok(OutputAttributes::new()
            .with("name", bucket)
            .with("url", format!("gs://{bucket}")))
    }

    async fn upload_object(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let bucket = request.str_field("bucket")?;
        let object = request.str_field("object")?;
        let source = self.config.source_dir.join(request.str_field("source")?);
        let bytes = tokio::fs::read(&source).await.map_err(|e| {
            Error::validation(format!("{}: cannot read {}: {e}", request.id, source.display()))
        })?;

        let token = self.token().await?;
        let response = self
            .http
            .post(format!("{STORAGE_UPLOAD}/b/{bucket}/o"))
            .query(&[("uploadType", "media"), ("name", object)])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                request.opt_str("contentType").unwrap_or("application/zip"),
            )
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;

        let uploaded = match Self::reply(response).await? {
            Reply::Ok(v) => v,
            Reply::NotFound => {
                return Err(Error::external(API, format!("bucket {bucket} not found")))
            }
            Reply::Conflict => {
                return Err(Error::external_retryable(API, format!("conflict uploading {object}")))
            }
        };
        info!(bucket = %bucket, object = %object, "object uploaded");
        Ok(OutputAttributes::new()
            .with("name", object)
            .with("bucket", bucket)
            .with("gsUrl", format!("gs://{bucket}/{object}"))
            .with("generation", uploaded.get("generation").cloned().unwrap_or(Value::Null)))
    }

    fn function_url(&self, request: &ProviderRequest) -> Result<String> {
        Ok(format!("{FUNCTIONS}/{}", self.function_name(request)?))
    }

    fn function_name(&self, request: &ProviderRequest) -> Result<String> {
        Ok(format!(
            "projects/{}/locations/{}/functions/{}",
            self.project(request),
            request.opt_str("region").unwrap_or(&self.config.region),
            request.str_field("function")?
        ))
    }

    async fn create_function(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let name = self.function_name(request)?;
        let url = self.function_url(request)?;
        let (collection, _) = url
            .rsplit_once('/')
            .ok_or_else(|| Error::validation(format!("invalid function name {name}")))?;

        let mut body = json!({
            "name": name,
            "runtime": request.str_field("runtime")?,
            "entryPoint": request.str_field("entryPoint")?,
            "availableMemoryMb": request.u64_or("availableMemoryMb", 256)?,
            "sourceArchiveUrl": request.str_field("sourceArchiveUrl")?,
        });
        if request.bool_or("triggerHttp", false) {
            body["httpsTrigger"] = json!({});
        }

        match self.call(Method::POST, collection, Some(&body)).await? {
            Reply::Ok(_) => info!(function = %name, "function deployment started"),
            Reply::Conflict => info!(function = %name, "function already exists"),
            Reply::NotFound => return Err(Error::external(API, format!("{collection} not found"))),
        }

        let function = poll_until(
            API,
            &format!("function {name} to be ACTIVE"),
            self.config.operation_timeout,
            self.config.poll_interval,
            || async {
                let function = self.get(&url).await?;
                match function.get("status").and_then(Value::as_str) {
                    Some("ACTIVE") => Ok(Some(function)),
                    Some("OFFLINE") => {
                        Err(Error::external(API, format!("function {name} is OFFLINE")))
                    }
                    _ => Ok(None),
                }
            },
        )
        .await?;

        let mut out = OutputAttributes::new()
            .with("name", request.str_field("function")?)
            .with("region", request.opt_str("region").unwrap_or(&self.config.region));
        if let Some(trigger) = function.pointer("/httpsTrigger/url") {
            out.insert("httpsTriggerUrl", trigger.clone());
        }
        Ok(out)
    }
}

#[async_trait]
impl ResourceProvider for GcpProvider {
    async fn create(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        match request.kind() {
            ResourceKind::ContainerCluster => self.create_cluster(request).await,
            ResourceKind::ServiceAccount => self.create_service_account(request).await,
            ResourceKind::ProjectIamBinding
            | ResourceKind::ServiceAccountIamBinding
            | ResourceKind::FunctionIamMember => self.bind_member(request).await,
            ResourceKind::StorageBucket => self.create_bucket(request).await,
            ResourceKind::StorageObject => self.upload_object(request).await,
            ResourceKind::CloudFunction => self.create_function(request).await,
            other => Err(Error::validation(format!("{other} is not a cloud resource kind"))),
        }
    }

    async fn delete(&self, request: &ProviderRequest, outputs: &OutputAttributes) -> Result<()> {
        match request.kind() {
            ResourceKind::ContainerCluster => self.delete_cluster(request).await,
            ResourceKind::ServiceAccount => self.delete_service_account(request, outputs).await,
            ResourceKind::ProjectIamBinding
            | ResourceKind::ServiceAccountIamBinding
            | ResourceKind::FunctionIamMember => self.unbind_member(request).await,
            ResourceKind::StorageBucket => {
                self.delete_url(&format!("{STORAGE}/b/{}", request.str_field("bucket")?))
                    .await
            }
            ResourceKind::StorageObject => {
                self.delete_url(&format!(
                    "{STORAGE}/b/{}/o/{}",
                    request.str_field("bucket")?,
                    encode_path_segment(request.str_field("object")?)
                ))
                .await
            }
            ResourceKind::CloudFunction => self.delete_url(&self.function_url(request)?).await,
            other => Err(Error::validation(format!("{other} is not a cloud resource kind"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceId;

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "rate limited");
        assert!(err.is_retryable());
        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.is_retryable());

        let message = "Invalid value for field 'machineType'";
        let body = json!({"error": {"code": 400, "message": message}}).to_string();
        let err = status_error(StatusCode::BAD_REQUEST, &body);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Invalid value for field 'machineType'"));
    }

    #[test]
    fn binding_a_member_is_idempotent() {
        let policy = json!({"etag": "BwX1", "bindings": []});
        let role = "roles/secretmanager.secretAccessor";
        let once = policy_with_member(policy, role, "serviceAccount:a@b").unwrap();
        assert_eq!(once["bindings"][0]["members"], json!(["serviceAccount:a@b"]));
        assert_eq!(once["etag"], "BwX1");

        assert!(policy_with_member(once.clone(), role, "serviceAccount:a@b").is_none());

        let twice = policy_with_member(once, role, "user:c@d").unwrap();
        assert_eq!(
            twice["bindings"][0]["members"],
            json!(["serviceAccount:a@b", "user:c@d"])
        );
    }

    #[test]
    fn empty_policy_gets_a_bindings_list() {
        let policy =
            policy_with_member(json!({}), "roles/cloudfunctions.invoker", "allUsers").unwrap();
        assert_eq!(
            policy["bindings"],
            json!([{"role": "roles/cloudfunctions.invoker", "members": ["allUsers"]}])
        );
    }

    #[test]
    fn unbinding_drops_empty_bindings() {
        let member = "serviceAccount:p.svc.id.goog[apps/berglas]";
        let policy = json!({"bindings": [
            {"role": "roles/iam.workloadIdentityUser", "members": [member]},
            {"role": "roles/viewer", "members": ["user:x"]}
        ]});
        let role = "roles/iam.workloadIdentityUser";
        let updated = policy_without_member(policy.clone(), role, member).unwrap();
        assert_eq!(updated["bindings"], json!([{"role": "roles/viewer", "members": ["user:x"]}]));

        assert!(policy_without_member(policy, "roles/viewer", "user:nobody").is_none());
    }

    #[test]
    fn cluster_outputs_keep_password_secret() {
        let response = json!({
            "name": "demo",
            "endpoint": "34.1.2.3",
            "location": "us-west1-a",
            "status": "RUNNING",
            "masterAuth": {"clusterCaCertificate": "QUJD"}
        });
        let requested = json!({"masterAuth": {"username": "example-user", "password": "s3cret"}});
        let out = cluster_outputs(&response, &requested).unwrap();
        assert_eq!(out.get_str("endpoint"), Some("34.1.2.3"));
        assert_eq!(out.get_str("masterUsername"), Some("example-user"));
        assert!(out.is_secret("masterPassword"));

        let err = cluster_outputs(&json!({"name": "demo"}), &requested).unwrap_err();
        assert!(err.to_string().contains("/endpoint"));
    }

    #[test]
    fn function_names_use_request_region_or_default() {
        let provider =
            GcpProvider::new(GcpConfig::new("acme", "us-west1-a", "us-central1")).unwrap();
        let request = ProviderRequest::new(
            ResourceId::new(ResourceKind::CloudFunction, "berglas"),
            json!({"function": "berglas"}),
        );
        assert_eq!(
            provider.function_name(&request).unwrap(),
            "projects/acme/locations/us-central1/functions/berglas"
        );

        let request = ProviderRequest::new(
            ResourceId::new(ResourceKind::CloudFunction, "berglas"),
            json!({"function": "berglas", "region": "europe-west1", "project": "other"}),
        );
        assert_eq!(
            provider.function_url(&request).unwrap(),
            format!("{FUNCTIONS}/projects/other/locations/europe-west1/functions/berglas")
        );
    }

    #[test]
    fn object_names_are_escaped_in_paths() {
        assert_eq!(encode_path_segment("src/berglas.zip"), "src%2Fberglas.zip");
    }

    #[tokio::test]
    async fn configured_token_wins() {
        let mut config = GcpConfig::new("acme", "us-west1-a", "us-central1");
        config.access_token = Some("ya29.token".to_string());
        let provider = GcpProvider::new(config).unwrap();
        assert_eq!(provider.token().await.unwrap(), "ya29.token");
    }
}
