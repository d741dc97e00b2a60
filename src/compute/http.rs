//! REST client for the Compute Engine v1 API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::TokenSource;

use super::types::{Firewall, InstanceResource, Operation, Page, Router};
use super::{CallContext, ComputeApi, ComputeError, ComputeFuture};

/// Default REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// `operations.wait` blocks server-side for up to two minutes per call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(150);
const OPERATION_WAIT_LIMIT: u32 = 10;

/// Compute Engine client bound to one project.
#[derive(Clone)]
pub struct GceClient {
    http: reqwest::Client,
    project: String,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    operation_wait_limit: u32,
}

impl std::fmt::Debug for GceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GceClient")
            .field("project", &self.project)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

impl GceClient {
    /// Creates a client for `project` using `tokens` for authorisation.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Http`] when the HTTP client cannot be
    /// initialised, for example when no TLS backend is available.
    pub fn new(
        project: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| CallContext::new("client.build", DEFAULT_API_BASE).http(&err))?;
        Ok(Self {
            http,
            project: project.into(),
            base_url: DEFAULT_API_BASE.to_owned(),
            tokens,
            operation_wait_limit: OPERATION_WAIT_LIMIT,
        })
    }

    /// Points the client at a different endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Returns the project the client operates on.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.base_url, self.project)
    }

    fn instances_url(&self, zone: &str) -> String {
        format!("{}/zones/{zone}/instances", self.project_url())
    }

    fn instance_url(&self, zone: &str, name: &str) -> String {
        format!("{}/{name}", self.instances_url(zone))
    }

    fn operation_wait_url(&self, zone: &str, operation: &str) -> String {
        format!("{}/zones/{zone}/operations/{operation}/wait", self.project_url())
    }

    fn routers_url(&self, region: &str) -> String {
        format!("{}/regions/{region}/routers", self.project_url())
    }

    fn firewalls_url(&self) -> String {
        format!("{}/global/firewalls", self.project_url())
    }

    async fn send(
        &self,
        request: RequestBuilder,
        context: CallContext<'_>,
    ) -> Result<Response, ComputeError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|err| context.auth(err))?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| context.http(&err))
    }

    async fn expect_success(
        response: Response,
        context: CallContext<'_>,
    ) -> Result<Response, ComputeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(context.api(status.as_u16(), api_error_message(&body)))
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        context: CallContext<'_>,
    ) -> Result<T, ComputeError> {
        let body = response.text().await.map_err(|err| context.http(&err))?;
        serde_json::from_str(&body).map_err(|err| context.decode(&err))
    }

    async fn wait_operation(
        &self,
        zone: &str,
        mut operation: Operation,
        context: CallContext<'_>,
    ) -> Result<(), ComputeError> {
        let mut waits = 0;
        while !operation.is_done() {
            if waits >= self.operation_wait_limit {
                return Err(context.operation_timeout());
            }
            waits += 1;
            tracing::debug!(operation = %operation.name, "waiting for operation");
            let url = self.operation_wait_url(zone, &operation.name);
            let response = self.send(self.http.post(&url), context).await?;
            let response = Self::expect_success(response, context).await?;
            operation = Self::decode(response, context).await?;
        }
        match operation.failure() {
            Some(message) => Err(context.operation_failed(message)),
            None => Ok(()),
        }
    }

    async fn mutate(
        &self,
        zone: &str,
        request: RequestBuilder,
        context: CallContext<'_>,
    ) -> Result<(), ComputeError> {
        let response = self.send(request, context).await?;
        let response = Self::expect_success(response, context).await?;
        let operation: Operation = Self::decode(response, context).await?;
        self.wait_operation(zone, operation, context).await
    }

    async fn list_all<T: DeserializeOwned>(
        &self,
        url: &str,
        context: CallContext<'_>,
    ) -> Result<Vec<T>, ComputeError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let response = self.send(request, context).await?;
            let response = Self::expect_success(response, context).await?;
            let page: Page<T> = Self::decode(response, context).await?;
            items.extend(page.items);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(items),
            }
        }
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().to_owned())
}

impl ComputeApi for GceClient {
    fn insert_instance<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a InstanceResource,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let context = CallContext::new("instances.insert", &instance.name);
            let request = self.http.post(self.instances_url(zone)).json(instance);
            self.mutate(zone, request, context).await
        })
    }

    fn get_instance<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
    ) -> ComputeFuture<'a, Option<InstanceResource>> {
        Box::pin(async move {
            let context = CallContext::new("instances.get", name);
            let request = self.http.get(self.instance_url(zone, name));
            let response = self.send(request, context).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = Self::expect_success(response, context).await?;
            Self::decode(response, context).await.map(Some)
        })
    }

    fn list_instances<'a>(&'a self, zone: &'a str) -> ComputeFuture<'a, Vec<InstanceResource>> {
        Box::pin(async move {
            let context = CallContext::new("instances.list", zone);
            self.list_all(&self.instances_url(zone), context).await
        })
    }

    fn start_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let context = CallContext::new("instances.start", name);
            let url = format!("{}/start", self.instance_url(zone, name));
            self.mutate(zone, self.http.post(url), context).await
        })
    }

    fn stop_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let context = CallContext::new("instances.stop", name);
            let url = format!("{}/stop", self.instance_url(zone, name));
            self.mutate(zone, self.http.post(url), context).await
        })
    }

    fn delete_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let context = CallContext::new("instances.delete", name);
            let request = self.http.delete(self.instance_url(zone, name));
            self.mutate(zone, request, context).await
        })
    }

    fn list_routers<'a>(&'a self, region: &'a str) -> ComputeFuture<'a, Vec<Router>> {
        Box::pin(async move {
            let context = CallContext::new("routers.list", region);
            self.list_all(&self.routers_url(region), context).await
        })
    }

    fn list_firewalls(&self) -> ComputeFuture<'_, Vec<Firewall>> {
        Box::pin(async move {
            let context = CallContext::new("firewalls.list", &self.project);
            self.list_all(&self.firewalls_url(), context).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn client() -> GceClient {
        GceClient::new("acme", Arc::new(StaticToken::new("token")))
            .expect("http client builds")
            .with_base_url("http://localhost:9/compute/v1/")
    }

    #[test]
    fn new_builds_its_own_http_client() {
        let client = GceClient::new("acme", Arc::new(StaticToken::new("token")))
            .expect("http client builds");
        assert_eq!(client.project(), "acme");
        assert_eq!(client.base_url, DEFAULT_API_BASE);
        assert!(format!("{client:?}").contains("acme"));
    }

    #[test]
    fn urls_are_scoped_to_project() {
        let client = client();
        assert_eq!(
            client.instance_url("europe-west1-b", "box-1"),
            "http://localhost:9/compute/v1/projects/acme/zones/europe-west1-b/instances/box-1"
        );
        assert_eq!(
            client.routers_url("europe-west1"),
            "http://localhost:9/compute/v1/projects/acme/regions/europe-west1/routers"
        );
        assert_eq!(
            client.operation_wait_url("europe-west1-b", "op-7"),
            "http://localhost:9/compute/v1/projects/acme/zones/europe-west1-b/operations/op-7/wait"
        );
    }

    #[test]
    fn api_error_message_prefers_structured_body() {
        let body = r#"{"error":{"code":403,"message":"Required 'compute.instances.get' permission"}}"#;
        assert_eq!(
            api_error_message(body),
            "Required 'compute.instances.get' permission"
        );
        assert_eq!(api_error_message(" upstream timeout \n"), "upstream timeout");
    }

    #[tokio::test]
    async fn unreachable_endpoint_surfaces_http_error_with_context() {
        let err = client()
            .get_instance("europe-west1-b", "box-1")
            .await
            .expect_err("request should fail");
        assert!(matches!(err, ComputeError::Http { .. }));
        assert_eq!(err.operation(), "instances.get");
    }

    #[tokio::test]
    async fn blank_token_surfaces_auth_error() {
        let client =
            GceClient::new("acme", Arc::new(StaticToken::new(""))).expect("http client builds");
        let err = client
            .list_firewalls()
            .await
            .expect_err("token should be rejected");
        assert!(matches!(err, ComputeError::Auth { .. }));
    }
}
