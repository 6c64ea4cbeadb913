//! Remote collection API client
//!
//! The synchronizer only talks to the remote through [`RemoteService`].
//! [`HttpRemote`] is the production implementation: one JSON collection
//! per resource, addressed as
//!
//! - `POST   {base}/{resource}`       create
//! - `PUT    {base}/{resource}/{id}`  update
//! - `DELETE {base}/{resource}/{id}`  delete
//! - `GET    {base}/{resource}`       list

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::data::{Entity, EntityRef, Resource};
use crate::error::{AppError, Result};

/// Remote operations the synchronizer dispatches to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create an entity; the remote keeps the client-supplied id
    async fn create(&self, entity: &Entity) -> Result<()>;

    async fn update(&self, entity: &Entity) -> Result<()>;

    async fn delete(&self, target: &EntityRef) -> Result<()>;

    /// Every entity of a resource as raw JSON objects
    async fn list(&self, resource: Resource) -> Result<Vec<Value>>;
}

/// reqwest-backed [`RemoteService`]
pub struct HttpRemote {
    http_client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Create a client for the API rooted at `base_url`
    ///
    /// # Errors
    /// Config error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration, auth_token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid remote base url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "remote base url {} cannot be a base",
                base_url
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("teasync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        resource: Resource,
        operation: &str,
    ) -> Result<reqwest::Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            AppError::Network(format!("{} {} failed: {}", operation, resource, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "{} {} failed: HTTP {}",
                operation,
                resource,
                response.status()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn create(&self, entity: &Entity) -> Result<()> {
        let resource = entity.resource();
        let request = self
            .http_client
            .post(self.endpoint(&[resource.as_str()]))
            .json(&entity.to_value()?);

        self.send(request, resource, "create").await?;
        tracing::debug!(%resource, id = %entity.id(), "Remote create accepted");
        Ok(())
    }

    async fn update(&self, entity: &Entity) -> Result<()> {
        let resource = entity.resource();
        let request = self
            .http_client
            .put(self.endpoint(&[resource.as_str(), entity.id()]))
            .json(&entity.to_value()?);

        self.send(request, resource, "update").await?;
        tracing::debug!(%resource, id = %entity.id(), "Remote update accepted");
        Ok(())
    }

    async fn delete(&self, target: &EntityRef) -> Result<()> {
        let request = self
            .http_client
            .delete(self.endpoint(&[target.resource.as_str(), &target.id]));

        self.send(request, target.resource, "delete").await?;
        tracing::debug!(resource = %target.resource, id = %target.id, "Remote delete accepted");
        Ok(())
    }

    async fn list(&self, resource: Resource) -> Result<Vec<Value>> {
        let request = self.http_client.get(self.endpoint(&[resource.as_str()]));
        let response = self.send(request, resource, "list").await?;

        response.json::<Vec<Value>>().await.map_err(|e| {
            AppError::Network(format!("list {} returned an invalid body: {}", resource, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, Duration::from_secs(5), None).unwrap()
    }

    #[test]
    fn endpoint_joins_segments_under_base_path() {
        let nested = remote("https://api.example.com/v1/");
        assert_eq!(
            nested.endpoint(&["teas", "tea_1"]).as_str(),
            "https://api.example.com/v1/teas/tea_1"
        );

        let root = remote("https://api.example.com");
        assert_eq!(
            root.endpoint(&["growthRecords"]).as_str(),
            "https://api.example.com/growthRecords"
        );
    }

    #[test]
    fn endpoint_escapes_ids() {
        let client = remote("https://api.example.com/v1");
        assert_eq!(
            client.endpoint(&["teas", "a/b c"]).as_str(),
            "https://api.example.com/v1/teas/a%2Fb%20c"
        );
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(matches!(
            HttpRemote::new("not a url", Duration::from_secs(5), None),
            Err(AppError::Config(_))
        ));
        assert!(HttpRemote::new("mailto:ops@example.com", Duration::from_secs(5), None).is_err());
    }
}
