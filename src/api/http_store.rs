use super::{BlobKind, ModelStore, StoreKey};
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

/// Client for the persistence backend served by the `web` binary
pub struct HttpStore {
    base_url: String,
    client: Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url_for(&self, key: StoreKey) -> String {
        let resource = match key.kind {
            BlobKind::TrainingData => "training-data",
            BlobKind::Model => "model",
        };
        format!("{}/api/{}/{}", self.base_url, key.sport, resource)
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ModelStore for HttpStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        let url = self.url_for(key);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(response.status(), &url)?;
        Ok(Some(response.json().await?))
    }

    async fn put(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        let url = self.url_for(key);
        let response = self.client.post(&url).json(&value).send().await?;
        check_status(response.status(), &url)
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        let url = self.url_for(key);
        let response = self.client.delete(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response.status(), &url)
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;

    #[test]
    fn test_urls_match_backend_routes() {
        let store = HttpStore::new("http://localhost:3000/");
        assert_eq!(
            store.url_for(StoreKey::new(Sport::Nfl, BlobKind::TrainingData)),
            "http://localhost:3000/api/nfl/training-data"
        );
        assert_eq!(
            store.url_for(StoreKey::new(Sport::Tennis, BlobKind::Model)),
            "http://localhost:3000/api/tennis/model"
        );
    }
}
