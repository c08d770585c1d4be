use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, trace};
use reqwest::StatusCode;

use crate::remote::RemoteStore;

/// Fetches metadata from a notary-style server:
/// `GET {server}/v2/{gun}/_trust/tuf/{name}.json`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    gun: String,
}

impl HttpRemote {
    pub fn new(server_url: &str, gun: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_owned(),
            gun: gun.to_owned(),
        })
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/v2/{}/_trust/tuf/{}.json", self.base_url, self.gun, name)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch(&self, name: &str, max_size: u64) -> Result<Option<Vec<u8>>> {
        let url = self.url_for(name);
        trace!("GET {url}");

        let mut response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{url} not found");
            return Ok(None);
        }
        response = response.error_for_status()?;

        if let Some(length) = response.content_length() {
            if length > max_size {
                bail!("{name} is {length} bytes, limit is {max_size}");
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > max_size {
                bail!("{name} exceeds the {max_size} byte limit");
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Some(body))
    }
}
