// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP transport for repository content. */

use {
    crate::{
        config::ClientConfig,
        error::{AptError, Result},
        io::{DataResolver, FetchedContent},
    },
    async_trait::async_trait,
    futures::stream::TryStreamExt,
    log::debug,
    reqwest::{Client, StatusCode},
    url::Url,
};

/// A [DataResolver] fetching content over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpDataResolver {
    client: Client,
}

impl HttpDataResolver {
    /// Construct an instance using timeouts and headers from a [ClientConfig].
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DataResolver for HttpDataResolver {
    async fn fetch(&self, url: &Url) -> Result<FetchedContent> {
        debug!("GET {}", url);

        let res = self.client.get(url.clone()).send().await?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AptError::NotFound(url.to_string()));
        } else if !status.is_success() {
            return Err(AptError::HttpStatus(url.to_string(), status.as_u16()));
        }

        let content_length = res.content_length();

        Ok(FetchedContent {
            content_length,
            reader: Box::pin(
                res.bytes_stream()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
                    .into_async_read(),
            ),
        })
    }
}
