// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based repositories. */

use {
    crate::{
        error::{AptError, Result},
        io::{DataResolver, FetchedContent},
    },
    async_trait::async_trait,
    futures::io::{AllowStdIo, BufReader},
    log::debug,
    url::Url,
};

/// A [DataResolver] serving `file://` URLs from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilesystemDataResolver;

#[async_trait]
impl DataResolver for FilesystemDataResolver {
    async fn fetch(&self, url: &Url) -> Result<FetchedContent> {
        let path = url
            .to_file_path()
            .map_err(|_| AptError::UnsupportedUrlScheme(url.to_string()))?;

        debug!("opening {}", path.display());

        let f = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AptError::NotFound(url.to_string())
            } else {
                AptError::RepositoryIoPath(format!("{}", path.display()), e)
            }
        })?;

        let content_length = f
            .metadata()
            .map_err(|e| AptError::RepositoryIoPath(format!("{}", path.display()), e))?
            .len();

        Ok(FetchedContent {
            content_length: Some(content_length),
            reader: Box::pin(BufReader::new(AllowStdIo::new(f))),
        })
    }
}
