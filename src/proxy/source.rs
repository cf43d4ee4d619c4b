//! Where the proxy pool comes from, and how to tell that it changed.

use crate::config::ProxyConfig;
use crate::proxy::endpoint::{parse_proxy_list, ProxyEndpoint};
use crate::proxy::ProxyError;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySource {
    /// A list file, one entry per line
    File(PathBuf),
    /// A single proxy URL
    Url(String),
    /// Inline entries
    List(Vec<String>),
    None,
}

impl ProxySource {
    /// File wins over URL, URL over the inline list
    pub fn from_config(config: &ProxyConfig) -> Self {
        if let Some(path) = config.proxy_file.as_deref().filter(|p| !p.trim().is_empty()) {
            ProxySource::File(PathBuf::from(path))
        } else if let Some(url) = config.proxy_url.as_deref().filter(|u| !u.trim().is_empty()) {
            ProxySource::Url(url.trim().to_string())
        } else if !config.proxies.is_empty() {
            ProxySource::List(config.proxies.clone())
        } else {
            ProxySource::None
        }
    }

    /// Content signature: mtime and size for files, a digest for inline values.
    ///
    /// A missing file has the signature `missing` so that it reloads (to an
    /// empty pool) once and then stays cached until the file appears.
    pub async fn signature(&self) -> Result<String, ProxyError> {
        match self {
            ProxySource::File(path) => match tokio::fs::metadata(path).await {
                Ok(metadata) => {
                    let modified = metadata
                        .modified()
                        .ok()
                        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                        .map(|since| since.as_nanos())
                        .unwrap_or_default();
                    Ok(format!("file:{modified}:{}", metadata.len()))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("missing".to_string()),
                Err(e) => Err(ProxyError::SourceUnavailable {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                }),
            },
            ProxySource::Url(url) => Ok(format!("url:{}", digest([url.as_str()]))),
            ProxySource::List(entries) => Ok(format!(
                "list:{}",
                digest(entries.iter().map(String::as_str))
            )),
            ProxySource::None => Ok("none".to_string()),
        }
    }

    /// Read and parse the pool. A missing file yields an empty pool.
    pub async fn read_endpoints(&self) -> Result<Vec<ProxyEndpoint>, ProxyError> {
        match self {
            ProxySource::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(contents) => Ok(parse_proxy_list(contents.lines())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(ProxyError::SourceUnavailable {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                }),
            },
            ProxySource::Url(url) => Ok(parse_proxy_list([url.as_str()])),
            ProxySource::List(entries) => Ok(parse_proxy_list(entries.iter().map(String::as_str))),
            ProxySource::None => Ok(Vec::new()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProxySource::File(path) => format!("file {}", path.display()),
            ProxySource::Url(_) => "single url".to_string(),
            ProxySource::List(entries) => format!("inline list ({} entries)", entries.len()),
            ProxySource::None => "none".to_string(),
        }
    }
}

fn digest<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
