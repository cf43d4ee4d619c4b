//! Proxy endpoint value objects and proxy-string parsing.
//!
//! Accepted line shapes:
//! - `scheme://[user:pass@]host:port`
//! - `host:port:user:pass`
//! - `host:port`
//!
//! Any of them may end in `|mobile`, `|residential` or `|datacenter` to tag the
//! endpoint type. Blank lines, `#` comments and unparseable lines are skipped.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    #[default]
    Datacenter,
    Residential,
    Mobile,
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "datacenter" | "dc" => Ok(ProxyType::Datacenter),
            "residential" | "resi" => Ok(ProxyType::Residential),
            "mobile" | "4g" | "5g" => Ok(ProxyType::Mobile),
            other => Err(format!("unknown proxy type '{other}'")),
        }
    }
}

/// Identity used for deduplication, cooldown and sticky bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyIdentity {
    server: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// `scheme://host:port`, credentials stripped
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "type", default)]
    pub proxy_type: ProxyType,
}

impl ProxyEndpoint {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            username: None,
            password: None,
            proxy_type: ProxyType::Datacenter,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_type(mut self, proxy_type: ProxyType) -> Self {
        self.proxy_type = proxy_type;
        self
    }

    pub fn identity(&self) -> ProxyIdentity {
        ProxyIdentity {
            server: self.server.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// `host:port` for TCP probing
    pub fn host_port(&self) -> Option<String> {
        let without_scheme = self
            .server
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.server);
        let trimmed = without_scheme.trim_end_matches('/');
        trimmed.rsplit_once(':').map(|_| trimmed.to_string())
    }
}

impl fmt::Display for ProxyEndpoint {
    /// Never prints the password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{} (user {user})", self.server),
            None => write!(f, "{}", self.server),
        }
    }
}

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks4", "socks5", "socks5h"];

/// Parse one proxy line; `None` for blanks, comments and garbage
pub fn parse_proxy_line(line: &str) -> Option<ProxyEndpoint> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (body, proxy_type) = match line.rsplit_once('|') {
        Some((body, hint)) => (body.trim(), hint.parse::<ProxyType>().ok()?),
        None => (line, ProxyType::Datacenter),
    };

    let endpoint = if body.contains("://") {
        parse_url_form(body)?
    } else {
        parse_colon_form(body)?
    };

    Some(endpoint.with_type(proxy_type))
}

fn parse_url_form(body: &str) -> Option<ProxyEndpoint> {
    let url = Url::parse(body).ok()?;
    let scheme = url.scheme();
    if !SUPPORTED_SCHEMES.contains(&scheme) {
        return None;
    }
    let host = url.host_str().filter(|host| !host.is_empty())?;
    let port = url.port_or_known_default()?;

    let mut endpoint = ProxyEndpoint::new(format!("{scheme}://{host}:{port}"));
    if !url.username().is_empty() {
        endpoint.username = Some(url.username().to_string());
        endpoint.password = url.password().map(str::to_string);
    }
    Some(endpoint)
}

fn parse_colon_form(body: &str) -> Option<ProxyEndpoint> {
    let parts: Vec<&str> = body.split(':').map(str::trim).collect();
    let (host, port, credentials) = match parts.as_slice() {
        [host, port] => (*host, *port, None),
        [host, port, user, pass] => (*host, *port, Some((*user, *pass))),
        _ => return None,
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    let port: u16 = port.parse().ok().filter(|port| *port != 0)?;

    let endpoint = ProxyEndpoint::new(format!("http://{host}:{port}"));
    Some(match credentials {
        Some((user, pass)) if !user.is_empty() => endpoint.with_credentials(user, pass),
        _ => endpoint,
    })
}

/// Parse many lines, keeping the first occurrence of each identity
pub fn parse_proxy_list<'a, I>(lines: I) -> Vec<ProxyEndpoint>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter_map(parse_proxy_line)
        .filter(|endpoint| seen.insert(endpoint.identity()))
        .collect()
}
