//! Connection string parsing
//!
//! Supports formats:
//! * mysqlx://[user[:password]@]host[:port][/schema][?options]
//! * mysqlx://user@[host1:port1,(address=host2:port2,priority=N),/path/to/socket]/schema
//! * mysqlx://user@(/path/to/socket)/schema, or percent-encoded (%2Fpath%2Fto%2Fsocket)
//! * mysqlx://user@[::1]:33060/schema (IPv6)
//! * mysql://host[:port] (classic protocol, recognised but not connectable)
//!
//! Options: `ssl-mode`, `ssl-ca`, `connect-timeout` (milliseconds, 0 for
//! none), `auth`.

use crate::connection::{AuthMethod, ConnectionOptions, SslMode, TlsOptions};
use crate::failover::{Endpoint, MultiSource, MAX_PRIORITY};
use crate::protocol::constants::DEFAULT_PORT;
use crate::{Error, Result};
use std::borrow::Cow;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Default port of the classic protocol
const LEGACY_DEFAULT_PORT: u16 = 3306;

/// Parsed connection string
#[derive(Debug, Clone)]
pub enum DataSource {
    /// One host, connected without failover
    Single(Endpoint),
    /// Bracketed host list, tried in order
    Multi(MultiSource),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    X,
    Legacy,
}

/// Where one host entry points to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Tcp { host: String, port: Option<u16> },
    Socket(PathBuf),
}

#[derive(Debug, Default)]
struct QueryOptions {
    ssl_mode: Option<SslMode>,
    ssl_ca: Option<String>,
    connect_timeout: Option<Duration>,
    auth: AuthMethod,
}

impl DataSource {
    /// Parse a connection string
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = s.strip_prefix("mysqlx://") {
            (Scheme::X, rest)
        } else if let Some(rest) = s.strip_prefix("mysql://") {
            (Scheme::Legacy, rest)
        } else {
            return Err(Error::Config(
                "connection string must start with mysqlx:// or mysql://".into(),
            ));
        };

        let (main, query) = match rest.split_once('?') {
            Some((main, query)) => (main, query),
            None => (rest, ""),
        };
        let query = parse_query(query)?;

        // Userinfo ends at the last '@'
        let (user, password, hosts) = match main.rfind('@') {
            Some(pos) => {
                let (user, password) = match main[..pos].split_once(':') {
                    Some((user, password)) => (user, Some(percent_decode(password)?)),
                    None => (&main[..pos], None),
                };
                (Some(percent_decode(user)?), password, &main[pos + 1..])
            }
            None => (None, None, main),
        };

        let (entries, schema, multi) = parse_hosts(hosts)?;
        let schema = schema.filter(|s| !s.is_empty());

        let options = ConnectionOptions {
            database: schema,
            user: Some(user.unwrap_or_else(whoami::username)),
            password,
            auth: query.auth,
            connect_timeout: query.connect_timeout,
        };

        let has_priority = entries.first().is_some_and(|(_, p)| p.is_some());
        if entries.iter().any(|(_, p)| p.is_some() != has_priority) {
            return Err(Error::Config(
                "either all or none of the hosts must have a priority".into(),
            ));
        }

        let mut endpoints = Vec::with_capacity(entries.len());
        for (target, priority) in entries {
            endpoints.push((make_endpoint(scheme, target, &options, &query)?, priority));
        }

        if !multi {
            if let Some((endpoint, _)) = endpoints.pop() {
                return Ok(DataSource::Single(endpoint));
            }
        }

        let mut source = MultiSource::new();
        for (endpoint, priority) in endpoints {
            match priority {
                Some(p) => source.add_prioritized(endpoint, p)?,
                None => source.add(endpoint)?,
            }
        }
        Ok(DataSource::Multi(source))
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        match self {
            DataSource::Single(_) => 1,
            DataSource::Multi(source) => source.len(),
        }
    }

    /// Whether there is no endpoint at all (an empty host list)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn make_endpoint(
    scheme: Scheme,
    target: Target,
    options: &ConnectionOptions,
    query: &QueryOptions,
) -> Result<Endpoint> {
    match (scheme, target) {
        (Scheme::X, Target::Tcp { host, port }) => {
            let ssl_mode = query.ssl_mode.unwrap_or(if query.ssl_ca.is_some() {
                SslMode::VerifyCa
            } else {
                SslMode::Required
            });
            let tls = TlsOptions {
                ssl_mode,
                ssl_ca: query.ssl_ca.clone(),
            };
            Ok(Endpoint::tcp(host, port.unwrap_or(DEFAULT_PORT), options.clone()).with_tls(tls))
        }
        (Scheme::X, Target::Socket(path)) => Ok(Endpoint::local(path, options.clone())),
        (Scheme::Legacy, Target::Tcp { host, port }) => {
            Ok(Endpoint::legacy(host, port.unwrap_or(LEGACY_DEFAULT_PORT)))
        }
        (Scheme::Legacy, Target::Socket(_)) => Err(Error::Config(
            "mysql:// connection strings cannot name a socket".into(),
        )),
    }
}

/// Split the host part into entries and the trailing schema.
///
/// Returns `(entries, schema, is_list)`.
fn parse_hosts(s: &str) -> Result<(Vec<(Target, Option<u8>)>, Option<String>, bool)> {
    if s.starts_with('[') {
        let close = matching_close(s, 0, '[', ']')?;
        let inner = &s[1..close];
        let after = &s[close + 1..];

        // A bracketed IPv6 literal rather than a host list
        if inner.parse::<Ipv6Addr>().is_ok() {
            let (port, schema) = parse_port_and_schema(after)?;
            let target = Target::Tcp {
                host: inner.to_string(),
                port,
            };
            return Ok((vec![(target, None)], schema, false));
        }

        let schema = parse_schema(after)?;
        let mut entries = Vec::new();
        for item in split_top_level(inner)? {
            entries.push(parse_entry(item.trim())?);
        }
        return Ok((entries, schema, true));
    }

    if s.starts_with('(') {
        let close = matching_close(s, 0, '(', ')')?;
        let entry = parse_entry(&s[..=close])?;
        let schema = parse_schema(&s[close + 1..])?;
        return Ok((vec![entry], schema, false));
    }

    if is_path(s) {
        // An unwrapped path takes the rest of the string
        let target = Target::Socket(PathBuf::from(percent_decode(s)?));
        return Ok((vec![(target, None)], None, false));
    }

    let (authority, schema) = match s.split_once('/') {
        Some((authority, schema)) => (authority, Some(percent_decode(schema)?)),
        None => (s, None),
    };
    Ok((vec![(parse_target(authority)?, None)], schema, false))
}

/// One list entry: `host[:port]`, a socket path, `(path)` or
/// `(address=..., priority=N)`
fn parse_entry(item: &str) -> Result<(Target, Option<u8>)> {
    let Some(inner) = item.strip_prefix('(').and_then(|i| i.strip_suffix(')')) else {
        return Ok((parse_target(item)?, None));
    };

    if !inner.trim_start().to_ascii_lowercase().starts_with("address=") {
        return Ok((Target::Socket(PathBuf::from(percent_decode(inner)?)), None));
    }

    let mut address = None;
    let mut priority = None;
    for pair in split_top_level(inner)? {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("invalid host option '{}'", pair)))?;
        match key.trim().to_ascii_lowercase().as_str() {
            "address" => address = Some(parse_target(value.trim())?),
            "priority" => priority = Some(parse_priority(value.trim())?),
            other => {
                return Err(Error::Config(format!("unknown host option '{}'", other)));
            }
        }
    }

    let address =
        address.ok_or_else(|| Error::Config(format!("missing address in '{}'", item)))?;
    Ok((address, priority))
}

fn parse_priority(value: &str) -> Result<u8> {
    match value.parse::<u8>() {
        Ok(p) if p <= MAX_PRIORITY => Ok(p),
        _ => Err(Error::Config(format!(
            "priority must be between 0 and {}, got '{}'",
            MAX_PRIORITY, value
        ))),
    }
}

/// `host[:port]`, `[v6]:port`, or a (possibly percent-encoded) socket path
fn parse_target(s: &str) -> Result<Target> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("unterminated IPv6 address in '{}'", s)))?;
        let port = match after {
            "" => None,
            _ => Some(parse_port(after.strip_prefix(':').unwrap_or(after))?),
        };
        return Ok(Target::Tcp {
            host: host.to_string(),
            port,
        });
    }

    let decoded = percent_decode(s)?;
    if is_path(&decoded) {
        return Ok(Target::Socket(PathBuf::from(decoded)));
    }

    let (host, port) = match decoded.split_once(':') {
        Some((host, port)) => (host.to_string(), Some(parse_port(port)?)),
        None => (decoded, None),
    };
    let host = if host.is_empty() {
        "localhost".to_string()
    } else {
        host
    };
    Ok(Target::Tcp { host, port })
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::Config(format!("invalid port '{}'", s)))
}

/// `[:port][/schema]` after a bracketed IPv6 literal
fn parse_port_and_schema(s: &str) -> Result<(Option<u16>, Option<String>)> {
    let (port_part, schema) = match s.find('/') {
        Some(pos) => (&s[..pos], parse_schema(&s[pos..])?),
        None => (s, None),
    };
    let port = match port_part.strip_prefix(':') {
        Some(port) => Some(parse_port(port)?),
        None if port_part.is_empty() => None,
        None => {
            return Err(Error::Config(format!(
                "unexpected '{}' after host",
                port_part
            )))
        }
    };
    Ok((port, schema))
}

fn parse_schema(s: &str) -> Result<Option<String>> {
    match s {
        "" => Ok(None),
        _ => match s.strip_prefix('/') {
            Some(schema) => Ok(Some(percent_decode(schema)?)),
            None => Err(Error::Config(format!("unexpected '{}' after host list", s))),
        },
    }
}

fn parse_query(query: &str) -> Result<QueryOptions> {
    let mut options = QueryOptions::default();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("option '{}' has no value", pair)))?;
        let value = percent_decode(value)?;

        match key.to_ascii_lowercase().replace('_', "-").as_str() {
            "ssl-mode" => options.ssl_mode = Some(value.parse()?),
            "ssl-ca" => {
                let path = value
                    .strip_prefix('(')
                    .and_then(|v| v.strip_suffix(')'))
                    .unwrap_or(&value);
                options.ssl_ca = Some(path.to_string());
            }
            "connect-timeout" => {
                let ms: u64 = value.parse().map_err(|_| {
                    Error::Config(format!("invalid connect-timeout '{}'", value))
                })?;
                options.connect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
            "auth" => options.auth = value.parse()?,
            other => {
                return Err(Error::Config(format!("unknown option '{}'", other)));
            }
        }
    }

    Ok(options)
}

fn is_path(s: &str) -> bool {
    s.starts_with('/') || s.starts_with("./") || s.starts_with("../")
}

/// Index of the bracket closing the one at `open`
fn matching_close(s: &str, open: usize, open_ch: char, close_ch: char) -> Result<usize> {
    let mut depth = 0usize;
    for (i, c) in s[open..].char_indices() {
        if c == open_ch {
            depth += 1;
        } else if c == close_ch {
            depth -= 1;
            if depth == 0 {
                return Ok(open + i);
            }
        }
    }
    Err(Error::Config(format!("unbalanced '{}' in '{}'", open_ch, s)))
}

/// Split on commas that are not nested in brackets or parentheses
fn split_top_level(s: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::Config(format!("unbalanced '{}' in '{}'", c, s)));
                }
            }
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::Config(format!("unbalanced brackets in '{}'", s)));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn percent_decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(Cow::into_owned)
        .map_err(|_| Error::Config(format!("percent-encoding in '{}' is not UTF-8", s)))
}
