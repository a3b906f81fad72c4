//! Server-qualified names for tools, resources and prompts
//!
//! Items from different servers are exposed as `{server}{sep}{item}` so that
//! two servers offering a `search` tool do not collide. Parsing picks the
//! longest registered server name that prefixes the input; names without a
//! known prefix are bare and can be resolved by asking every server.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{McpError, McpResult};

pub const DEFAULT_SEPARATOR: &str = "_";

/// Server names that may not be registered, compared case-insensitively
pub const RESERVED_SERVER_NAMES: &[&str] = &["system", "internal", "mcp", "all", "default", "none"];

pub const MAX_SERVER_NAME_LEN: usize = 64;
pub const MAX_ITEM_NAME_LEN: usize = 256;

/// What to do when a bare name is provided by several servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    ErrorOnAmbiguity,
    /// Take the first provider in registry order
    FirstMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NamespaceOptions {
    pub separator: String,
    /// Ask every server when the prefixed lookup misses or the name is bare
    pub allow_fallback: bool,
    pub fallback_policy: FallbackPolicy,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            allow_fallback: true,
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

/// An item qualified by the server that provides it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceEntry {
    pub server_name: String,
    pub item_name: String,
    /// Canonical `{server}{sep}{item}` form
    pub namespaced: String,
}

impl NamespaceEntry {
    pub fn new(server_name: &str, item_name: &str, separator: &str) -> McpResult<Self> {
        Ok(Self {
            namespaced: create_namespaced_name(server_name, item_name, separator)?,
            server_name: server_name.to_string(),
            item_name: item_name.to_string(),
        })
    }
}

/// Result of splitting a possibly-qualified name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// `None` for bare names
    pub server_name: Option<String>,
    pub item_name: String,
}

/// Check a server name, returning the reason it is rejected
pub fn validate_server_name(name: &str, separator: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("server name must not be empty".into());
    }
    if name.chars().count() > MAX_SERVER_NAME_LEN {
        return Err(format!(
            "server name must be at most {} characters",
            MAX_SERVER_NAME_LEN
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("server name must start with a letter".into());
    }
    if !separator.is_empty() && name.contains(separator) {
        return Err(format!(
            "server name must not contain the separator '{}'",
            separator
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("server name may only contain letters, digits and hyphens".into());
    }
    if RESERVED_SERVER_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(format!("server name '{}' is reserved", name));
    }
    Ok(())
}

/// Check an item name, returning the reason it is rejected
pub fn validate_item_name(item: &str) -> Result<(), String> {
    if item.is_empty() {
        return Err("item name must not be empty".into());
    }
    if item.chars().count() > MAX_ITEM_NAME_LEN {
        return Err(format!(
            "item name must be at most {} characters",
            MAX_ITEM_NAME_LEN
        ));
    }
    if item.trim() != item {
        return Err("item name must not have leading or trailing whitespace".into());
    }
    Ok(())
}

pub fn create_namespaced_name(server: &str, item: &str, separator: &str) -> McpResult<String> {
    let errors: Vec<String> = [validate_server_name(server, separator), validate_item_name(item)]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    if !errors.is_empty() {
        return Err(McpError::validation(
            format!("cannot namespace '{}' under '{}'", item, server),
            errors,
        ));
    }
    Ok(format!("{}{}{}", server, separator, item))
}

/// Split `name` on the longest known server prefix followed by `separator`
pub fn parse_namespaced_name<S: AsRef<str>>(
    name: &str,
    known_servers: &[S],
    separator: &str,
) -> ParsedName {
    let matched = known_servers
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|server| {
            name.strip_prefix(server)
                .and_then(|rest| rest.strip_prefix(separator))
                .filter(|item| !item.is_empty())
                .map(|item| (server, item))
        })
        .max_by_key(|(server, _)| server.len());

    match matched {
        Some((server, item)) => ParsedName {
            server_name: Some(server.to_string()),
            item_name: item.to_string(),
        },
        None => ParsedName {
            server_name: None,
            item_name: name.to_string(),
        },
    }
}

/// A name resolved to the server that provides it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub server_name: String,
    /// Name to send to that server
    pub item_name: String,
}

/// Find the server providing `name`.
///
/// `lookup(server, item)` reports whether `server` offers `item`. The parsed
/// prefix is tried first; otherwise, if fallback is allowed, `servers` are
/// asked in order for the full name.
pub async fn resolve_server_for_resource<F, Fut>(
    name: &str,
    servers: &[String],
    lookup: F,
    options: &NamespaceOptions,
) -> McpResult<Option<ResolvedName>>
where
    F: Fn(String, String) -> Fut,
    Fut: Future<Output = bool>,
{
    let parsed = parse_namespaced_name(name, servers, &options.separator);
    if let Some(server) = &parsed.server_name {
        if lookup(server.clone(), parsed.item_name.clone()).await {
            return Ok(Some(ResolvedName {
                server_name: server.clone(),
                item_name: parsed.item_name,
            }));
        }
    }
    if !options.allow_fallback {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for server in servers {
        if lookup(server.clone(), name.to_string()).await {
            if options.fallback_policy == FallbackPolicy::FirstMatch {
                return Ok(Some(ResolvedName {
                    server_name: server.clone(),
                    item_name: name.to_string(),
                }));
            }
            candidates.push(server.clone());
        }
    }

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop().map(|server_name| ResolvedName {
            server_name,
            item_name: name.to_string(),
        })),
        _ => Err(McpError::ambiguous(name, candidates)),
    }
}
