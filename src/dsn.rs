// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # DSN Tokenizer
//!
//! The untyped half of configuration parsing. A DSN of the form
//! `amqp(s)://[user[:password]@]host[:port][/vhost][/exchange]?key[sub]=value`
//! is split into its parts, and the query string is expanded into a nested,
//! insertion-ordered option tree (`a[b][c]=v`, `a[]=v`, bare keys map to an
//! empty string). Option trees are combined with [`merge`].

use crate::errors::AmqpError;
use serde_json::{Map, Value};
use url::Url;

/// Message of every DSN syntax error. The DSN itself is never echoed back.
const INVALID_DSN: &str = "The given AMQP DSN is invalid.";

/// Supported DSN schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Amqp,
    Amqps,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Amqp => 5672,
            Scheme::Amqps => 5671,
        }
    }
}

/// The parts of a DSN, percent-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDsn {
    pub scheme: Scheme,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub path_segments: Vec<String>,
    pub query: Map<String, Value>,
}

/// Splits a DSN into its parts.
pub fn parse_dsn(dsn: &str) -> Result<ParsedDsn, AmqpError> {
    let scheme = if dsn.starts_with("amqps://") {
        Scheme::Amqps
    } else if dsn.starts_with("amqp://") {
        Scheme::Amqp
    } else {
        return Err(AmqpError::ConfigurationError(format!(
            "{INVALID_DSN} Only the \"amqp://\" and \"amqps://\" schemes are supported."
        )));
    };

    let url = Url::parse(dsn).map_err(|_| AmqpError::ConfigurationError(INVALID_DSN.to_owned()))?;

    let host = url.host_str().filter(|host| !host.is_empty());
    let user = (!url.username().is_empty()).then(|| decode(url.username()));
    let password = url.password().map(decode);
    let path_segments = split_path(url.path());

    if host.is_none()
        && (user.is_some() || password.is_some() || url.port().is_some() || !path_segments.is_empty())
    {
        return Err(AmqpError::ConfigurationError(INVALID_DSN.to_owned()));
    }

    Ok(ParsedDsn {
        scheme,
        host: host.map(str::to_owned),
        port: url.port(),
        user,
        password,
        path_segments,
        query: parse_query(url.query().unwrap_or_default()),
    })
}

fn split_path(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return vec![];
    }

    trimmed.split('/').map(decode).collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Expands a query string into a nested option tree.
///
/// Bracketed keys build nested maps, `[]` appends under the next numeric
/// index, and repeated keys overwrite earlier values.
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut target = Map::new();

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let Some((base, segments)) = split_key(&decode(raw_key)) else {
            continue;
        };
        let value = Value::String(decode(raw_value));

        if segments.is_empty() {
            target.insert(base, value);
            continue;
        }

        let entry = target
            .entry(base)
            .or_insert_with(|| Value::Object(Map::new()));
        insert_nested(entry, &segments, value);
    }

    target
}

fn split_key(key: &str) -> Option<(String, Vec<String>)> {
    let (base, mut rest) = match key.find('[') {
        Some(idx) => (&key[..idx], &key[idx..]),
        None => (key, ""),
    };
    if base.is_empty() {
        return None;
    }

    let mut segments = vec![];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(end) = stripped.find(']') else {
            break;
        };
        segments.push(stripped[..end].to_owned());
        rest = &stripped[end + 1..];
    }

    Some((base.to_owned(), segments))
}

fn insert_nested(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, tail)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    let key = if head.is_empty() {
        next_index(map).to_string()
    } else {
        head.clone()
    };

    if tail.is_empty() {
        map.insert(key, value);
    } else {
        let child = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
        insert_nested(child, tail, value);
    }
}

fn next_index(map: &Map<String, Value>) -> u64 {
    map.keys()
        .filter_map(|key| key.parse::<u64>().ok())
        .max()
        .map_or(0, |max| max + 1)
}

/// Merges `overlay` into `base`: maps merge key by key, anything else is
/// replaced by the overlay value.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
