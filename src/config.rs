//! Process-wide flat key/value configuration.
//!
//! [`PageConfig`] is initialized exactly once, either explicitly through
//! [`PageConfig::init`] / [`PageConfig::init_from_json`], or lazily on first
//! read by parsing the process command line:
//!
//! - `--key=value` and `--key value` set `key`
//! - `--flag` sets `flag` to `"true"`, `--no-flag` sets it to `"false"`
//! - positional arguments are ignored
//!
//! Reads of unknown keys return an empty string, never an error.

use std::collections::HashMap;
use std::sync::OnceLock;

use dashmap::DashMap;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

static CONFIG_DATA: OnceLock<DashMap<String, String>> = OnceLock::new();

/// Source of named string options.
pub trait ConfigProvider: Send + Sync {
    /// The option's value, or `""` when it is not set.
    fn get_option(&self, name: &str) -> String;
}

impl ConfigProvider for HashMap<String, String> {
    fn get_option(&self, name: &str) -> String {
        self.get(name).cloned().unwrap_or_default()
    }
}

/// Handle to the process-wide configuration store.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct PageConfig;

impl PageConfig {
    /// Seed the store with explicit options.
    ///
    /// Returns `false`, leaving the store untouched, if it was already
    /// initialized by an earlier call or by a read.
    pub fn init<I, K, V>(options: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = options
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        CONFIG_DATA.set(data).is_ok()
    }

    /// Seed the store from a JSON object. Non-string values are stored as
    /// their JSON text, so `true` becomes `"true"` and `8888` becomes `"8888"`.
    pub fn init_from_json(json: &str) -> Result<bool> {
        Ok(Self::init(parse_json(json)?))
    }

    /// The option's value, or `""` when it is not set.
    #[must_use]
    pub fn get(name: &str) -> String {
        data()
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Override an option, returning its previous value (`""` if unset).
    pub fn set<K: Into<String>, V: Into<String>>(name: K, value: V) -> String {
        data()
            .insert(name.into(), value.into())
            .unwrap_or_default()
    }
}

impl ConfigProvider for PageConfig {
    fn get_option(&self, name: &str) -> String {
        Self::get(name)
    }
}

fn data() -> &'static DashMap<String, String> {
    CONFIG_DATA.get_or_init(|| parse_args(std::env::args().skip(1)))
}

fn parse_json(json: &str) -> Result<Vec<(String, String)>> {
    let Value::Object(object) = serde_json::from_str::<Value>(json)? else {
        return Err(Error::validation("configuration data must be a JSON object"));
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> DashMap<String, String> {
    let data = DashMap::new();
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        let Some(option) = arg.strip_prefix("--") else {
            continue;
        };
        if option.is_empty() {
            // `--` ends option parsing
            break;
        }

        if let Some((key, value)) = option.split_once('=') {
            data.insert(key.to_owned(), value.to_owned());
        } else if let Some(key) = option.strip_prefix("no-") {
            data.insert(key.to_owned(), "false".to_owned());
        } else if let Some(value) = args.next_if(|next| !next.starts_with("--")) {
            data.insert(option.to_owned(), value);
        } else {
            data.insert(option.to_owned(), "true".to_owned());
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> DashMap<String, String> {
        parse_args(raw.iter().map(|s| (*s).to_owned()))
    }

    fn value(data: &DashMap<String, String>, key: &str) -> Option<String> {
        data.get(key).map(|entry| entry.value().clone())
    }

    #[test]
    fn parses_equals_and_separate_values() {
        let data = args(&["--token=secret", "--baseUrl", "/lab/", "positional"]);

        assert_eq!(value(&data, "token").as_deref(), Some("secret"));
        assert_eq!(value(&data, "baseUrl").as_deref(), Some("/lab/"));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn parses_flags() {
        let data = args(&["--verbose", "--no-browser", "--port=8888"]);

        assert_eq!(value(&data, "verbose").as_deref(), Some("true"));
        assert_eq!(value(&data, "browser").as_deref(), Some("false"));
        assert_eq!(value(&data, "port").as_deref(), Some("8888"));
    }

    #[test]
    fn double_dash_stops_parsing() {
        let data = args(&["--a=1", "--", "--b=2"]);

        assert_eq!(value(&data, "a").as_deref(), Some("1"));
        assert!(value(&data, "b").is_none(), "options after -- are ignored");
    }

    #[test]
    fn json_values_are_stringified() {
        let parsed: HashMap<String, String> =
            parse_json(r#"{"token": "abc", "port": 8888, "debug": true}"#)
                .expect("valid object")
                .into_iter()
                .collect();

        assert_eq!(parsed.get_option("token"), "abc");
        assert_eq!(parsed.get_option("port"), "8888");
        assert_eq!(parsed.get_option("debug"), "true");
        assert_eq!(parsed.get_option("missing"), "");
    }

    #[test]
    fn json_must_be_an_object() {
        let error = parse_json("[1, 2]").expect_err("arrays are rejected");

        assert_eq!(error.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn global_store_set_then_get() {
        let key = "config-tests-global-store-key";

        assert_eq!(PageConfig::get(key), "");
        assert_eq!(PageConfig::set(key, "first"), "");
        assert_eq!(PageConfig::set(key, "second"), "first");
        assert_eq!(PageConfig.get_option(key), "second");
    }
}
