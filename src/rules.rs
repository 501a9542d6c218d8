use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

/// Key of the host-independent list in the JSON rule table.
pub const GLOBAL_KEY: &str = "global";

/// Parameter names to strip, split into a global list and host patterns.
///
/// Host patterns are kept in insertion order; resolution concatenates the
/// lists of every matching pattern in that order after the global list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    global: Vec<String>,
    by_host: Vec<(String, Vec<String>)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a rule set, normalizing host keys and dropping empty names.
    pub fn from_table<G, H, N>(global: G, hosts: H) -> Self
    where
        G: IntoIterator<Item = N>,
        H: IntoIterator<Item = (N, Vec<N>)>,
        N: Into<String>,
    {
        let mut rules = Self {
            global: clean_names(GLOBAL_KEY, global.into_iter().map(Into::into)),
            by_host: Vec::new(),
        };
        for (host, names) in hosts {
            rules.insert_host(host.into(), names.into_iter().map(Into::into));
        }
        rules
    }

    /// The built-in table.
    pub fn default_rules() -> Self {
        Self::from_table(
            [
                "utm_source",
                "utm_medium",
                "utm_term",
                "utm_content",
                "utm_campaign",
                "yclid",
                "fb_action_ids",
                "fb_action_types",
                "fb_ref",
                "fb_source",
                "action_object_map",
                "action_type_map",
                "action_ref_map",
            ],
            [
                ("youtube.com", vec!["feature"]),
                ("facebook.com", vec!["ref", "fref", "hc_location"]),
                ("imdb.com", vec!["ref_"]),
                ("chrome.google.com", vec!["hl"]),
                ("addons.opera.com", vec!["display"]),
                ("addons.mozilla.org", vec!["src"]),
            ],
        )
    }

    /// Parses the JSON table format: an object whose keys are `"global"` or
    /// host patterns and whose values are arrays of parameter names.
    pub fn from_json(text: &str) -> Result<Self> {
        let table: Map<String, Value> =
            serde_json::from_str(text).context("Rule table must be a JSON object")?;

        let mut rules = Self::new();
        for (key, value) in table {
            let names: Vec<String> = serde_json::from_value(value)
                .with_context(|| format!("Rules for '{}' must be an array of strings", key))?;
            if key.eq_ignore_ascii_case(GLOBAL_KEY) {
                rules.global.extend(clean_names(GLOBAL_KEY, names));
            } else {
                rules.insert_host(key, names);
            }
        }
        Ok(rules)
    }

    pub fn to_json(&self) -> Value {
        let mut table = Map::new();
        table.insert(GLOBAL_KEY.to_string(), Value::from(self.global.clone()));
        for (host, names) in &self.by_host {
            table.insert(host.clone(), Value::from(names.clone()));
        }
        Value::Object(table)
    }

    pub fn global(&self) -> &[String] {
        &self.global
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.by_host.iter().map(|(h, n)| (h.as_str(), n.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_host.iter().all(|(_, n)| n.is_empty())
    }

    /// Parameter names that apply to `host`, global names first.
    ///
    /// Returns `None` when nothing applies, which callers treat as "leave the
    /// URL alone" rather than "strip to nothing".
    pub fn resolve(&self, host: &str) -> Option<Vec<String>> {
        let host = normalize_host(host);
        let mut names = self.global.clone();

        for (pattern, list) in &self.by_host {
            if host_matches(&host, pattern) {
                names.extend(list.iter().cloned());
            }
        }

        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }

    fn insert_host(&mut self, host: String, names: impl IntoIterator<Item = String>) {
        let key = normalize_host(&host);
        if key.is_empty() {
            warn!(host = %host, "Skipping rule entry with an empty host pattern");
            return;
        }
        let names = clean_names(&key, names);
        match self.by_host.iter_mut().find(|(h, _)| *h == key) {
            Some((_, existing)) => existing.extend(names),
            None => self.by_host.push((key, names)),
        }
    }
}

fn clean_names(owner: &str, names: impl IntoIterator<Item = String>) -> Vec<String> {
    names
        .into_iter()
        .filter_map(|name| {
            let name = name.trim().to_string();
            if name.is_empty() {
                warn!(rule = %owner, "Dropping empty parameter name");
                None
            } else {
                Some(name)
            }
        })
        .collect()
}

/// Lowercases a hostname and removes a leading `www.` / `www2.`-style label.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match strip_www(&host) {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

fn strip_www(host: &str) -> Option<&str> {
    let rest = host.strip_prefix("www")?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let rest = rest[digits..].strip_prefix('.')?;
    // "www.com" is a registrable name on its own.
    if !rest.contains('.') {
        return None;
    }
    Some(rest)
}

/// `host` matches `pattern` when it is the pattern itself or a dot-delimited
/// subdomain of it, with or without a trailing `:port` on the host.
pub fn host_matches(host: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if suffix_match(host, pattern) {
        return true;
    }
    match host.rsplit_once(':') {
        Some((bare, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            suffix_match(bare, pattern)
        }
        _ => false,
    }
}

fn suffix_match(host: &str, pattern: &str) -> bool {
    host == pattern
        || host
            .strip_suffix(pattern)
            .is_some_and(|rest| rest.ends_with('.'))
}
