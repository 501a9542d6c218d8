use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::links::{LinkDocument, LinkNode};
use crate::rules::{normalize_host, RuleSet};

/// Supplies the URL of the page currently being viewed.
pub trait Location {
    fn href(&self) -> String;
}

impl<F: Fn() -> String> Location for F {
    fn href(&self) -> String {
        self()
    }
}

/// Navigates the host environment to a new URL.
pub trait Redirect {
    fn redirect(&mut self, url: &str);
}

impl<F: FnMut(&str)> Redirect for F {
    fn redirect(&mut self, url: &str) {
        self(url)
    }
}

/// Removes tracking parameters from URLs using a shared rule set.
#[derive(Debug, Clone)]
pub struct Stripper {
    rules: Arc<RuleSet>,
}

impl Default for Stripper {
    fn default() -> Self {
        Self::new(RuleSet::default_rules())
    }
}

impl Stripper {
    pub fn new(rules: impl Into<Arc<RuleSet>>) -> Self {
        Self { rules: rules.into() }
    }

    /// Replaces the whole rule set.
    pub fn set_rules(mut self, rules: impl Into<Arc<RuleSet>>) -> Self {
        self.rules = rules.into();
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Returns `url` without the parameters that apply to its host.
    ///
    /// Anything that is not an absolute URL with a hostname, or whose host
    /// has no rules, is returned unchanged.
    pub fn strip_url(&self, url: &str) -> String {
        if !url.contains("://") {
            return url.to_string();
        }

        let mut parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "Leaving unparsable URL untouched");
                return url.to_string();
            }
        };

        let Some(host) = lookup_host(&parsed) else {
            return url.to_string();
        };

        let Some(names) = self.rules.resolve(&host) else {
            return url.to_string();
        };

        let Some(matcher) = QueryMatcher::new(&names) else {
            return url.to_string();
        };

        if let Some(query) = parsed.query() {
            let filtered = matcher.filter(query);
            if filtered.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.set_query(Some(&filtered));
            }
        }

        if parsed.fragment() == Some("") {
            parsed.set_fragment(None);
        }

        parsed.into()
    }

    /// Strips `url`, or the current location when no URL is given.
    pub fn strip_url_or_current(&self, url: Option<&str>, location: &impl Location) -> String {
        match url {
            Some(url) => self.strip_url(url),
            None => self.strip_url(&location.href()),
        }
    }

    /// Strips the current location and redirects only if something changed.
    pub fn strip_location(&self, location: &impl Location, redirect: &mut impl Redirect) -> String {
        let current = location.href();
        let stripped = self.strip_url(&current);

        if current != stripped {
            debug!(from = %current, to = %stripped, "Redirecting to stripped location");
            redirect.redirect(&stripped);
        }

        stripped
    }

    /// Rewrites every link in `document`, including links inserted later.
    ///
    /// Returns how many links of the initial snapshot were changed.
    pub fn strip_links<D: LinkDocument>(&self, document: &mut D) -> usize {
        let mut changed = 0;
        document.for_each_link(&mut |link: &mut D::Link| {
            if self.strip_link(link) {
                changed += 1;
            }
        });

        let stripper = self.clone();
        document.on_insert(Box::new(move |link: &mut D::Link| {
            stripper.strip_link(link);
        }));

        changed
    }

    fn strip_link<L: LinkNode + ?Sized>(&self, link: &mut L) -> bool {
        let Some(href) = link.href() else {
            return false;
        };
        let stripped = self.strip_url(href);
        let changed = stripped != href;
        if changed {
            link.set_href(stripped);
        }
        changed
    }
}

/// Host used for rule lookup: lowercase, no `www.` label, with the effective
/// port so keys like `host.com:80` match whether or not the port was written.
fn lookup_host(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?;
    let host = normalize_host(host);
    Some(match url.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Case-insensitive alternation of literal parameter names, anchored at the
/// start of a parameter. A match takes the whole parameter up to the next `&`,
/// so `ref` also removes `refid=1`.
struct QueryMatcher {
    names: Regex,
}

impl QueryMatcher {
    fn new(names: &[String]) -> Option<Self> {
        let alternation = names
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        match Regex::new(&format!("(?i)^(?:{})", alternation)) {
            Ok(names) => Some(Self { names }),
            Err(e) => {
                warn!(error = %e, "Failed to compile parameter matcher");
                None
            }
        }
    }

    /// Drops parameters that start with a rule name, keeping the rest verbatim.
    fn filter(&self, query: &str) -> String {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|segment| {
                let param = segment.trim_start_matches('?');
                !param.is_empty() && !self.names.is_match(param)
            })
            .collect();

        kept.join("&").trim_start_matches(['?', '&']).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::HtmlDocument;

    fn youtube_only() -> Stripper {
        Stripper::new(RuleSet::from_table(
            Vec::<&str>::new(),
            [("youtube.com", vec!["feature"])],
        ))
    }

    #[test]
    fn test_strip_complicated_url() {
        let stripper = Stripper::default();
        assert_eq!(
            stripper.strip_url("https://encrypted.google.com/search?q=test&utm_source=blah&foo#bar"),
            "https://encrypted.google.com/search?q=test&foo#bar"
        );
    }

    #[test]
    fn test_fragment_is_untouched() {
        let stripper = Stripper::default();
        assert_eq!(
            stripper.strip_url("http://www.google.com/search?utm_campaign=testing&foo=bar#utm_term=baz"),
            "http://www.google.com/search?foo=bar#utm_term=baz"
        );
    }

    #[test]
    fn test_host_rule_subdomain_and_port() {
        let stripper = youtube_only();
        assert_eq!(
            stripper.strip_url("http://youtube.com/?v=12345&feature=youtube-gdata"),
            "http://youtube.com/?v=12345"
        );
        assert_eq!(
            stripper.strip_url("http://videos.youtube.com/?v=12345&feature=youtube-gdata"),
            "http://videos.youtube.com/?v=12345"
        );
        assert_eq!(
            stripper.strip_url("http://videos.youtube.com:4040/?v=12345&feature=youtube-gdata"),
            "http://videos.youtube.com:4040/?v=12345"
        );
    }

    #[test]
    fn test_no_query_is_unchanged() {
        let stripper = Stripper::default();
        assert_eq!(stripper.strip_url("http://example.com/path"), "http://example.com/path");
    }

    #[test]
    fn test_non_urls_pass_through() {
        let stripper = Stripper::default();
        for input in [
            "/relative/path?utm_source=x",
            "mailto:someone@example.com?utm_source=x",
            "javascript:void(0)",
            "#utm_source=x",
            "",
        ] {
            assert_eq!(stripper.strip_url(input), input);
        }
    }

    #[test]
    fn test_malformed_urls_pass_through() {
        let stripper = Stripper::default();
        for input in ["http://exa mple.com/?utm_source=x", "http://[::1/?utm_source=x", "file:///tmp/a?utm_source=x"] {
            assert_eq!(stripper.strip_url(input), input);
        }
    }

    #[test]
    fn test_no_rules_returns_input_verbatim() {
        let stripper = Stripper::new(RuleSet::new());
        let input = "HTTP://Example.com?utm_source=x&";
        assert_eq!(stripper.strip_url(input), input);
        assert_eq!(youtube_only().strip_url("http://vimeo.com/?feature=a"), "http://vimeo.com/?feature=a");
    }

    #[test]
    fn test_all_params_removed_leaves_no_question_mark() {
        let stripper = Stripper::default();
        assert_eq!(
            stripper.strip_url("https://example.com/a?utm_source=x&utm_medium=y"),
            "https://example.com/a"
        );
        assert_eq!(
            stripper.strip_url("https://example.com/a?utm_source=x#"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_separators_are_cleaned_up() {
        let stripper = Stripper::default();
        assert_eq!(
            stripper.strip_url("https://example.com/?utm_source=x&&a=1&?utm_term=2&b&"),
            "https://example.com/?a=1&b"
        );
        assert_eq!(
            stripper.strip_url("https://example.com/??utm_source=x&a=1"),
            "https://example.com/?a=1"
        );
    }

    #[test]
    fn test_matching_is_case_insensitive_and_consumes_key_prefix() {
        let stripper = Stripper::default();
        assert_eq!(
            stripper.strip_url("https://example.com/?UTM_Source=x&utm_sourcefoo=1&utm_source&b=2"),
            "https://example.com/?b=2"
        );
        assert_eq!(
            stripper.strip_url("https://facebook.com/p?refid=1&x=2"),
            "https://facebook.com/p?x=2"
        );
        // Names only match at the start of a parameter.
        assert_eq!(
            stripper.strip_url("https://example.com/?my_utm_source=1&q=utm_source"),
            "https://example.com/?my_utm_source=1&q=utm_source"
        );
    }

    #[test]
    fn test_key_with_default_port() {
        let stripper = Stripper::new(RuleSet::from_table(
            Vec::<&str>::new(),
            [("host.com:80", vec!["sid"]), ("shop.example:443", vec!["aff"])],
        ));
        assert_eq!(stripper.strip_url("http://host.com:80/?sid=1&q=2"), "http://host.com/?q=2");
        assert_eq!(stripper.strip_url("http://host.com/?sid=1&q=2"), "http://host.com/?q=2");
        assert_eq!(stripper.strip_url("https://shop.example:443/i?aff=9&id=3"), "https://shop.example/i?id=3");
        // A different port does not match.
        assert_eq!(
            stripper.strip_url("http://host.com:8080/?sid=1&q=2"),
            "http://host.com:8080/?sid=1&q=2"
        );
    }

    #[test]
    fn test_names_are_literal() {
        let stripper = Stripper::new(RuleSet::from_table(vec!["a.b", "c+"], Vec::<(&str, Vec<&str>)>::new()));
        assert_eq!(
            stripper.strip_url("https://example.com/?axb=1&a.b=2&c+=3&cc=4"),
            "https://example.com/?axb=1&cc=4"
        );
    }

    #[test]
    fn test_strip_is_idempotent() {
        let stripper = Stripper::default();
        for input in [
            "https://encrypted.google.com/search?q=test&utm_source=blah&foo#bar",
            "http://www.facebook.com/profile?id=1&fref=ts&ref=br&x=&&",
            "http://example.com",
            "https://example.com/?&&?",
        ] {
            let once = stripper.strip_url(input);
            assert_eq!(stripper.strip_url(&once), once);
        }
    }

    #[test]
    fn test_strip_url_or_current() {
        let stripper = Stripper::default();
        let location = || "https://example.com/?utm_source=x&a=1".to_string();
        assert_eq!(stripper.strip_url_or_current(None, &location), "https://example.com/?a=1");
        assert_eq!(
            stripper.strip_url_or_current(Some("https://example.com/?utm_term=1"), &location),
            "https://example.com/"
        );
    }

    #[test]
    fn test_strip_location_redirects_only_on_change() {
        let stripper = Stripper::default();
        let mut redirects = Vec::new();

        let dirty = || "https://example.com/?utm_source=x&a=1".to_string();
        let result = stripper.strip_location(&dirty, &mut |url: &str| redirects.push(url.to_string()));
        assert_eq!(result, "https://example.com/?a=1");

        let clean = || "https://example.com/?a=1".to_string();
        let result = stripper.strip_location(&clean, &mut |url: &str| redirects.push(url.to_string()));
        assert_eq!(result, "https://example.com/?a=1");

        assert_eq!(redirects, vec!["https://example.com/?a=1".to_string()]);
    }

    #[test]
    fn test_strip_links_handles_snapshot_and_insertions() {
        let stripper = youtube_only();
        let mut doc = HtmlDocument::parse(
            r#"<a href="http://youtube.com/?v=1&amp;feature=x">a</a><a href="/local">b</a>"#,
        );

        assert_eq!(stripper.strip_links(&mut doc), 1);
        assert_eq!(doc.hrefs(), vec!["http://youtube.com/?v=1", "/local"]);

        doc.insert_html(r#"<a href='http://m.youtube.com/watch?feature=y&v=2'>c</a>"#);
        assert_eq!(doc.hrefs()[2], "http://m.youtube.com/watch?v=2");
    }

    #[test]
    fn test_set_rules_is_chainable() {
        let stripper = Stripper::default().set_rules(RuleSet::new());
        let input = "https://example.com/?utm_source=x";
        assert_eq!(stripper.strip_url(input), input);
        assert!(stripper.rules().is_empty());
    }
}
