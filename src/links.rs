use std::sync::LazyLock;

use regex::Regex;

/// An element carrying an href-like attribute.
pub trait LinkNode {
    fn href(&self) -> Option<&str>;
    fn set_href(&mut self, href: String);
}

pub type InsertObserver<L> = Box<dyn FnMut(&mut L) + Send>;

/// A document whose links can be enumerated and whose future link
/// insertions can be observed.
pub trait LinkDocument {
    type Link: LinkNode;

    /// Visits every link currently in the document.
    fn for_each_link(&mut self, visit: &mut dyn FnMut(&mut Self::Link));

    /// Registers a callback run for each link inserted from now on.
    fn on_insert(&mut self, observer: InsertObserver<Self::Link>);
}

// The attribute name must follow whitespace, so `data-href` is not a link.
static HREF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid href pattern")
});

static AMPERSAND_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)&(?:amp|#0*38|#x0*26);").expect("valid ampersand pattern")
});

/// A quoted `href` attribute value inside an [`HtmlDocument`].
#[derive(Debug, Clone)]
pub struct HrefAttr {
    raw: String,
    value: String,
    quote: char,
    modified: bool,
}

impl HrefAttr {
    fn new(raw: &str, quote: char) -> Self {
        Self {
            raw: raw.to_string(),
            value: AMPERSAND_REF.replace_all(raw, "&").into_owned(),
            quote,
            modified: false,
        }
    }

    fn render(&self) -> String {
        if !self.modified {
            return self.raw.clone();
        }
        let mut out = self.value.replace('&', "&amp;");
        if self.quote == '"' {
            out = out.replace('"', "&quot;");
        } else {
            out = out.replace('\'', "&#39;");
        }
        out
    }
}

impl LinkNode for HrefAttr {
    fn href(&self) -> Option<&str> {
        Some(&self.value)
    }

    fn set_href(&mut self, href: String) {
        if href != self.value {
            self.value = href;
            self.modified = true;
        }
    }
}

#[derive(Debug)]
enum Chunk {
    Text(String),
    Href(HrefAttr),
}

/// HTML text split into plain chunks and `href` attribute values.
///
/// Only quoted attributes are recognized. Everything outside the attribute
/// values is reproduced byte for byte by [`HtmlDocument::render`].
#[derive(Default)]
pub struct HtmlDocument {
    chunks: Vec<Chunk>,
    observers: Vec<InsertObserver<HrefAttr>>,
}

impl HtmlDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            chunks: split_chunks(html),
            observers: Vec::new(),
        }
    }

    /// Appends `html`, notifying observers about every link it contains.
    ///
    /// Returns the number of links inserted.
    pub fn insert_html(&mut self, html: &str) -> usize {
        let mut inserted = 0;
        let mut chunks = split_chunks(html);
        for chunk in &mut chunks {
            if let Chunk::Href(link) = chunk {
                inserted += 1;
                for observer in &mut self.observers {
                    observer(&mut *link);
                }
            }
        }
        self.chunks.extend(chunks);
        inserted
    }

    pub fn hrefs(&self) -> Vec<&str> {
        self.chunks
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::Href(link) => Some(link.value.as_str()),
                Chunk::Text(_) => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Text(text) => out.push_str(text),
                Chunk::Href(link) => out.push_str(&link.render()),
            }
        }
        out
    }
}

impl LinkDocument for HtmlDocument {
    type Link = HrefAttr;

    fn for_each_link(&mut self, visit: &mut dyn FnMut(&mut HrefAttr)) {
        for chunk in &mut self.chunks {
            if let Chunk::Href(link) = chunk {
                visit(link);
            }
        }
    }

    fn on_insert(&mut self, observer: InsertObserver<HrefAttr>) {
        self.observers.push(observer);
    }
}

fn split_chunks(html: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut last = 0;

    for caps in HREF_ATTR.captures_iter(html) {
        let (value, quote) = match (caps.get(1), caps.get(2)) {
            (Some(m), _) => (m, '"'),
            (None, Some(m)) => (m, '\''),
            (None, None) => continue,
        };
        chunks.push(Chunk::Text(html[last..value.start()].to_string()));
        chunks.push(Chunk::Href(HrefAttr::new(value.as_str(), quote)));
        last = value.end();
    }

    chunks.push(Chunk::Text(html[last..].to_string()));
    chunks
}
