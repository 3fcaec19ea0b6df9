use std::collections::BTreeMap;

/// Prefix → URI bindings available to XPath name tests.
///
/// Feeds often declare namespaces with prefixes that differ from the ones a
/// selector author wants to write, or bind a default namespace. Registering
/// a prefix here lets `p:item` match any element in that namespace whatever
/// prefix the document itself used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceRegistry {
    bindings: BTreeMap<String, String>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.bindings.insert(prefix.into(), uri.into());
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}

impl From<BTreeMap<String, String>> for NamespaceRegistry {
    fn from(bindings: BTreeMap<String, String>) -> Self {
        NamespaceRegistry { bindings }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NamespaceRegistry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut registry = NamespaceRegistry::new();
        for (prefix, uri) in iter {
            registry.register(prefix, uri);
        }
        registry
    }
}

/// In-scope namespace declarations of a document being read, one frame per
/// open element.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceScope {
    /// A scope whose outermost frame holds `inherited` bindings (prefix
    /// `None` is the default namespace).
    pub fn with_inherited(inherited: Vec<(Option<String>, String)>) -> Self {
        NamespaceScope {
            frames: vec![inherited],
        }
    }

    pub fn push(&mut self, declarations: Vec<(Option<String>, String)>) {
        self.frames.push(declarations);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some("http://www.w3.org/XML/1998/namespace".to_string());
        }
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    /// Every binding visible at this point, innermost winning.
    pub fn flatten(&self) -> Vec<(Option<String>, String)> {
        let mut out: Vec<(Option<String>, String)> = Vec::new();
        for (prefix, uri) in self.frames.iter().flatten() {
            out.retain(|(p, _)| p != prefix);
            out.push((prefix.clone(), uri.clone()));
        }
        out
    }
}
