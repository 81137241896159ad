use std::collections::HashMap;

/// A typed binary value used for patch properties.
///
/// Real LV2 atoms are a dense binary encoding keyed by a URID; since this
/// crate doesn't host LV2 itself (the plugin catalog is an external
/// collaborator, see [`crate::PluginCatalog`]), `Atom` models only the
/// cases the control plane actually needs to move across the wire: paths,
/// strings, numbers, and opaque bytes for anything else.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Atom {
    Path(String),
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// Process-internal URI <-> integer mapping for patch-property and atom
/// type identifiers, following the `map_feature`/URID convention the
/// original host exposes to plugins (see §6 of the host-side services
/// contract). Mappings are assigned on first use and never reused.
#[derive(Debug, Default)]
pub struct UriMap {
    forward: HashMap<String, u32>,
    reverse: HashMap<u32, String>,
    next: u32,
}

impl UriMap {
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
            next: 1,
        }
    }

    /// Map a URI to its stable integer id, assigning one if this is the
    /// first time the URI has been seen.
    pub fn map(&mut self, uri: &str) -> u32 {
        if let Some(&id) = self.forward.get(uri) {
            return id;
        }
        let id = self.next;
        self.next += 1;
        self.forward.insert(uri.to_string(), id);
        self.reverse.insert(id, uri.to_string());
        id
    }

    pub fn unmap(&self, id: u32) -> Option<&str> {
        self.reverse.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_stable_and_reversible() {
        let mut map = UriMap::new();
        let a = map.map("urn:stompbox:ir");
        let b = map.map("urn:stompbox:ir");
        assert_eq!(a, b);
        assert_eq!(map.unmap(a), Some("urn:stompbox:ir"));
    }

    #[test]
    fn distinct_uris_get_distinct_ids() {
        let mut map = UriMap::new();
        let a = map.map("urn:a");
        let b = map.map("urn:b");
        assert_ne!(a, b);
    }
}
