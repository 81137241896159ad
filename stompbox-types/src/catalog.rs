/// One control port's static metadata, as declared by the plugin.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlPortInfo {
    pub symbol: String,
    pub index: u32,
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

/// A declared file-property slot (e.g. an IR loader's `cabinet` property):
/// which well-known directory it's rooted at and which extensions are
/// acceptable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilePropertyInfo {
    pub patch_property_uri: String,
    pub well_known_directory: String,
    pub allowed_extensions: Vec<String>,
}

/// Static metadata for one plugin type, as supplied by the plugin
/// catalog (§6 of the host contract). Everything about *discovering*
/// this data — scanning LV2 bundles, reading turtle metadata — is an
/// external collaborator; the host only consumes the resulting struct.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginInfo {
    pub uri: String,
    pub name: String,
    pub input_ports: u32,
    pub output_ports: u32,
    pub control_ports: Vec<ControlPortInfo>,
    pub has_midi_input: bool,
    pub file_properties: Vec<FilePropertyInfo>,
    pub factory_presets: Vec<String>,
}

/// The interface the host consumes to resolve a `plugin_uri` into static
/// metadata. A concrete LV2 implementation (bundle discovery, turtle
/// parsing) is deliberately out of scope; callers supply their own
/// implementation (or a fixed in-memory one, as the tests do).
pub trait PluginCatalog: Send + Sync {
    fn lookup(&self, plugin_uri: &str) -> Option<PluginInfo>;
    fn all(&self) -> Vec<PluginInfo>;
}

/// A fixed, in-memory catalog useful for tests and for the dummy-driver
/// built-in plugins.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    plugins: Vec<PluginInfo>,
}

impl StaticCatalog {
    pub fn new(plugins: Vec<PluginInfo>) -> Self {
        Self { plugins }
    }
}

impl PluginCatalog for StaticCatalog {
    fn lookup(&self, plugin_uri: &str) -> Option<PluginInfo> {
        self.plugins.iter().find(|p| p.uri == plugin_uri).cloned()
    }

    fn all(&self) -> Vec<PluginInfo> {
        self.plugins.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_looks_up_by_uri() {
        let catalog = StaticCatalog::new(vec![PluginInfo {
            uri: "urn:stompbox:gain".into(),
            name: "Gain".into(),
            input_ports: 1,
            output_ports: 1,
            control_ports: vec![ControlPortInfo {
                symbol: "gain".into(),
                index: 0,
                default: 1.0,
                min: 0.0,
                max: 4.0,
            }],
            has_midi_input: false,
            file_properties: vec![],
            factory_presets: vec![],
        }]);

        assert!(catalog.lookup("urn:stompbox:gain").is_some());
        assert!(catalog.lookup("urn:unknown").is_none());
    }
}
