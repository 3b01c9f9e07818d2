use std::collections::HashMap;

/// Maps CSI node ids (Kubernetes node names) onto Storage Scale admin node names.
///
/// The mapping for a node id `N` is resolved by looking up `N`, then, for ids starting with a
/// digit, `<prefix>N`, and finally falling back to `N` itself.
#[derive(Debug, Clone, Default)]
pub struct NodeMapping {
    table: HashMap<String, String>,
    prefix: String,
}

impl NodeMapping {
    /// Create a mapping from an explicit table.
    pub fn new(table: HashMap<String, String>, prefix: impl Into<String>) -> Self {
        Self {
            table,
            prefix: prefix.into(),
        }
    }

    /// Build the mapping from the process environment, where each node is configured as an
    /// environment variable named after the node.
    pub fn from_env(prefix: impl Into<String>) -> Self {
        let table = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self::new(table, prefix)
    }

    /// The prefix used for node ids starting with a digit.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the admin node name for the given CSI node id.
    pub fn admin_node_name(&self, node_id: &str) -> String {
        if let Some(name) = self.lookup(node_id) {
            return name;
        }
        if node_id.starts_with(|c: char| c.is_ascii_digit()) {
            if let Some(name) = self.lookup(&format!("{}{node_id}", self.prefix)) {
                return name;
            }
        }
        node_id.to_string()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.table
            .get(key)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
    }
}
