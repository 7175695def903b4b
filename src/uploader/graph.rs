//! Graph-def filtering
//!
//! Values tagged with the reserved graph plugin carry a serialized graph in
//! their tensor bytes. Node attributes can embed large constants that blow
//! the request budget, so attributes over the size threshold are stripped
//! and recorded under a sentinel key before the graph is re-serialized.

use prost::Message;

use crate::wire::GraphDef;

/// Plugin name reserved for graph summaries.
pub const GRAPHS_PLUGIN: &str = "graphs";

/// Attribute key recording which attributes were stripped from a node.
pub const LARGE_ATTR_SENTINEL: &str = "_too_large_attrs";

/// Largest node attribute forwarded unmodified.
pub const MAX_GRAPH_ATTR_SIZE: usize = 1024;

/// Re-serialize `bytes` with oversized node attributes stripped.
///
/// Stripped attribute names are recorded, comma-joined, under
/// [`LARGE_ATTR_SENTINEL`] on the affected node.
///
/// # Errors
///
/// Returns a decode error when `bytes` is not a valid graph.
pub fn prepare_graph_def(bytes: &[u8], max_attr_size: usize) -> Result<Vec<u8>, prost::DecodeError> {
    let mut graph = GraphDef::decode(bytes)?;
    for node in &mut graph.node {
        let mut stripped: Vec<String> = node
            .attr
            .iter()
            .filter(|(_, value)| value.len() > max_attr_size)
            .map(|(key, _)| key.clone())
            .collect();
        if stripped.is_empty() {
            continue;
        }
        stripped.sort();
        for key in &stripped {
            node.attr.remove(key);
        }
        node.attr
            .insert(LARGE_ATTR_SENTINEL.to_string(), stripped.join(",").into_bytes());
    }
    Ok(graph.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::NodeDef;
    use std::collections::HashMap;

    fn graph_with_attrs(attrs: &[(&str, usize)]) -> Vec<u8> {
        let mut attr = HashMap::new();
        for (key, size) in attrs {
            attr.insert((*key).to_string(), vec![0u8; *size]);
        }
        GraphDef {
            node: vec![NodeDef {
                name: "n".to_string(),
                op: "Const".to_string(),
                input: Vec::new(),
                attr,
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_small_attrs_untouched() {
        let bytes = graph_with_attrs(&[("value", 16)]);
        let filtered = prepare_graph_def(&bytes, 1024).unwrap();
        let graph = GraphDef::decode(filtered.as_slice()).unwrap();
        assert!(graph.node[0].attr.contains_key("value"));
        assert!(!graph.node[0].attr.contains_key(LARGE_ATTR_SENTINEL));
    }

    #[test]
    fn test_oversized_attrs_stripped_and_recorded() {
        let bytes = graph_with_attrs(&[("value", 4096), ("dtype", 8), ("weights", 2048)]);
        let filtered = prepare_graph_def(&bytes, 1024).unwrap();
        assert!(filtered.len() < bytes.len());

        let graph = GraphDef::decode(filtered.as_slice()).unwrap();
        let node = &graph.node[0];
        assert!(!node.attr.contains_key("value"));
        assert!(!node.attr.contains_key("weights"));
        assert!(node.attr.contains_key("dtype"));
        assert_eq!(
            node.attr[LARGE_ATTR_SENTINEL],
            b"value,weights".to_vec()
        );
    }

    #[test]
    fn test_malformed_graph_is_error() {
        assert!(prepare_graph_def(&[0xff, 0x01, 0x02], 1024).is_err());
    }
}
