//! Feature-kv export format (§6, "optional interop"): a flat string-keyed
//! byte-blob map meant for a downstream serving system to mmap directly,
//! not for round-tripping back into a [`crate::model::Model`].
//!
//! Layout, grounded on `common/feature_kv_util.h`:
//! - key `"version"` -> little-endian `i32` protocol version.
//! - key `"graph"` -> the serialised [`crate::graph::Graph`] (§4.4's
//!   `GraphNode` version-3 format).
//! - every dense (TSR) parameter name -> its raw little-endian `f32`
//!   buffer, no shape header (the graph carries the shape).
//! - every sparse feature id touched by an SRM parameter -> a
//!   concatenation of `(node_id: u16, col: u16, embedding)` triples, one
//!   per SRM parameter that has a row for that id; `embedding` is `col`
//!   little-endian `f32`s for protocol version < 3, or `col` IEEE-754
//!   binary16 halves for version >= 3 (`half_float`).
//!
//! The whole map is written as a single versioned container (magic + u64
//! entry count, then `(key: string, value: bytes)` pairs) via
//! [`deepx_core::stream`].

use indexmap::IndexMap;

use deepx_core::half_float::f32_slice_to_f16;
use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::tensor_map::{TensorMap, TensorValue};

use crate::graph::Graph;

/// Protocol versions at or above this use half-float embeddings instead
/// of raw `f32`; earlier versions always write full precision.
pub const HALF_FLOAT_MIN_VERSION: i32 = 3;

/// An in-memory feature-kv map, ready to [`FeatureKv::write`] to a file or
/// socket. Key order is insertion order (`version`, `graph`, then params
/// in `TensorMap` iteration order).
#[derive(Default)]
pub struct FeatureKv {
    entries: IndexMap<String, Vec<u8>>,
}

impl FeatureKv {
    pub fn new() -> Self {
        FeatureKv::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the export map for one parameter `TensorMap` and its graph,
    /// at the given `version`. Parameter nodes absent from `graph` are
    /// skipped (a feature-kv export is only meaningful for a graph's own
    /// parameters).
    pub fn build(version: i32, graph: &Graph, param: &TensorMap) -> FeatureKv {
        let mut kv = FeatureKv::new();
        kv.entries.insert("version".to_string(), version.to_le_bytes().to_vec());
        kv.entries.insert("graph".to_string(), deepx_core::stream::to_bytes(|os| graph.write(os)));

        let use_half = version >= HALF_FLOAT_MIN_VERSION;
        for (name, value) in param.iter() {
            match value {
                TensorValue::Tsr(t) => {
                    // `f32` is `bytemuck::Pod`, so the dense buffer can be
                    // cast to bytes in one shot rather than encoded one
                    // `f32` at a time; relies on every supported target
                    // being little-endian, same assumption the rest of
                    // this format's layout already makes.
                    kv.entries.insert(name.to_string(), bytemuck::cast_slice(t.data()).to_vec());
                }
                TensorValue::Srm(srm) => {
                    let Some(node) = graph.node_by_name(name) else { continue };
                    let node_id = node.node_id;
                    let col = srm.col() as u16;
                    for (id, row) in srm.iter() {
                        let entry = kv.entries.entry(id.to_string()).or_default();
                        entry.extend_from_slice(&node_id.to_le_bytes());
                        entry.extend_from_slice(&col.to_le_bytes());
                        if use_half {
                            for h in f32_slice_to_f16(row) {
                                entry.extend_from_slice(&h.to_bits().to_le_bytes());
                            }
                        } else {
                            for &v in row {
                                entry.extend_from_slice(&v.to_le_bytes());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        kv
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_container_len(self.entries.len())?;
        for (key, value) in &self.entries {
            os.write_str_(key)?;
            os.write_bytes(value)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<FeatureKv> {
        let len = is.read_container_len()?;
        let mut entries = IndexMap::with_capacity(len);
        for _ in 0..len {
            let key = is.read_string()?;
            let value = is.read_bytes()?;
            entries.insert(key, value);
        }
        Ok(FeatureKv { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepx_core::shape::Shape;
    use deepx_core::srm::SparseRowMatrix;
    use deepx_core::tensor::Tensor;
    use deepx_model_graph_test_support::*;

    /// Small helper so these tests don't depend on `graph::GraphBuilder`'s
    /// exact constructor surface changing shape under them.
    mod deepx_model_graph_test_support {
        use super::*;
        use crate::graph::{GraphBuilder, NodeType, TensorType};

        pub fn one_param_graph(name: &str, tensor_type: TensorType) -> Graph {
            let mut builder = GraphBuilder::new();
            let idx = builder.push(crate::graph::GraphNode::new(
                name,
                NodeType::Param,
                tensor_type,
                Shape::from_dims(&[2]),
            ));
            Graph::compile(builder, &[idx]).unwrap()
        }
    }

    #[test]
    fn build_includes_version_and_graph_keys() {
        let graph = one_param_graph("w", crate::graph::TensorType::Tsr);
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 2.0])));

        let kv = FeatureKv::build(2, &graph, &param);
        assert_eq!(kv.get("version").unwrap(), &2i32.to_le_bytes());
        assert!(kv.get("graph").is_some());
        assert_eq!(kv.get("w").unwrap().len(), 8);
    }

    #[test]
    fn build_packs_sparse_id_triples_with_node_id_and_col() {
        let graph = one_param_graph("emb", crate::graph::TensorType::Srm);
        let node_id = graph.node_by_name("emb").unwrap().node_id;

        let mut srm = SparseRowMatrix::with_col(3);
        srm.assign(7, &[1.0, 2.0, 3.0]);
        let mut param = TensorMap::new();
        param.insert("emb", TensorValue::Srm(srm));

        let kv = FeatureKv::build(2, &graph, &param);
        let entry = kv.get("7").unwrap();
        assert_eq!(entry.len(), 2 + 2 + 3 * 4);
        assert_eq!(u16::from_le_bytes([entry[0], entry[1]]), node_id);
        assert_eq!(u16::from_le_bytes([entry[2], entry[3]]), 3);
    }

    #[test]
    fn version_3_uses_half_float_embeddings() {
        let graph = one_param_graph("emb", crate::graph::TensorType::Srm);
        let mut srm = SparseRowMatrix::with_col(2);
        srm.assign(1, &[1.5, -2.25]);
        let mut param = TensorMap::new();
        param.insert("emb", TensorValue::Srm(srm));

        let kv = FeatureKv::build(3, &graph, &param);
        let entry = kv.get("1").unwrap();
        assert_eq!(entry.len(), 2 + 2 + 2 * 2);
    }

    #[test]
    fn round_trips_through_write_read() {
        let graph = one_param_graph("w", crate::graph::TensorType::Tsr);
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 2.0])));

        let kv = FeatureKv::build(2, &graph, &param);
        let mut buf = Vec::new();
        kv.write(&mut buf).unwrap();

        let mut is = InStream::new(&buf);
        let restored = FeatureKv::read(&mut is).unwrap();
        assert_eq!(restored.get("w"), kv.get("w"));
        assert_eq!(restored.len(), kv.len());
    }
}
