//! Model-source interface
//!
//! The scheduler does not parse ONNX protobufs itself. An external loader
//! (or a test) hands over a `ModelGraph`: a plain, fully typed description
//! of the computation with shape-inferred intermediates. The structures
//! here are serde-serializable so that models can also be read from the
//! JSON form used by the CLI.
//!
//! The loader must guarantee that every value name referenced by a node is
//! declared as an input, initializer, output or intermediate; construction
//! fails with a "value X not found" diagnostic otherwise.

use crate::error::{ForgeResult, OpForgeError};
use crate::graph::TensorType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A node attribute carried over from the model source
///
/// The scheduler itself never interprets attributes; they ride along so
/// that downstream consumers of the schedule (code generators, reporters)
/// keep access to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    /// Integer attribute
    Int(i64),
    /// Float attribute
    Float(f64),
    /// String attribute
    Str(String),
    /// Integer list attribute
    Ints(Vec<i64>),
    /// Float list attribute
    Floats(Vec<f64>),
}

/// A named, typed value declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelValueInfo {
    /// Value name, unique within the model
    pub name: String,
    /// Concrete tensor type
    #[serde(rename = "type")]
    pub ty: TensorType,
}

/// An initializer: a parameter tensor with its raw payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTensor {
    /// Parameter name, unique within the model
    pub name: String,
    /// Concrete tensor type
    #[serde(rename = "type")]
    pub ty: TensorType,
    /// Raw little-endian payload; may be empty when only scheduling
    #[serde(default)]
    pub data: Vec<u8>,
}

/// One operator node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelNode {
    /// Node name; may be empty in which case one is derived from the op type
    #[serde(default)]
    pub name: String,
    /// Operator type string, e.g. "Conv"
    pub op_type: String,
    /// Names of consumed values, in order
    pub inputs: Vec<String>,
    /// Names of produced values, in order
    pub outputs: Vec<String>,
    /// Attribute table
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
}

/// A complete, shape-inferred model graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelGraph {
    /// Model name
    #[serde(default)]
    pub name: String,
    /// Graph inputs
    pub inputs: Vec<ModelValueInfo>,
    /// Graph outputs
    pub outputs: Vec<ModelValueInfo>,
    /// Parameters
    #[serde(default)]
    pub initializers: Vec<ModelTensor>,
    /// Typed intermediate values (shape inference results)
    #[serde(default)]
    pub value_infos: Vec<ModelValueInfo>,
    /// Operator nodes in model order
    pub nodes: Vec<ModelNode>,
}

impl ModelGraph {
    /// Read a model graph from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> ForgeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parse a model graph from a JSON string
    pub fn from_json(text: &str) -> ForgeResult<Self> {
        serde_json::from_str(text).map_err(|e| OpForgeError::ModelParse(e.to_string()))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> ForgeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| OpForgeError::ModelParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DataType;

    #[test]
    fn test_model_json_round_trip() {
        let model = ModelGraph {
            name: "tiny".to_string(),
            inputs: vec![ModelValueInfo {
                name: "x".to_string(),
                ty: TensorType::new(vec![1, 4], DataType::Float),
            }],
            outputs: vec![ModelValueInfo {
                name: "y".to_string(),
                ty: TensorType::new(vec![1, 4], DataType::Float),
            }],
            initializers: vec![],
            value_infos: vec![],
            nodes: vec![ModelNode {
                name: "relu0".to_string(),
                op_type: "Relu".to_string(),
                inputs: vec!["x".to_string()],
                outputs: vec!["y".to_string()],
                attributes: BTreeMap::new(),
            }],
        };

        let json = model.to_json().unwrap();
        let parsed = ModelGraph::from_json(&json).unwrap();
        assert_eq!(parsed.name, "tiny");
        assert_eq!(parsed.nodes.len(), 1);
        assert_eq!(parsed.nodes[0].op_type, "Relu");
        assert_eq!(parsed.inputs[0].ty.size(), 16);
    }

    #[test]
    fn test_model_json_rejects_garbage() {
        let err = ModelGraph::from_json("{not json").unwrap_err();
        assert!(matches!(err, OpForgeError::ModelParse(_)));
    }

    #[test]
    fn test_attribute_untagged_forms() {
        let json = r#"{
            "name": "attrs",
            "inputs": [],
            "outputs": [],
            "nodes": [{
                "op_type": "Conv",
                "inputs": [],
                "outputs": [],
                "attributes": {
                    "kernel_shape": [3, 3],
                    "group": 1,
                    "auto_pad": "SAME_UPPER"
                }
            }]
        }"#;
        let model = ModelGraph::from_json(json).unwrap();
        let attrs = &model.nodes[0].attributes;
        assert_eq!(attrs.get("group"), Some(&Attribute::Int(1)));
        assert_eq!(
            attrs.get("kernel_shape"),
            Some(&Attribute::Ints(vec![3, 3]))
        );
        assert_eq!(
            attrs.get("auto_pad"),
            Some(&Attribute::Str("SAME_UPPER".to_string()))
        );
    }
}
