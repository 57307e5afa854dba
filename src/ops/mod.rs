//! Operator trait registry
//!
//! A process-wide table mapping op-type strings to trait flags. The
//! scheduler only consults `ELEMENT_WISE`, which gates the in-place
//! aliasing (overlap) rule of the memory model. The table is seeded with
//! the ONNX operators whose schemas describe them as element-wise, plus a
//! set of common structural ops registered without traits so lookups on
//! them stay quiet. Domain-specific op sets can be added at runtime with
//! `register`.
//!
//! Lookups on unknown op types return "no traits" with a warning, which is
//! conservative: an unknown op never aliases its input buffer.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::RwLock;

/// Bit-flag set of operator traits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpTraits(u32);

impl OpTraits {
    /// No traits
    pub const NONE: OpTraits = OpTraits(0);
    /// Output is computed element-by-element from inputs of the same shape
    pub const ELEMENT_WISE: OpTraits = OpTraits(1 << 0);

    /// Whether all flags in `other` are set
    pub fn contains(self, other: OpTraits) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpTraits {
    type Output = OpTraits;

    fn bitor(self, rhs: OpTraits) -> OpTraits {
        OpTraits(self.0 | rhs.0)
    }
}

/// ONNX operators with element-wise semantics
const ELEMENT_WISE_OPS: &[&str] = &[
    "Abs", "Acos", "Acosh", "Add", "And", "Asin", "Asinh", "Atan", "Atanh", "Ceil", "Celu",
    "Clip", "Cos", "Cosh", "Div", "Elu", "Equal", "Erf", "Exp", "Floor", "Greater",
    "GreaterOrEqual", "HardSigmoid", "HardSwish", "Identity", "LeakyRelu", "Less",
    "LessOrEqual", "Log", "Mod", "Mul", "Neg", "Not", "Or", "Pow", "PRelu", "Reciprocal",
    "Relu", "Round", "Selu", "Sigmoid", "Sign", "Sin", "Sinh", "Softplus", "Softsign",
    "Sqrt", "Sub", "Tan", "Tanh", "ThresholdedRelu", "Xor",
];

/// Common ops with no scheduling-relevant traits, registered so that
/// lookups on them do not warn
const PLAIN_OPS: &[&str] = &[
    "AveragePool", "BatchNormalization", "Cast", "Concat", "Conv", "ConvTranspose",
    "Dropout", "Expand", "Flatten", "Gather", "Gemm", "GlobalAveragePool", "GlobalMaxPool",
    "InstanceNormalization", "LayerNormalization", "LRN", "MatMul", "Max", "MaxPool",
    "Mean", "Min", "Pad", "ReduceMax", "ReduceMean", "ReduceSum", "Reshape", "Resize",
    "Shape", "Slice", "Softmax", "Split", "Squeeze", "Sum", "Transpose", "Unsqueeze",
    "Upsample", "Where",
];

static REGISTRY: Lazy<RwLock<HashMap<String, OpTraits>>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for &name in ELEMENT_WISE_OPS {
        table.insert(name.to_string(), OpTraits::ELEMENT_WISE);
    }
    for &name in PLAIN_OPS {
        table.insert(name.to_string(), OpTraits::NONE);
    }
    RwLock::new(table)
});

/// Register traits for an op type, merging with any existing flags.
///
/// Intended for domain-specific op sets the built-in table does not cover.
pub fn register(op_type: &str, traits: OpTraits) {
    let mut table = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    let entry = table.entry(op_type.to_string()).or_insert(OpTraits::NONE);
    *entry = *entry | traits;
}

/// Whether `op_type` carries all flags in `traits`.
///
/// Unknown op types warn once per call site invocation and report no
/// traits.
pub fn matches(op_type: &str, traits: OpTraits) -> bool {
    let table = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
    match table.get(op_type) {
        Some(t) => t.contains(traits),
        None => {
            tracing::warn!(op_type, "op type not found in trait registry");
            false
        }
    }
}

/// Whether an op type is element-wise
pub fn is_element_wise(op_type: &str) -> bool {
    matches(op_type, OpTraits::ELEMENT_WISE)
}
