//! Request and response payloads exchanged with the prediction service.
//!
//! The shapes follow the TensorFlow Serving predict API: a model spec plus a
//! map of named tensors, each carrying a dtype, a shape and one typed value
//! list. Only the value list matching `dtype` is populated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    #[default]
    DtInvalid,
    DtFloat,
    DtDouble,
    DtInt32,
    DtBool,
    DtString,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TensorShape {
    pub dims: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TensorProto {
    pub dtype: DataType,
    pub tensor_shape: TensorShape,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub float_val: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub double_val: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int_val: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bool_val: Vec<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_val: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    pub model_spec: ModelSpec,
    pub inputs: BTreeMap<String, TensorProto>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictResponse {
    pub model_spec: ModelSpec,
    pub outputs: BTreeMap<String, TensorProto>,
}
