use crate::tensor::{DataType, PredictRequest, TensorProto};

/// Fluent builder for a single named input tensor.
#[derive(Debug, Default)]
pub struct TensorBuilder {
    tensor: TensorProto,
}

impl TensorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append dimensions to the tensor shape
    pub fn with_dimensions(mut self, dims: impl IntoIterator<Item = i64>) -> Self {
        self.tensor.tensor_shape.dims.extend(dims);
        self
    }

    pub fn with_float_values(mut self, values: impl IntoIterator<Item = f32>) -> Self {
        self.tensor.dtype = DataType::DtFloat;
        self.tensor.float_val.extend(values);
        self
    }

    pub fn with_double_values(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.tensor.dtype = DataType::DtDouble;
        self.tensor.double_val.extend(values);
        self
    }

    pub fn with_int32_values(mut self, values: impl IntoIterator<Item = i32>) -> Self {
        self.tensor.dtype = DataType::DtInt32;
        self.tensor.int_val.extend(values);
        self
    }

    pub fn with_bool_values(mut self, values: impl IntoIterator<Item = bool>) -> Self {
        self.tensor.dtype = DataType::DtBool;
        self.tensor.bool_val.extend(values);
        self
    }

    pub fn with_string_values<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.tensor.dtype = DataType::DtString;
        self.tensor.string_val.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> TensorProto {
        self.tensor
    }
}

/// Fluent builder for a [`PredictRequest`].
///
/// Adding an input under a name that already exists replaces the earlier tensor.
#[derive(Debug, Default)]
pub struct PredictRequestBuilder {
    request: PredictRequest,
}

impl PredictRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.request.model_spec.name = name.into();
        self
    }

    pub fn with_model_version_label(mut self, label: impl Into<String>) -> Self {
        self.request.model_spec.version_label = Some(label.into());
        self
    }

    /// Configure a new input through a [`TensorBuilder`] and add it under `name`.
    pub fn add_input<F>(self, name: impl Into<String>, configure: F) -> Self
    where
        F: FnOnce(TensorBuilder) -> TensorBuilder,
    {
        let tensor = configure(TensorBuilder::new()).build();
        self.add_tensor(name, tensor)
    }

    /// Add an already-built tensor under `name`.
    pub fn add_tensor(mut self, name: impl Into<String>, tensor: TensorProto) -> Self {
        self.request.inputs.insert(name.into(), tensor);
        self
    }

    pub fn build(self) -> PredictRequest {
        self.request
    }
}
