use predbench_common::{PredictRequest, PredictRequestBuilder};
use rand::Rng;

/// Model name requests are addressed to when none is configured.
pub const DEFAULT_MODEL: &str = "model1";

/// Build a request for `model` with four single-value inputs, one per
/// numeric dtype, filled with random values.
///
/// | input  | dtype  |
/// |--------|--------|
/// | input1 | int32  |
/// | input2 | bool   |
/// | input3 | float  |
/// | input4 | double |
pub fn random_request(model: &str, rng: &mut impl Rng) -> PredictRequest {
    let int_value: i32 = rng.gen_range(0..=i32::MAX);
    let bool_value: bool = rng.gen();
    let float_value: f32 = rng.gen();
    let double_value: f64 = rng.gen();

    PredictRequestBuilder::new()
        .with_model_name(model)
        .add_input("input1", |t| t.with_dimensions([1]).with_int32_values([int_value]))
        .add_input("input2", |t| t.with_dimensions([1]).with_bool_values([bool_value]))
        .add_input("input3", |t| t.with_dimensions([1]).with_float_values([float_value]))
        .add_input("input4", |t| t.with_dimensions([1]).with_double_values([double_value]))
        .build()
}

/// A per-call request factory for the dispatcher: a fresh random request
/// for `model` on every issuance.
pub fn request_factory(model: String) -> impl Fn(usize) -> PredictRequest + Send + Sync + 'static {
    move |_| random_request(&model, &mut rand::thread_rng())
}
