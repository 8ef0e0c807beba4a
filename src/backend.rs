//! Backend abstraction
//!
//! Inference runs on the NdArray (CPU) backend. No autodiff wrapper: the
//! service only consumes frozen weights, so dropout layers are inert.

#[cfg(feature = "ndarray")]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(not(feature = "ndarray"))]
compile_error!("The ndarray backend feature must be enabled!");

/// Get the default device
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    <DefaultBackend as burn::tensor::backend::Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    "NdArray (CPU)"
}
