/// Compute device selection for the embedding model.
use std::fmt;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::Serialize;
use tracing::{debug, warn};

/// The device an embedding model actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a user device choice (`auto`, `cpu`, `cuda`) against the host.
///
/// `cpu` is always honoured. `cuda`, `auto` and anything unrecognized pick CUDA
/// when the ONNX Runtime CUDA execution provider is usable, otherwise CPU.
pub fn resolve_device(choice: &str) -> Device {
    if choice.trim().eq_ignore_ascii_case("cpu") {
        return Device::Cpu;
    }
    resolve_device_with(choice, cuda_available())
}

/// [`resolve_device`] with the accelerator check supplied by the caller.
pub fn resolve_device_with(choice: &str, cuda_available: bool) -> Device {
    match choice.trim().to_lowercase().as_str() {
        "cpu" => Device::Cpu,
        _ if cuda_available => Device::Cuda,
        "cuda" => {
            warn!("CUDA requested but not available, falling back to CPU");
            Device::Cpu
        }
        _ => Device::Cpu,
    }
}

/// Whether ONNX Runtime can register the CUDA execution provider on this host.
pub fn cuda_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            debug!("CUDA check failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_cpu() {
        assert_eq!(resolve_device_with("cpu", true), Device::Cpu);
        assert_eq!(resolve_device_with(" CPU ", false), Device::Cpu);
        assert_eq!(resolve_device("cpu"), Device::Cpu);
    }

    #[test]
    fn test_cuda_falls_back() {
        assert_eq!(resolve_device_with("cuda", true), Device::Cuda);
        assert_eq!(resolve_device_with("cuda", false), Device::Cpu);
    }

    #[test]
    fn test_auto_and_unrecognized_detect() {
        assert_eq!(resolve_device_with("auto", true), Device::Cuda);
        assert_eq!(resolve_device_with("auto", false), Device::Cpu);
        assert_eq!(resolve_device_with("tpu", true), Device::Cuda);
        assert_eq!(resolve_device_with("", false), Device::Cpu);
    }

    #[test]
    fn test_display() {
        assert_eq!(Device::Cuda.to_string(), "cuda");
        assert_eq!(Device::Cpu.as_str(), "cpu");
    }
}
