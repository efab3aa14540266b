//! # Compute Device Selection
//!
//! Picks the candle device the local speech recognizer runs on. GPU backends are tried
//! first and the server always falls back to the CPU.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Best device found by auto-detection, probed once per process.
static DETECTED_DEVICE: OnceLock<Device> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    /// Falls back to the CPU when no CUDA device is present.
    Cuda,
    /// Falls back to the CPU when Metal is unavailable.
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" | "" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

impl DevicePreference {
    /// Parse a config value, treating anything unknown as `Auto`.
    pub fn from_config(value: &str) -> Self {
        value.parse().unwrap_or_else(|err| {
            warn!("{}, using auto", err);
            DevicePreference::Auto
        })
    }
}

/// Resolve a preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => DETECTED_DEVICE.get_or_init(detect_best_device).clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
    }
}

fn detect_best_device() -> Device {
    if let Some(device) = cuda_device() {
        info!("Selected CUDA GPU for speech recognition");
        return device;
    }
    if let Some(device) = metal_device() {
        info!("Selected Metal GPU for speech recognition");
        return device;
    }
    info!("Using CPU for speech recognition (no GPU acceleration available)");
    Device::Cpu
}

fn cuda_device() -> Option<Device> {
    Device::new_cuda(0)
        .map_err(|e| debug!("CUDA not available: {}", e))
        .ok()
}

fn metal_device() -> Option<Device> {
    Device::new_metal(0)
        .map_err(|e| debug!("Metal not available: {}", e))
        .ok()
}

/// Short label for logs and health output.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert_eq!(DevicePreference::from_config("tpu"), DevicePreference::Auto);
    }

    #[test]
    fn test_cpu_preference_is_honoured() {
        let device = select_device(DevicePreference::Cpu);
        assert_eq!(device_label(&device), "cpu");
    }
}
