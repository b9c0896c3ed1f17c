use candle_core::Device;
use tracing::info;

/// Pick the compute device for every model in the process.
///
/// Accelerators are only probed when the crate is built with the matching
/// feature; any probe failure falls back to the CPU.
pub fn select_device(force_cpu: bool, ordinal: usize) -> Device {
    if force_cpu {
        info!("CPU forced by configuration");
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(ordinal) {
                Ok(device) => {
                    info!("Using CUDA device {}", ordinal);
                    return device;
                }
                Err(e) => {
                    tracing::warn!("CUDA not available: {}, falling back to CPU", e);
                }
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if candle_core::utils::metal_is_available() {
            match Device::new_metal(ordinal) {
                Ok(device) => {
                    info!("Using Metal device {}", ordinal);
                    return device;
                }
                Err(e) => {
                    tracing::warn!("Metal not available: {}, falling back to CPU", e);
                }
            }
        }
    }

    let _ = ordinal;
    info!("Using CPU device");
    Device::Cpu
}

pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_cpu_is_stable() {
        let first = select_device(true, 0);
        let second = select_device(true, 3);
        assert!(first.is_cpu());
        assert!(second.is_cpu());
        assert_eq!(device_info(&first), "CPU");
    }

    #[test]
    fn default_build_falls_back_to_cpu() {
        if cfg!(any(feature = "cuda", feature = "metal")) {
            return;
        }
        assert!(select_device(false, 0).is_cpu());
    }
}
