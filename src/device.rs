//! Device selection and claiming
//!
//! A run picks CUDA only when it is requested and a GPU is visible, and
//! otherwise stays on the CPU. It must then prove it can allocate on that
//! device before the model is loaded or any output exists. Backends report
//! failure either as an error or by panicking inside the driver, so both are
//! turned into `ResourceError::Unavailable`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{bail, Result};
use thiserror::Error;

use boostr::{CpuDevice, CpuRuntime, Tensor};

/// Device could not be claimed
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("device {device} is unavailable: {reason}")]
    Unavailable { device: String, reason: String },
}

/// Device a run will claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTarget {
    Cpu,
    Cuda(usize),
}

/// Choose the device for a run.
///
/// `visible_gpus` is the number of CUDA devices the driver reports. With none
/// visible a CUDA request falls back to the CPU; with any visible the
/// configured ordinal is used and a failed claim stays fatal.
pub fn select_device(wants_cuda: bool, device_id: usize, visible_gpus: usize) -> DeviceTarget {
    if !wants_cuda {
        return DeviceTarget::Cpu;
    }
    if visible_gpus == 0 {
        tracing::warn!("No CUDA device available, running on CPU");
        return DeviceTarget::Cpu;
    }
    DeviceTarget::Cuda(device_id)
}

/// Number of CUDA devices the driver reports; 0 when there is no driver
#[cfg(feature = "cuda")]
pub fn cuda_device_count() -> usize {
    use cudarc::driver::result;

    let count = panic::catch_unwind(|| {
        result::init()?;
        result::device::get_count()
    });
    match count {
        Ok(Ok(n)) => n.max(0) as usize,
        Ok(Err(e)) => {
            tracing::debug!("CUDA driver unavailable: {}", e);
            0
        }
        Err(payload) => {
            tracing::debug!("CUDA driver unavailable: {}", panic_message(payload.as_ref()));
            0
        }
    }
}

/// Builds without CUDA support never see a GPU
#[cfg(not(feature = "cuda"))]
pub fn cuda_device_count() -> usize {
    0
}

/// A device that passed its allocation probe. Held for the whole run.
#[derive(Debug)]
pub struct DeviceClaim<D> {
    label: String,
    device: D,
}

impl<D> DeviceClaim<D> {
    /// Human-readable device name, e.g. `cpu` or `cuda:0`
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }
}

/// Run `probe` and wrap its device in a claim.
///
/// Errors and panics raised by the probe both become `Unavailable`.
pub fn claim_device<D, F>(label: &str, probe: F) -> Result<DeviceClaim<D>, ResourceError>
where
    F: FnOnce() -> Result<D>,
{
    tracing::debug!("Probing device {}", label);

    let outcome = panic::catch_unwind(AssertUnwindSafe(probe));
    let reason = match outcome {
        Ok(Ok(device)) => {
            tracing::info!("Claimed device {}", label);
            return Ok(DeviceClaim {
                label: label.to_string(),
                device,
            });
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(payload) => panic_message(payload.as_ref()),
    };

    tracing::error!("Device {} unavailable: {}", label, reason);
    Err(ResourceError::Unavailable {
        device: label.to_string(),
        reason,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "backend panicked".to_string()
    }
}

/// Claim the host CPU
pub fn claim_cpu() -> Result<DeviceClaim<CpuDevice>, ResourceError> {
    claim_device("cpu", || {
        let device = CpuDevice::new();
        let probe = Tensor::<CpuRuntime>::from_slice(&[1u32], &[1], &device);
        let readback: Vec<u32> = probe.to_vec();
        if readback != [1] {
            bail!("probe tensor read back as {:?}", readback);
        }
        Ok(device)
    })
}

/// Claim a CUDA device by ordinal
#[cfg(feature = "cuda")]
pub fn claim_cuda(device_id: usize) -> Result<DeviceClaim<boostr::CudaDevice>, ResourceError> {
    use boostr::{CudaDevice, CudaRuntime};

    claim_device(&format!("cuda:{}", device_id), || {
        let device = CudaDevice::new(device_id);
        let probe = Tensor::<CudaRuntime>::from_slice(&[1u32], &[1], &device);
        let readback: Vec<u32> = probe.to_vec();
        if readback != [1] {
            bail!("probe tensor read back as {:?}", readback);
        }
        Ok(device)
    })
}
