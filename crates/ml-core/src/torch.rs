//! TorchScript backend through `tch`.

use std::path::Path;

use anyhow::Result;
use tch::{Device, Kind, Tensor};

use crate::InferenceBackend;

/// TorchScript classifier taking an NCHW float batch of one.
pub struct TorchBackend {
    module: tch::CModule,
    device: Device,
}

impl TorchBackend {
    /// Load a TorchScript module onto `device`.
    pub fn load<P: AsRef<Path>>(model_path: P, device: Device) -> Result<Self> {
        let module = tch::CModule::load_on_device(model_path, device)?;
        Ok(Self { module, device })
    }
}

impl InferenceBackend for TorchBackend {
    fn name(&self) -> &'static str {
        "torchscript"
    }

    fn forward(&mut self, input: &[f32], side: u32) -> Result<Vec<f32>> {
        let side = side as i64;
        let tensor = Tensor::from_slice(input)
            .view([1, side, side, 3])
            .permute([0, 3, 1, 2])
            .to_device(self.device);
        let output = self.module.forward_ts(&[tensor])?;
        let flat = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .flatten(0, -1);
        Ok(Vec::<f32>::try_from(&flat)?)
    }
}
