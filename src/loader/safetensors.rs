//! SafeTensors model loading
//!
//! Single-file and sharded checkpoints are both handled by boostr's
//! `SafeTensorsLoader`. The architecture is read from `config.json`.

use anyhow::{anyhow, Result};

use boostr::format::SafeTensorsLoader;
use boostr::model::LoadedModel;
use boostr::ops::TensorOps;
use boostr::{DType, Runtime, VarBuilder, VarMap};

use super::detect::ModelSource;
use crate::model::ModelConfig;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Load SafeTensors weights described by `source`
pub fn load_safetensors<R: Runtime<DType = DType>>(
    source: &ModelSource,
    device: &R::Device,
) -> Result<(LoadedModel<R>, ModelConfig)>
where
    R::Client: TensorOps<R> + boostr::quant::DequantOps<R>,
{
    if source.config_path.is_none() {
        return Err(anyhow!(
            "SafeTensors model in {} has no config.json",
            source.dir().display()
        ));
    }
    let config = ModelConfig::from_dir(source.dir())?;

    let mut loader = SafeTensorsLoader::open(&source.weights_path)
        .map_err(|e| anyhow!("Failed to open SafeTensors: {}", e))?;

    if loader.is_sharded() {
        tracing::info!(
            "Loading sharded model with {} shards, total size: {:.2} GB",
            loader.num_shards(),
            loader.total_size() as f64 / GIB
        );
    } else {
        tracing::info!(
            "Loading single-file model, size: {:.2} GB",
            loader.total_size() as f64 / GIB
        );
    }

    let var_map = load_tensors(&mut loader, device)?;

    // The model borrows its weights for the rest of the process
    let var_map_ref: &'static mut VarMap<R> = Box::leak(Box::new(var_map));
    let mut vb = VarBuilder::new(var_map_ref, device);

    let model = LoadedModel::load(&config.model, &mut vb)
        .map_err(|e| anyhow!("Failed to load model: {}", e))?;

    Ok((model, config))
}

fn load_tensors<R: Runtime<DType = DType>>(
    loader: &mut SafeTensorsLoader,
    device: &R::Device,
) -> Result<VarMap<R>>
where
    R::Client: TensorOps<R>,
{
    let mut var_map = VarMap::<R>::new();
    let tensor_names = loader.tensor_names();
    let total = tensor_names.len();

    tracing::info!("Loading {} tensors to device...", total);

    for (idx, name) in tensor_names.into_iter().enumerate() {
        if idx % 50 == 0 {
            tracing::debug!("Loading tensor {}/{}: {}", idx + 1, total, name);
        }
        let tensor = loader
            .load_tensor::<R>(&name, device)
            .map_err(|e| anyhow!("Failed to load tensor '{}': {}", name, e))?;
        var_map.insert(name, tensor);
    }

    Ok(var_map)
}
