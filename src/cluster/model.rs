//! 模型参数
//!
//! 层数、每层参数字节数，以及 token / activation 在网络上的大小。

use std::fs;
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};

/// 每层参数大小：统一值或逐层列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LayerParams {
    Uniform(f64),
    PerLayer(Vec<f64>),
}

/// 模型描述文件（JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub num_layers: usize,
    pub hidden_size: u64,
    /// 每个元素的字节数（fp16 = 2）
    pub dtype_bytes: u64,
    pub layer_param_bytes: LayerParams,
    /// 源/汇链路上传输的 token 大小；缺省时与 activation 同宽
    #[serde(default)]
    pub token_size: Option<f64>,
}

/// 校验后的模型参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProfile {
    pub name: String,
    pub num_layers: usize,
    pub layer_param_bytes: Vec<f64>,
    pub token_size: f64,
    pub activation_size: f64,
}

impl ModelProfile {
    pub fn from_spec(spec: ModelSpec) -> Result<Self> {
        if spec.num_layers == 0 {
            return Err(LayoutError::InvalidOptions(format!(
                "model {} must have at least one layer",
                spec.name
            )));
        }
        if spec.hidden_size == 0 || spec.dtype_bytes == 0 {
            return Err(LayoutError::InvalidOptions(format!(
                "model {} has a zero hidden size or element width",
                spec.name
            )));
        }

        let layer_param_bytes = match spec.layer_param_bytes {
            LayerParams::Uniform(bytes) => vec![bytes; spec.num_layers],
            LayerParams::PerLayer(list) => list,
        };
        if layer_param_bytes.len() != spec.num_layers {
            return Err(LayoutError::InvalidOptions(format!(
                "model {} declares {} layers but lists {} parameter sizes",
                spec.name,
                spec.num_layers,
                layer_param_bytes.len()
            )));
        }
        if layer_param_bytes.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(LayoutError::InvalidOptions(format!(
                "model {} has a negative or non-finite layer size",
                spec.name
            )));
        }

        let activation_size = (spec.hidden_size * spec.dtype_bytes) as f64;
        let token_size = spec.token_size.unwrap_or(activation_size);
        if token_size <= 0.0 {
            return Err(LayoutError::InvalidOptions(format!(
                "model {} has a non-positive token size",
                spec.name
            )));
        }

        Ok(Self {
            name: spec.name,
            num_layers: spec.num_layers,
            layer_param_bytes,
            token_size,
            activation_size,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let spec: ModelSpec = serde_json::from_str(&raw).map_err(|source| LayoutError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_spec(spec)
    }

    /// LLaMA-2 70B，fp16
    pub fn llama_70b() -> Self {
        let hidden_size = 8192u64;
        let activation_size = (hidden_size * 2) as f64;
        Self {
            name: "LLaMa70B".to_string(),
            num_layers: 80,
            layer_param_bytes: vec![1_711_276_032.0; 80],
            token_size: activation_size,
            activation_size,
        }
    }

    /// 最大单层参数字节数
    pub fn max_layer_bytes(&self) -> f64 {
        self.layer_param_bytes.iter().copied().fold(0.0, f64::max)
    }

    /// 给定层区间的参数总字节数
    pub fn range_bytes(&self, layers: Range<usize>) -> f64 {
        let end = layers.end.min(self.num_layers);
        let start = layers.start.min(end);
        self.layer_param_bytes[start..end].iter().sum()
    }
}
