//! In-place replacement of dense sub-layers with binarized layers.
//!
//! [`binarizer`] walks every block of a [`BlockStack`], looks at the dense
//! sub-layers of its `mlp` and `attn` groups, and swaps each one not excluded
//! by the skip flags for a freshly initialized [`BinarizedLinear`] or
//! [`IrLinear`] with the same dimensions and an enabled bias.
//!
//! Pretrained weights are not carried over. Copy them explicitly with
//! `set_weight` / `set_bias` after surgery if needed.

mod model;

pub use model::{
    BlockStack, GroupKind, ModuleGroup, SubLayer, SubLayerKind, TransformerBlock,
    TransformerModel,
};

use candle_core::Device;

use crate::config::{BinarizeConfig, BinarizeKind};
use crate::error::Result;
use crate::layer::{BinarizedLinear, IrLinear};

/// Replace dense sub-layers of `model` with binarized layers.
///
/// # Arguments
///
/// * `model` - Model to binarize in place
/// * `binarize_layer` - `"basic"` (sign) or `"ir"` (scaled tanh)
/// * `qk_only` - Skip `c_attn_v`
/// * `qv_only` - Skip `c_attn_k`
/// * `kv_only` - Skip `c_attn_q`
///
/// # Errors
///
/// Returns `Configuration` for an unknown `binarize_layer`; the model is left
/// untouched in that case.
pub fn binarizer<M: BlockStack + ?Sized>(
    model: &mut M,
    binarize_layer: &str,
    qk_only: bool,
    qv_only: bool,
    kv_only: bool,
) -> Result<()> {
    let kind: BinarizeKind = binarize_layer.parse()?;
    let config = BinarizeConfig::new(kind)
        .with_qk_only(qk_only)
        .with_qv_only(qv_only)
        .with_kv_only(kv_only);
    binarize_with_config(model, &config)
}

/// A planned replacement: where it goes and what replaces it.
struct Replacement {
    block: usize,
    group: GroupKind,
    name: String,
    layer: SubLayer,
}

/// Replace dense sub-layers of `model` according to `config`.
///
/// All replacement layers are built before the model is touched, so an error
/// leaves the model unchanged.
///
/// # Errors
///
/// Returns error if a replacement layer cannot be created.
pub fn binarize_with_config<M: BlockStack + ?Sized>(
    model: &mut M,
    config: &BinarizeConfig,
) -> Result<()> {
    let mut plan = Vec::new();
    let mut skipped = 0usize;

    for (index, block) in model.blocks().iter().enumerate() {
        for group in GroupKind::ALL {
            for (name, sub_layer) in block.group(group).iter() {
                let SubLayer::Linear(linear) = sub_layer else {
                    continue;
                };

                if config.should_skip(name) {
                    tracing::debug!(block = index, %group, name, "skipping sub-layer");
                    skipped += 1;
                    continue;
                }

                let (out_features, in_features) = linear.weight().dims2()?;
                let device = linear.weight().device();
                let layer = build_layer(config.kind, in_features, out_features, device)?;

                tracing::debug!(
                    block = index,
                    %group,
                    name,
                    in_features,
                    out_features,
                    kind = %config.kind,
                    "replacing dense sub-layer"
                );
                plan.push(Replacement {
                    block: index,
                    group,
                    name: name.to_string(),
                    layer,
                });
            }
        }
    }

    let replaced = plan.len();
    let blocks = model.blocks_mut();
    for Replacement {
        block,
        group,
        name,
        layer,
    } in plan
    {
        blocks[block].group_mut(group).replace(&name, layer)?;
    }

    if replaced == 0 {
        tracing::warn!(kind = %config.kind, skipped, "no dense sub-layers were binarized");
    } else {
        tracing::info!(kind = %config.kind, replaced, skipped, "binarized dense sub-layers");
    }
    Ok(())
}

fn build_layer(
    kind: BinarizeKind,
    in_features: usize,
    out_features: usize,
    device: &Device,
) -> Result<SubLayer> {
    Ok(match kind {
        BinarizeKind::Basic => {
            SubLayer::Binarized(BinarizedLinear::new(in_features, out_features, true, device)?)
        }
        BinarizeKind::Ir => SubLayer::Ir(IrLinear::new(in_features, out_features, true, device)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Tensor, TensorId};
    use candle_nn::{Linear, Module};

    use crate::error::BinarizeError;

    const ATTN_NAMES: [&str; 3] = ["c_attn_q", "c_attn_k", "c_attn_v"];

    /// A module that happens to hold a dense layer.
    struct Wrapped(Linear);

    impl Module for Wrapped {
        fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
            self.0.forward(xs)
        }
    }

    fn dense(in_features: usize, out_features: usize) -> Linear {
        let device = Device::Cpu;
        let weight =
            Tensor::randn(0.0f32, 1.0, (out_features, in_features), &device).unwrap();
        Linear::new(weight, None)
    }

    fn group() -> ModuleGroup {
        ModuleGroup::new()
            .with_layer("c_attn_q", SubLayer::Linear(dense(16, 16)))
            .with_layer("c_attn_k", SubLayer::Linear(dense(16, 8)))
            .with_layer("c_attn_v", SubLayer::Linear(dense(16, 4)))
            .with_layer("c_wrapped", SubLayer::Other(Box::new(Wrapped(dense(16, 16)))))
    }

    fn synthetic_model() -> TransformerModel {
        TransformerModel::new(vec![
            TransformerBlock::new(group(), group()),
            TransformerBlock::new(group(), group()),
        ])
    }

    fn weight_id(
        model: &TransformerModel,
        block: usize,
        group: GroupKind,
        name: &str,
    ) -> TensorId {
        model.blocks()[block]
            .group(group)
            .get(name)
            .and_then(SubLayer::as_linear)
            .unwrap()
            .weight()
            .id()
    }

    #[test]
    fn test_basic_replaces_every_dense_layer() {
        let mut model = synthetic_model();
        binarizer(&mut model, "basic", false, false, false).unwrap();

        for block in model.blocks() {
            for group in GroupKind::ALL {
                for name in ATTN_NAMES {
                    let layer = block.group(group).get(name).unwrap();
                    assert_eq!(layer.kind(), SubLayerKind::Binarized);
                }
                // Wrappers are not dense layers
                let wrapped = block.group(group).get("c_wrapped").unwrap();
                assert_eq!(wrapped.kind(), SubLayerKind::Other);
            }
        }
    }

    #[test]
    fn test_kv_only_keeps_query_layer() {
        let mut model = synthetic_model();
        let before: Vec<TensorId> = (0..2)
            .flat_map(|b| GroupKind::ALL.map(|g| (b, g)))
            .map(|(b, g)| weight_id(&model, b, g, "c_attn_q"))
            .collect();

        binarizer(&mut model, "ir", false, false, true).unwrap();

        let after: Vec<TensorId> = (0..2)
            .flat_map(|b| GroupKind::ALL.map(|g| (b, g)))
            .map(|(b, g)| weight_id(&model, b, g, "c_attn_q"))
            .collect();
        assert_eq!(before, after);

        for block in model.blocks() {
            for group in GroupKind::ALL {
                let group = block.group(group);
                assert_eq!(group.get("c_attn_k").unwrap().kind(), SubLayerKind::Ir);
                assert_eq!(group.get("c_attn_v").unwrap().kind(), SubLayerKind::Ir);
            }
        }
    }

    #[test]
    fn test_skip_flags_are_literal() {
        let mut model = synthetic_model();
        binarizer(&mut model, "basic", true, true, false).unwrap();

        let attn = model.blocks()[1].attn();
        assert_eq!(attn.get("c_attn_q").unwrap().kind(), SubLayerKind::Binarized);
        assert_eq!(attn.get("c_attn_k").unwrap().kind(), SubLayerKind::Linear);
        assert_eq!(attn.get("c_attn_v").unwrap().kind(), SubLayerKind::Linear);
    }

    #[test]
    fn test_dimensions_and_bias() {
        let mut model = synthetic_model();
        binarizer(&mut model, "basic", false, false, false).unwrap();

        let mlp = model.blocks()[0].mlp();
        assert_eq!(mlp.get("c_attn_q").unwrap().features(), Some((16, 16)));
        assert_eq!(mlp.get("c_attn_k").unwrap().features(), Some((16, 8)));
        assert_eq!(mlp.get("c_attn_v").unwrap().features(), Some((16, 4)));

        let layer = model.blocks_mut()[0]
            .group_mut(GroupKind::Mlp)
            .get_mut("c_attn_v")
            .and_then(SubLayer::as_binarized_mut)
            .unwrap();
        // The dense layer had no bias; replacements always have one
        let bias: Vec<f32> = layer.bias().unwrap().to_vec1().unwrap();
        assert_eq!(bias, vec![0.0; 4]);
    }

    #[test]
    fn test_order_is_preserved() {
        let mut model = synthetic_model();
        binarizer(&mut model, "ir", false, false, false).unwrap();

        let names: Vec<&str> = model.blocks()[0].attn().names().collect();
        assert_eq!(names, vec!["c_attn_q", "c_attn_k", "c_attn_v", "c_wrapped"]);
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let mut model = synthetic_model();
        let before = weight_id(&model, 0, GroupKind::Mlp, "c_attn_k");

        let err = binarizer(&mut model, "xnor", false, false, false).unwrap_err();
        assert!(matches!(err, BinarizeError::Configuration(_)));
        assert_eq!(weight_id(&model, 0, GroupKind::Mlp, "c_attn_k"), before);
    }

    #[test]
    fn test_already_binarized_layers_untouched() {
        let mut model = synthetic_model();
        binarizer(&mut model, "basic", false, false, false).unwrap();
        binarizer(&mut model, "ir", false, false, false).unwrap();

        let layer = model.blocks()[0].mlp().get("c_attn_q").unwrap();
        assert_eq!(layer.kind(), SubLayerKind::Binarized);
    }
}
