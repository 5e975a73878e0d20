//! Typed view of a transformer's replaceable sub-layers.
//!
//! A model is an ordered list of blocks; each block owns an `mlp` and an `attn`
//! group of named sub-layers. Sub-layers are replaced through
//! [`ModuleGroup::replace`], which keeps their position.

use std::fmt;

use candle_core::{Result as CandleResult, Tensor};
use candle_nn::{Linear, Module};

use crate::error::{BinarizeError, Result};
use crate::layer::{BinarizedLinear, IrLinear};

/// A sub-layer slot inside a block group.
pub enum SubLayer {
    /// Plain dense layer; the only variant surgery replaces.
    Linear(Linear),
    /// Sign-binarized layer.
    Binarized(BinarizedLinear),
    /// Scaled-tanh binarized layer.
    Ir(IrLinear),
    /// Any other module, including wrappers around dense layers.
    Other(Box<dyn Module + Send + Sync>),
}

/// Type tag of a [`SubLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubLayerKind {
    /// `SubLayer::Linear`
    Linear,
    /// `SubLayer::Binarized`
    Binarized,
    /// `SubLayer::Ir`
    Ir,
    /// `SubLayer::Other`
    Other,
}

impl SubLayer {
    /// Type tag of this sub-layer.
    #[must_use]
    pub const fn kind(&self) -> SubLayerKind {
        match self {
            Self::Linear(_) => SubLayerKind::Linear,
            Self::Binarized(_) => SubLayerKind::Binarized,
            Self::Ir(_) => SubLayerKind::Ir,
            Self::Other(_) => SubLayerKind::Other,
        }
    }

    /// `(in_features, out_features)` for linear-like sub-layers.
    #[must_use]
    pub fn features(&self) -> Option<(usize, usize)> {
        match self {
            Self::Linear(linear) => linear
                .weight()
                .dims2()
                .ok()
                .map(|(out_features, in_features)| (in_features, out_features)),
            Self::Binarized(layer) => Some((layer.in_features(), layer.out_features())),
            Self::Ir(layer) => Some((layer.in_features(), layer.out_features())),
            Self::Other(_) => None,
        }
    }

    /// Borrow the dense layer, if this is one.
    #[must_use]
    pub const fn as_linear(&self) -> Option<&Linear> {
        match self {
            Self::Linear(linear) => Some(linear),
            _ => None,
        }
    }

    /// Mutably borrow the sign-binarized layer, if this is one.
    pub fn as_binarized_mut(&mut self) -> Option<&mut BinarizedLinear> {
        match self {
            Self::Binarized(layer) => Some(layer),
            _ => None,
        }
    }

    /// Mutably borrow the scaled-tanh layer, if this is one.
    pub fn as_ir_mut(&mut self) -> Option<&mut IrLinear> {
        match self {
            Self::Ir(layer) => Some(layer),
            _ => None,
        }
    }
}

impl fmt::Debug for SubLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear(linear) => f.debug_tuple("Linear").field(linear).finish(),
            Self::Binarized(layer) => f.debug_tuple("Binarized").field(layer).finish(),
            Self::Ir(layer) => f.debug_tuple("Ir").field(layer).finish(),
            Self::Other(_) => f.debug_tuple("Other").finish_non_exhaustive(),
        }
    }
}

impl Module for SubLayer {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        match self {
            Self::Linear(linear) => linear.forward(xs),
            Self::Binarized(layer) => layer
                .infer(xs)
                .map_err(|e| candle_core::Error::Msg(e.to_string())),
            Self::Ir(layer) => layer
                .infer(xs)
                .map_err(|e| candle_core::Error::Msg(e.to_string())),
            Self::Other(module) => module.forward(xs),
        }
    }
}

/// Named sub-layer group of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Feed-forward sub-layers.
    Mlp,
    /// Attention sub-layers.
    Attn,
}

impl GroupKind {
    /// Groups in traversal order.
    pub const ALL: [Self; 2] = [Self::Mlp, Self::Attn];

    /// Group name as used in the model hierarchy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mlp => "mlp",
            Self::Attn => "attn",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, named sub-layers.
#[derive(Debug, Default)]
pub struct ModuleGroup {
    slots: Vec<(String, SubLayer)>,
}

impl ModuleGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ModuleGroup::insert`].
    #[must_use]
    pub fn with_layer(mut self, name: impl Into<String>, layer: SubLayer) -> Self {
        self.insert(name, layer);
        self
    }

    /// Insert a sub-layer, replacing any existing one with the same name in place.
    ///
    /// Returns the previous sub-layer, if any.
    pub fn insert(&mut self, name: impl Into<String>, layer: SubLayer) -> Option<SubLayer> {
        let name = name.into();
        if let Some(slot) = self.slots.iter_mut().find(|(n, _)| *n == name) {
            return Some(std::mem::replace(&mut slot.1, layer));
        }
        self.slots.push((name, layer));
        None
    }

    /// Replace an existing sub-layer, keeping its position.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no sub-layer is called `name`.
    pub fn replace(&mut self, name: &str, layer: SubLayer) -> Result<SubLayer> {
        let slot = self
            .slots
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| BinarizeError::configuration(format!("no sub-layer named '{name}'")))?;
        Ok(std::mem::replace(&mut slot.1, layer))
    }

    /// Get a sub-layer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SubLayer> {
        self.slots.iter().find(|(n, _)| n == name).map(|(_, layer)| layer)
    }

    /// Get a sub-layer by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut SubLayer> {
        self.slots
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, layer)| layer)
    }

    /// Sub-layer names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }

    /// Sub-layers with their names, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SubLayer)> {
        self.slots.iter().map(|(name, layer)| (name.as_str(), layer))
    }

    /// Mutable sub-layers with their names, in order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut SubLayer)> {
        self.slots
            .iter_mut()
            .map(|(name, layer)| (name.as_str(), layer))
    }

    /// Number of sub-layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the group has no sub-layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A transformer block exposing its `mlp` and `attn` groups.
#[derive(Debug, Default)]
pub struct TransformerBlock {
    mlp: ModuleGroup,
    attn: ModuleGroup,
}

impl TransformerBlock {
    /// Create a block from its groups.
    #[must_use]
    pub fn new(mlp: ModuleGroup, attn: ModuleGroup) -> Self {
        Self { mlp, attn }
    }

    /// Borrow a group.
    #[must_use]
    pub const fn group(&self, kind: GroupKind) -> &ModuleGroup {
        match kind {
            GroupKind::Mlp => &self.mlp,
            GroupKind::Attn => &self.attn,
        }
    }

    /// Mutably borrow a group.
    pub fn group_mut(&mut self, kind: GroupKind) -> &mut ModuleGroup {
        match kind {
            GroupKind::Mlp => &mut self.mlp,
            GroupKind::Attn => &mut self.attn,
        }
    }

    /// The feed-forward group.
    #[must_use]
    pub const fn mlp(&self) -> &ModuleGroup {
        &self.mlp
    }

    /// The attention group.
    #[must_use]
    pub const fn attn(&self) -> &ModuleGroup {
        &self.attn
    }
}

/// A model whose blocks can be binarized.
pub trait BlockStack {
    /// Blocks in order.
    fn blocks(&self) -> &[TransformerBlock];

    /// Blocks in order, mutably.
    fn blocks_mut(&mut self) -> &mut [TransformerBlock];
}

/// Minimal block container implementing [`BlockStack`].
#[derive(Debug, Default)]
pub struct TransformerModel {
    blocks: Vec<TransformerBlock>,
}

impl TransformerModel {
    /// Create a model from its blocks.
    #[must_use]
    pub fn new(blocks: Vec<TransformerBlock>) -> Self {
        Self { blocks }
    }

    /// Append a block.
    pub fn push_block(&mut self, block: TransformerBlock) {
        self.blocks.push(block);
    }

    /// Get a block by index.
    #[must_use]
    pub fn block(&self, index: usize) -> Option<&TransformerBlock> {
        self.blocks.get(index)
    }

    /// Get a block by index, mutably.
    pub fn block_mut(&mut self, index: usize) -> Option<&mut TransformerBlock> {
        self.blocks.get_mut(index)
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl BlockStack for TransformerModel {
    fn blocks(&self) -> &[TransformerBlock] {
        &self.blocks
    }

    fn blocks_mut(&mut self) -> &mut [TransformerBlock] {
        &mut self.blocks
    }
}
