//! Residual convolutional classifiers over small images
//!
//! The stem is a single 3x3 convolution (no initial downsampling), suited to
//! 32x32 inputs; spatial resolution halves at the entry to each later stage.

use std::fmt::{self, Display};

use crate::nn::{Conv2d, FeatureMap, Linear, Module, NNError, ReLU, global_avg_pool};
use crate::values::Value;

/// Supported network depths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    D18,
    D34,
    D50,
}

impl Depth {
    /// Residual blocks per stage
    fn blocks(&self) -> [usize; 4] {
        match self {
            Depth::D18 => [2, 2, 2, 2],
            Depth::D34 | Depth::D50 => [3, 4, 6, 3],
        }
    }

    /// Depth 50 uses bottleneck blocks, the shallower variants basic blocks
    fn bottleneck(&self) -> bool {
        matches!(self, Depth::D50)
    }

    pub fn layer_count(&self) -> u32 {
        match self {
            Depth::D18 => 18,
            Depth::D34 => 34,
            Depth::D50 => 50,
        }
    }
}

impl Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.layer_count())
    }
}

/// Channel width of the first stage when none is given; later stages double it
pub const DEFAULT_BASE_WIDTH: usize = 64;

const BOTTLENECK_EXPANSION: usize = 4;

trait ResidualBlock {
    fn forward(&self, input: &FeatureMap) -> Result<FeatureMap, NNError>;
    fn parameters(&self) -> Vec<Value>;
    fn n_dead_neurons(&self) -> usize;
}

/// Two 3x3 convolutions with an identity or 1x1-projection shortcut
struct BasicBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    projection: Option<Conv2d>,
    relu1: ReLU,
    relu2: ReLU,
}

impl BasicBlock {
    fn new(in_planes: usize, planes: usize, stride: usize) -> Self {
        let projection = (stride != 1 || in_planes != planes)
            .then(|| Conv2d::new(in_planes, planes, 1, stride, 0));
        Self {
            conv1: Conv2d::new(in_planes, planes, 3, stride, 1),
            conv2: Conv2d::new(planes, planes, 3, 1, 1),
            projection,
            relu1: ReLU::new(),
            relu2: ReLU::new(),
        }
    }
}

impl ResidualBlock for BasicBlock {
    fn forward(&self, input: &FeatureMap) -> Result<FeatureMap, NNError> {
        let h = self.conv1.forward(input)?;
        let h = h.with_values(self.relu1.forward(h.values()))?;
        let h = self.conv2.forward(&h)?;
        let shortcut = match &self.projection {
            Some(projection) => projection.forward(input)?,
            None => input.clone(),
        };
        let out = h.add(&shortcut)?;
        out.with_values(self.relu2.forward(out.values()))
    }

    fn parameters(&self) -> Vec<Value> {
        let mut params = self.conv1.parameters();
        params.extend(self.conv2.parameters());
        if let Some(projection) = &self.projection {
            params.extend(projection.parameters());
        }
        params
    }

    fn n_dead_neurons(&self) -> usize {
        self.relu1.n_dead_neurons() + self.relu2.n_dead_neurons()
    }
}

/// 1x1 reduce, 3x3, 1x1 expand; the output carries four times `planes` channels
struct Bottleneck {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    projection: Option<Conv2d>,
    relu1: ReLU,
    relu2: ReLU,
    relu3: ReLU,
}

impl Bottleneck {
    fn new(in_planes: usize, planes: usize, stride: usize) -> Self {
        let out_planes = planes * BOTTLENECK_EXPANSION;
        let projection = (stride != 1 || in_planes != out_planes)
            .then(|| Conv2d::new(in_planes, out_planes, 1, stride, 0));
        Self {
            conv1: Conv2d::new(in_planes, planes, 1, 1, 0),
            conv2: Conv2d::new(planes, planes, 3, stride, 1),
            conv3: Conv2d::new(planes, out_planes, 1, 1, 0),
            projection,
            relu1: ReLU::new(),
            relu2: ReLU::new(),
            relu3: ReLU::new(),
        }
    }
}

impl ResidualBlock for Bottleneck {
    fn forward(&self, input: &FeatureMap) -> Result<FeatureMap, NNError> {
        let h = self.conv1.forward(input)?;
        let h = h.with_values(self.relu1.forward(h.values()))?;
        let h = self.conv2.forward(&h)?;
        let h = h.with_values(self.relu2.forward(h.values()))?;
        let h = self.conv3.forward(&h)?;
        let shortcut = match &self.projection {
            Some(projection) => projection.forward(input)?,
            None => input.clone(),
        };
        let out = h.add(&shortcut)?;
        out.with_values(self.relu3.forward(out.values()))
    }

    fn parameters(&self) -> Vec<Value> {
        let mut params = self.conv1.parameters();
        params.extend(self.conv2.parameters());
        params.extend(self.conv3.parameters());
        if let Some(projection) = &self.projection {
            params.extend(projection.parameters());
        }
        params
    }

    fn n_dead_neurons(&self) -> usize {
        self.relu1.n_dead_neurons() + self.relu2.n_dead_neurons() + self.relu3.n_dead_neurons()
    }
}

/// A residual network mapping an image to per-class scores
pub struct ResNet {
    depth: Depth,
    stem: Conv2d,
    stem_relu: ReLU,
    blocks: Vec<Box<dyn ResidualBlock>>,
    fc: Linear,
}

impl ResNet {
    pub fn new(depth: Depth, num_classes: usize) -> Self {
        Self::with_base_width(depth, num_classes, DEFAULT_BASE_WIDTH)
    }

    /// `base_width` scales every stage; the default matches the standard
    /// architecture, small values keep tests cheap
    pub fn with_base_width(depth: Depth, num_classes: usize, base_width: usize) -> Self {
        let expansion = if depth.bottleneck() {
            BOTTLENECK_EXPANSION
        } else {
            1
        };
        let mut blocks: Vec<Box<dyn ResidualBlock>> = Vec::new();
        let mut in_planes = base_width;
        for (stage, &n_blocks) in depth.blocks().iter().enumerate() {
            let planes = base_width << stage;
            for block in 0..n_blocks {
                let stride = if stage > 0 && block == 0 { 2 } else { 1 };
                if depth.bottleneck() {
                    blocks.push(Box::new(Bottleneck::new(in_planes, planes, stride)));
                } else {
                    blocks.push(Box::new(BasicBlock::new(in_planes, planes, stride)));
                }
                in_planes = planes * expansion;
            }
        }
        Self {
            depth,
            stem: Conv2d::new(3, base_width, 3, 1, 1),
            stem_relu: ReLU::new(),
            blocks,
            fc: Linear::new(in_planes, num_classes),
        }
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Maps one image's feature map to per-class scores
    pub fn forward(&self, input: &FeatureMap) -> Result<Vec<Value>, NNError> {
        let h = self.stem.forward(input)?;
        let mut h = h.with_values(self.stem_relu.forward(h.values()))?;
        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        let pooled = global_avg_pool(&h);
        self.fc.forward(&pooled)
    }

    /// Dead ReLU count across the network from the most recent forward pass
    pub fn n_dead_neurons(&self) -> usize {
        self.stem_relu.n_dead_neurons()
            + self
                .blocks
                .iter()
                .map(|b| b.n_dead_neurons())
                .sum::<usize>()
    }
}

impl Module for ResNet {
    fn parameters(&self) -> Vec<Value> {
        let mut params = self.stem.parameters();
        for block in &self.blocks {
            params.extend(block.parameters());
        }
        params.extend(self.fc.parameters());
        params
    }
}
