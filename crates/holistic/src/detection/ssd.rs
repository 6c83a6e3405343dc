//! Single-Shot MultiBox Detector (SSD) anchor generation and output decoding.

use std::ops::Index;

use ndarray::Ix3;

use crate::{
    image::{Rect, Resolution},
    nn::Outputs,
    num::sigmoid,
};

use super::{Detection, Keypoint};

/// Describes one output layer of an SSD network.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo {
    boxes_per_cell: u32,
    columns: u32,
    rows: u32,
}

impl LayerInfo {
    pub const fn new(boxes_per_cell: u32, columns: u32, rows: u32) -> Self {
        Self {
            boxes_per_cell,
            columns,
            rows,
        }
    }
}

/// Anchor generation parameters.
#[derive(Debug)]
pub struct AnchorParams<'a> {
    /// Output layers of the network, in order.
    pub layers: &'a [LayerInfo],
}

/// An anchor box, with coordinates normalized to the network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
}

impl Anchor {
    #[inline]
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.y_center
    }
}

/// The list of anchors of an SSD network.
#[derive(Debug)]
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    /// Computes the anchors for all layers described by `params`.
    ///
    /// Anchors have a fixed size. Each grid cell of a layer contributes `boxes_per_cell` anchors at
    /// the cell center.
    pub fn calculate(params: &AnchorParams<'_>) -> Self {
        let mut anchors = Vec::new();
        for layer in params.layers {
            for y in 0..layer.rows {
                let y_center = (y as f32 + 0.5) / layer.rows as f32;
                for x in 0..layer.columns {
                    let x_center = (x as f32 + 0.5) / layer.columns as f32;
                    for _ in 0..layer.boxes_per_cell {
                        anchors.push(Anchor { x_center, y_center });
                    }
                }
            }
        }

        Self { anchors }
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

/// Decodes the raw box and score outputs of an SSD network.
///
/// Output 0 must hold the box parameters with shape `[1, anchors, 4 + 2 * keypoints]`, output 1 the
/// raw scores with shape `[1, anchors, 1]`. Box centers and keypoints are offsets from the anchor
/// center, measured in input pixels.
pub fn decode(
    anchors: &Anchors,
    input_res: Resolution,
    num_keypoints: usize,
    outputs: &Outputs,
    thresh: f32,
    detections: &mut Vec<Detection>,
) -> anyhow::Result<()> {
    let num_anchors = anchors.anchor_count();
    let num_params = 4 + 2 * num_keypoints;
    let boxes = outputs
        .get(0, &[1, num_anchors, num_params])?
        .into_dimensionality::<Ix3>()?;
    let scores = outputs
        .get(1, &[1, num_anchors, 1])?
        .into_dimensionality::<Ix3>()?;

    let input_w = input_res.width() as f32;
    let input_h = input_res.height() as f32;

    for index in 0..num_anchors {
        let conf = sigmoid(scores[[0, index, 0]]);
        if conf < thresh {
            continue;
        }

        let anchor = &anchors[index];
        let (ax, ay) = (anchor.x_center() * input_w, anchor.y_center() * input_h);
        let param = |i: usize| boxes[[0, index, i]];

        let rect = Rect::from_center(param(0) + ax, param(1) + ay, param(2), param(3));
        let keypoints = (0..num_keypoints)
            .map(|k| Keypoint::new(param(4 + k * 2) + ax, param(5 + k * 2) + ay))
            .collect();
        detections.push(Detection::with_keypoints(conf, rect, keypoints));
    }

    Ok(())
}
