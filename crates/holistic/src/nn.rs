//! Neural Network inference.
//!
//! Networks are loaded from ONNX files and run on the CPU with `tract`. Tensors are exchanged as
//! [`ndarray`] arrays.

use std::{
    ops::{Index, RangeInclusive},
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, Tensor, TypedFact, TypedOp,
};

use crate::image::{Color, ImageView, Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional neural network (CNN) that operates on image data.
///
/// Like the underlying [`NeuralNetwork`], this is a cheaply [`Clone`]able handle to the underlying
/// data.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    input_res: Resolution,
    shape: CnnInputShape,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input with a shape that matches the given
    /// [`CnnInputShape`].
    pub fn new(
        nn: NeuralNetwork,
        shape: CnnInputShape,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let input_res = Self::get_input_res(&nn, shape)?;

        Ok(Self {
            nn,
            input_res,
            shape,
            color_mapper,
        })
    }

    fn get_input_res(nn: &NeuralNetwork, shape: CnnInputShape) -> anyhow::Result<Resolution> {
        if nn.num_inputs() != 1 {
            anyhow::bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }

        let tensor_shape = nn.input_shape(0)?;
        let (w, h) = match (shape, &*tensor_shape) {
            (CnnInputShape::NCHW, [1, 3, h, w]) | (CnnInputShape::NHWC, [1, h, w, 3]) => (*w, *h),
            _ => {
                anyhow::bail!(
                    "invalid model input shape for {:?} CNN: {:?}",
                    shape,
                    tensor_shape,
                );
            }
        };

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok(Resolution::new(w, h))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on an input image, returning the estimated outputs.
    ///
    /// The input image will be sampled to create the network's input tensor. If the image's aspect
    /// ratio does not match the network's input aspect ratio, the image will be stretched.
    pub fn estimate(&self, image: &ImageView<'_>) -> anyhow::Result<Outputs> {
        let tensor = self.image_to_tensor(image);
        self.nn.estimate(&Inputs::from(tensor))
    }

    fn image_to_tensor(&self, view: &ImageView<'_>) -> ArrayD<f32> {
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );
        let (sx, sy) = (view.width() / w as f32, view.height() / h as f32);
        let sample = |x: usize, y: usize| {
            let color = view.sample((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy);
            self.color_mapper.map(color)
        };

        match self.shape {
            CnnInputShape::NCHW => {
                ArrayD::from_shape_fn(IxDyn(&[1, 3, h, w]), |idx| sample(idx[3], idx[2])[idx[1]])
            }
            CnnInputShape::NHWC => {
                ArrayD::from_shape_fn(IxDyn(&[1, h, w, 3]), |idx| sample(idx[2], idx[1])[idx[3]])
            }
        }
    }
}

/// Maps sRGB colors to the value range a network expects.
#[derive(Debug, Clone, Copy)]
pub struct ColorMapper {
    start: f32,
    end: f32,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        let start = *target_range.start();
        let end = *target_range.end();
        assert!(end > start);

        Self { start, end }
    }

    fn map(&self, color: Color) -> [f32; 3] {
        let adjust_range = (self.end - self.start) / 255.0;
        let rgb = [color.r(), color.g(), color.b()];
        rgb.map(|col| col as f32 * adjust_range + self.start)
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, often fixed at 1.
/// - `C` is the number of color channels, often 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

/// Neural network loader.
pub struct Loader {
    model_data: Vec<u8>,
    outputs: Option<Vec<usize>>,
}

impl Loader {
    /// Only compute the specified outputs during inference.
    ///
    /// This takes a list of network output indices. When called, the [`Outputs`] returned from
    /// [`NeuralNetwork::estimate`] will only contain the chosen output tensors, in the given order.
    pub fn with_output_selection<O>(mut self, outputs: O) -> Self
    where
        O: Into<Vec<usize>>,
    {
        self.outputs = Some(outputs.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*self.model_data)?
            .into_optimized()?;
        let outputs = graph.output_outlets()?;
        let selected_outputs = match self.outputs {
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    outputs.get(i).copied().with_context(|| {
                        format!("network has no output #{i} ({} outputs)", outputs.len())
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => outputs.to_vec(),
        };
        let model = SimplePlan::new_for_outputs(graph, &selected_outputs)?;

        Ok(NeuralNetwork(Arc::new(model)))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Model>);

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Loader> {
        let path = path.as_ref();
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data =
            std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        Ok(Self::from_onnx(model_data))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: impl Into<Vec<u8>>) -> Loader {
        Loader {
            model_data: raw.into(),
            outputs: None,
        }
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.model().inputs.len()
    }

    /// Returns the concrete tensor shape of input `index`.
    pub fn input_shape(&self, index: usize) -> anyhow::Result<TVec<usize>> {
        let fact = self.0.model().input_fact(index)?;
        let shape = fact
            .shape
            .as_concrete()
            .with_context(|| format!("network input #{index} has a symbolic shape"))?;
        Ok(shape.iter().copied().collect())
    }

    /// Runs the network on a set of [`Inputs`], returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let inputs = inputs
            .inner
            .iter()
            .map(|array| {
                let data = array.as_standard_layout();
                let slice = data.as_slice().context("non-contiguous input tensor")?;
                let tensor = Tensor::from_shape(array.shape(), slice)?;
                Ok(TValue::from_const(Arc::new(tensor)))
            })
            .collect::<anyhow::Result<TVec<_>>>()?;

        let outputs = self.0.run(inputs)?;
        outputs
            .iter()
            .map(|tensor| {
                let data = tensor.as_slice::<f32>()?.to_vec();
                Ok(ArrayD::from_shape_vec(IxDyn(tensor.shape()), data)?)
            })
            .collect()
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: Vec<ArrayD<f32>>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns output `index`, checking that it has the `expected` shape.
    pub fn get(&self, index: usize, expected: &[usize]) -> anyhow::Result<ArrayViewD<'_, f32>> {
        let tensor = self
            .inner
            .get(index)
            .with_context(|| format!("missing network output #{index}"))?;
        if tensor.shape() != expected {
            anyhow::bail!(
                "network output #{index} has shape {:?}, expected {:?}",
                tensor.shape(),
                expected,
            );
        }
        Ok(tensor.view())
    }

    /// Returns the values of output `index` in logical order, checking that there are `len` of
    /// them.
    ///
    /// Unlike [`Outputs::get`], this ignores the tensor shape, which can differ between ONNX
    /// conversions of the same network.
    pub fn flat(&self, index: usize, len: usize) -> anyhow::Result<Vec<f32>> {
        let tensor = self
            .inner
            .get(index)
            .with_context(|| format!("missing network output #{index}"))?;
        if tensor.len() != len {
            anyhow::bail!(
                "network output #{index} has {} values (shape {:?}), expected {len}",
                tensor.len(),
                tensor.shape(),
            );
        }
        Ok(tensor.iter().copied().collect())
    }

    /// Returns the single value of output `index`.
    pub fn scalar(&self, index: usize) -> anyhow::Result<f32> {
        Ok(self.flat(index, 1)?[0])
    }

    /// Returns an iterator over the output tensors.
    pub fn iter(&self) -> impl Iterator<Item = &ArrayD<f32>> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = ArrayD<f32>;

    fn index(&self, index: usize) -> &ArrayD<f32> {
        &self.inner[index]
    }
}

impl FromIterator<ArrayD<f32>> for Outputs {
    fn from_iter<T: IntoIterator<Item = ArrayD<f32>>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// List of input tensors for neural network inference.
#[derive(Debug)]
pub struct Inputs {
    inner: Vec<ArrayD<f32>>,
}

impl Inputs {
    /// Returns the number of input tensors stored in `self`.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<ArrayD<f32>> for Inputs {
    fn from(t: ArrayD<f32>) -> Self {
        Self { inner: vec![t] }
    }
}

impl FromIterator<ArrayD<f32>> for Inputs {
    fn from_iter<T: IntoIterator<Item = ArrayD<f32>>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
