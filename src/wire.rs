//! Wire types for the batched write RPC
//!
//! Hand-written `prost` messages for the request bodies the uploader builds.
//! The byte-budget accounting depends on `Message::encoded_len()` returning
//! the exact serialized size of these types, so every field carries its wire
//! tag explicitly.

use std::collections::HashMap;

use prost::Message;

/// Value type of a time series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValueType {
    /// Not set; rejected by the server.
    Unspecified = 0,
    /// Scalar points.
    Scalar = 1,
    /// Tensor points.
    Tensor = 2,
    /// Blob-sequence points.
    BlobSequence = 3,
}

/// Element type of a tensor payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TensorDtype {
    /// Not set.
    Unspecified = 0,
    /// 32-bit float.
    Float = 1,
    /// 64-bit float.
    Double = 2,
    /// Opaque byte strings (blob sequences ride on this).
    String = 7,
    /// 64-bit integer.
    Int64 = 9,
}

/// A scalar payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Scalar {
    /// The point's value.
    #[prost(double, tag = "1")]
    pub value: f64,
}

/// A tensor payload.
///
/// Scalars produced by training frameworks commonly arrive as rank-0 tensors;
/// blob sequences arrive as rank-1 `String` tensors whose `string_val`
/// entries are the blobs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorProto {
    /// Element type.
    #[prost(enumeration = "TensorDtype", tag = "1")]
    pub dtype: i32,
    /// Shape: one entry per dimension.
    #[prost(int64, repeated, tag = "2")]
    pub dim: Vec<i64>,
    /// Packed element bytes, little-endian.
    #[prost(bytes = "vec", tag = "3")]
    pub tensor_content: Vec<u8>,
    /// Float elements, when not packed in `tensor_content`.
    #[prost(float, repeated, tag = "4")]
    pub float_val: Vec<f32>,
    /// Double elements, when not packed in `tensor_content`.
    #[prost(double, repeated, tag = "5")]
    pub double_val: Vec<f64>,
    /// Byte-string elements (one per blob for blob sequences).
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub string_val: Vec<Vec<u8>>,
}

impl TensorProto {
    /// Rank-0 double tensor holding one value.
    #[must_use]
    pub fn from_scalar(value: f64) -> Self {
        Self {
            dtype: TensorDtype::Double as i32,
            double_val: vec![value],
            ..Self::default()
        }
    }

    /// Rank-1 string tensor whose entries are blobs.
    #[must_use]
    pub fn from_blobs(blobs: Vec<Vec<u8>>) -> Self {
        Self {
            dtype: TensorDtype::String as i32,
            dim: vec![blobs.len() as i64],
            string_val: blobs,
            ..Self::default()
        }
    }

    /// Extract a single scalar value, if this tensor holds one.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        if let Some(v) = self.double_val.first() {
            return Some(*v);
        }
        if let Some(v) = self.float_val.first() {
            return Some(f64::from(*v));
        }
        match (TensorDtype::try_from(self.dtype), self.tensor_content.len()) {
            (Ok(TensorDtype::Double), 8) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&self.tensor_content);
                Some(f64::from_le_bytes(buf))
            }
            (Ok(TensorDtype::Float), 4) => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&self.tensor_content);
                Some(f64::from(f32::from_le_bytes(buf)))
            }
            _ => None,
        }
    }

    /// Number of dimensions in the shape.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dim.len()
    }

    /// Decode a serialized tensor.
    ///
    /// # Errors
    ///
    /// Returns a decode error when the bytes are not a valid tensor proto.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}

/// An ordered list of blob ids, the payload of one blob-sequence point.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobSequence {
    /// Ids assigned by the blob store, in upload order.
    #[prost(string, repeated, tag = "1")]
    pub blob_ids: Vec<String>,
}

/// One `(step, wall_time, payload)` point under a time series.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeriesDataPoint {
    /// Training step.
    #[prost(int64, tag = "1")]
    pub step: i64,
    /// Seconds since the epoch.
    #[prost(double, tag = "2")]
    pub wall_time: f64,
    /// Scalar payload.
    #[prost(message, optional, tag = "3")]
    pub scalar: Option<Scalar>,
    /// Tensor payload.
    #[prost(message, optional, tag = "4")]
    pub tensor: Option<TensorProto>,
    /// Blob-sequence payload.
    #[prost(message, optional, tag = "5")]
    pub blobs: Option<BlobSequence>,
}

impl TimeSeriesDataPoint {
    /// A scalar point.
    #[must_use]
    pub fn scalar(step: i64, wall_time: f64, value: f64) -> Self {
        Self {
            step,
            wall_time,
            scalar: Some(Scalar { value }),
            ..Self::default()
        }
    }

    /// A tensor point.
    #[must_use]
    pub fn tensor(step: i64, wall_time: f64, tensor: TensorProto) -> Self {
        Self {
            step,
            wall_time,
            tensor: Some(tensor),
            ..Self::default()
        }
    }

    /// A blob-sequence point.
    #[must_use]
    pub fn blob_sequence(step: i64, wall_time: f64, blob_ids: Vec<String>) -> Self {
        Self {
            step,
            wall_time,
            blobs: Some(BlobSequence { blob_ids }),
            ..Self::default()
        }
    }
}

/// All new points for one time series within a write request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeriesData {
    /// Final id segment of the target time series.
    #[prost(string, tag = "1")]
    pub time_series_id: String,
    /// Value type; must match the stored series.
    #[prost(enumeration = "ValueType", tag = "2")]
    pub value_type: i32,
    /// Points in insertion order.
    #[prost(message, repeated, tag = "3")]
    pub values: Vec<TimeSeriesDataPoint>,
}

/// The batched write request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRunDataRequest {
    /// Full resource name of the target tensorboard run.
    #[prost(string, tag = "1")]
    pub tensorboard_run: String,
    /// Per-series point batches.
    #[prost(message, repeated, tag = "2")]
    pub time_series_data: Vec<TimeSeriesData>,
}

impl WriteRunDataRequest {
    /// An empty request targeting `run`.
    #[must_use]
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            tensorboard_run: run.into(),
            time_series_data: Vec::new(),
        }
    }
}

/// A computation graph, as produced by the reserved graph plugin.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphDef {
    /// Graph nodes.
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeDef>,
}

/// One node of a [`GraphDef`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeDef {
    /// Node name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Operation name.
    #[prost(string, tag = "2")]
    pub op: String,
    /// Input node names.
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    /// Opaque serialized attribute values, keyed by attribute name.
    #[prost(map = "string, bytes", tag = "5")]
    pub attr: HashMap<String, Vec<u8>>,
}
