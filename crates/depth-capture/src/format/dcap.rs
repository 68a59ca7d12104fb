// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Native batch container (.dcap)
//!
//! # Format Overview
//!
//! ```text
//! +---------------------------------------------------------+
//! |                    File Header (40 bytes)                |
//! |  Magic (8) | Version (4) | Flags (4) | EntryCount (4)   |
//! |  RawSize (8) | PayloadSize (8) | Reserved (4)           |
//! +---------------------------------------------------------+
//! |                    Payload (zlib)                        |
//! |  Entry[]                                                 |
//! +---------------------------------------------------------+
//! |                    CRC32 of payload (4)                  |
//! +---------------------------------------------------------+
//! ```
//!
//! # Entry Format
//!
//! ```text
//! +---------------------------------------------------------+
//! | name_len (2) | name (var) | kind (1) | dtype (1) |      |
//! | dense:  ndim (1) | dims (8 * ndim) | data              |
//! | ragged: count (4) | (ndim (1) | dims (8 * ndim))[] |    |
//! |         data (all items concatenated)                    |
//! | text:   len (4) | utf8 (var)                            |
//! +---------------------------------------------------------+
//! ```
//!
//! All integers and array elements are little-endian.

use super::{
    element_count, ArrayData, DType, Entry, FormatError, REQUIRED_ARRAYS, SPLIT_FIELD,
};
use crate::batch::{Batch, Split};
use crate::sample::{ActionLabel, DepthMap, Sample};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

/// Magic bytes: "DCAPBAT\0"
pub const MAGIC: [u8; 8] = [0x44, 0x43, 0x41, 0x50, 0x42, 0x41, 0x54, 0x00];

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Payload is zlib-compressed.
pub const FLAG_ZLIB: u32 = 0x1;

const KIND_DENSE: u8 = 0;
const KIND_RAGGED: u8 = 1;
const KIND_TEXT: u8 = 2;

/// File header (40 bytes, fixed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic bytes (8).
    pub magic: [u8; 8],
    /// Format version (4).
    pub version: u32,
    /// Flags (4).
    pub flags: u32,
    /// Number of entries in the payload (4).
    pub entry_count: u32,
    /// Uncompressed payload size (8).
    pub raw_size: u64,
    /// Stored payload size (8).
    pub payload_size: u64,
    /// Reserved (4).
    pub reserved: u32,
}

impl FileHeader {
    pub const SIZE: usize = 40;

    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags: FLAG_ZLIB,
            entry_count: 0,
            raw_size: 0,
            payload_size: 0,
            reserved: 0,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u32::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.raw_size)?;
        w.write_u64::<LittleEndian>(self.payload_size)?;
        w.write_u32::<LittleEndian>(self.reserved)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;

        if magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid batch file magic",
            ));
        }

        Ok(Self {
            magic,
            version: r.read_u32::<LittleEndian>()?,
            flags: r.read_u32::<LittleEndian>()?,
            entry_count: r.read_u32::<LittleEndian>()?,
            raw_size: r.read_u64::<LittleEndian>()?,
            payload_size: r.read_u64::<LittleEndian>()?,
            reserved: r.read_u32::<LittleEndian>()?,
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns a [`Batch`] into container bytes.
#[derive(Debug, Clone)]
pub struct BatchEncoder {
    level: u32,
    strict_shapes: bool,
}

impl BatchEncoder {
    /// Encoder with a zlib level (0-9, clamped).
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
            strict_shapes: false,
        }
    }

    /// Reject irregular depth shapes instead of storing them ragged.
    pub fn strict_shapes(mut self, strict: bool) -> Self {
        self.strict_shapes = strict;
        self
    }

    /// Encode a batch into a complete container.
    pub fn encode(&self, batch: &Batch) -> Result<Vec<u8>, FormatError> {
        let entries = self.stack(batch)?;
        self.encode_entries(&entries)
    }

    /// Stack batch columns into named entries.
    pub fn stack(&self, batch: &Batch) -> Result<Vec<(String, Entry)>, FormatError> {
        let n = batch.len();

        let depths = self.stack_depths(batch.depths())?;

        let poses = Entry::Dense {
            shape: vec![n, 6],
            data: ArrayData::F32(batch.poses().iter().flatten().copied().collect()),
        };
        let frames = Entry::Dense {
            shape: vec![n],
            data: ArrayData::I64(batch.frames().iter().map(|&f| f as i64).collect()),
        };
        let distances = Entry::Dense {
            shape: vec![n],
            data: ArrayData::F32(batch.distances().to_vec()),
        };
        let actions = Entry::Dense {
            shape: vec![n],
            data: ArrayData::U8(batch.actions().iter().map(|a| a.as_u8()).collect()),
        };
        let victim_dirs = Entry::Dense {
            shape: vec![n, 3],
            data: ArrayData::F32(batch.victim_dirs().iter().flatten().copied().collect()),
        };

        Ok(vec![
            ("depths".to_string(), depths),
            ("poses".to_string(), poses),
            ("frames".to_string(), frames),
            ("distances".to_string(), distances),
            ("actions".to_string(), actions),
            ("victim_dirs".to_string(), victim_dirs),
            (
                SPLIT_FIELD.to_string(),
                Entry::Text(batch.split().as_str().to_string()),
            ),
        ])
    }

    fn stack_depths(&self, depths: &[DepthMap]) -> Result<Entry, FormatError> {
        let data: Vec<f32> = depths.iter().flat_map(|d| d.data().iter().copied()).collect();

        let first = depths.first().map(|d| d.shape());
        let uniform = depths.iter().all(|d| Some(d.shape()) == first);

        if uniform {
            let (h, w) = first.unwrap_or((0, 0));
            return Ok(Entry::Dense {
                shape: vec![depths.len(), h as usize, w as usize],
                data: ArrayData::F32(data),
            });
        }

        let shapes: Vec<Vec<usize>> = depths
            .iter()
            .map(|d| vec![d.height() as usize, d.width() as usize])
            .collect();

        if self.strict_shapes {
            return Err(FormatError::IrregularShape {
                field: "depths",
                shapes,
            });
        }

        tracing::warn!("Could not stack depths, storing per-sample shapes instead");
        tracing::debug!("depths element shapes: {:?}", shapes);

        Ok(Entry::Ragged {
            shapes,
            data: ArrayData::F32(data),
        })
    }

    /// Serialize, compress and checksum a list of entries.
    pub fn encode_entries(&self, entries: &[(String, Entry)]) -> Result<Vec<u8>, FormatError> {
        let mut raw = Vec::new();
        for (name, entry) in entries {
            write_entry(&mut raw, name, entry)?;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(&raw)?;
        let payload = encoder.finish()?;

        let header = FileHeader {
            entry_count: entries.len() as u32,
            raw_size: raw.len() as u64,
            payload_size: payload.len() as u64,
            ..FileHeader::new()
        };

        let mut out = Vec::with_capacity(FileHeader::SIZE + payload.len() + 4);
        header.write(&mut out)?;
        out.write_all(&payload)?;
        out.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;

        Ok(out)
    }
}

impl Default for BatchEncoder {
    fn default() -> Self {
        Self::new(6)
    }
}

fn write_shape(buf: &mut Vec<u8>, shape: &[usize]) -> Result<(), FormatError> {
    if shape.len() > u8::MAX as usize {
        return Err(FormatError::InvalidFormat(format!(
            "too many dimensions: {}",
            shape.len()
        )));
    }
    buf.write_u8(shape.len() as u8)?;
    for &dim in shape {
        buf.write_u64::<LittleEndian>(dim as u64)?;
    }
    Ok(())
}

fn write_data(buf: &mut Vec<u8>, data: &ArrayData) -> Result<(), FormatError> {
    match data {
        ArrayData::F32(values) => {
            for &v in values {
                buf.write_f32::<LittleEndian>(v)?;
            }
        }
        ArrayData::I64(values) => {
            for &v in values {
                buf.write_i64::<LittleEndian>(v)?;
            }
        }
        ArrayData::U8(values) => buf.write_all(values)?,
    }
    Ok(())
}

fn write_entry(buf: &mut Vec<u8>, name: &str, entry: &Entry) -> Result<(), FormatError> {
    if name.len() > u16::MAX as usize {
        return Err(FormatError::InvalidFormat(format!(
            "entry name too long: {} bytes",
            name.len()
        )));
    }
    buf.write_u16::<LittleEndian>(name.len() as u16)?;
    buf.write_all(name.as_bytes())?;

    match entry {
        Entry::Dense { shape, data } => {
            if element_count(shape) != data.len() {
                return Err(FormatError::InvalidFormat(format!(
                    "'{}' shape {:?} does not match {} elements",
                    name,
                    shape,
                    data.len()
                )));
            }
            buf.write_u8(KIND_DENSE)?;
            buf.write_u8(data.dtype() as u8)?;
            write_shape(buf, shape)?;
            write_data(buf, data)?;
        }
        Entry::Ragged { shapes, data } => {
            let total: usize = shapes.iter().map(|s| element_count(s)).sum();
            if total != data.len() {
                return Err(FormatError::InvalidFormat(format!(
                    "'{}' item shapes cover {} elements, data has {}",
                    name,
                    total,
                    data.len()
                )));
            }
            buf.write_u8(KIND_RAGGED)?;
            buf.write_u8(data.dtype() as u8)?;
            buf.write_u32::<LittleEndian>(shapes.len() as u32)?;
            for shape in shapes {
                write_shape(buf, shape)?;
            }
            write_data(buf, data)?;
        }
        Entry::Text(text) => {
            buf.write_u8(KIND_TEXT)?;
            buf.write_u8(0)?;
            buf.write_u32::<LittleEndian>(text.len() as u32)?;
            buf.write_all(text.as_bytes())?;
        }
    }
    Ok(())
}

/// Batch file reader.
pub struct BatchReader {
    header: FileHeader,
    payload: Vec<u8>,
}

impl BatchReader {
    /// Open a batch file and verify its header and checksum.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Parse container bytes already in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = Cursor::new(bytes);
        let header = FileHeader::read(&mut cursor)?;

        if header.version != FORMAT_VERSION {
            return Err(FormatError::VersionMismatch {
                expected: FORMAT_VERSION,
                got: header.version,
            });
        }

        let start = FileHeader::SIZE;
        let end = usize::try_from(header.payload_size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .filter(|&end| end + 4 <= bytes.len())
            .ok_or_else(|| FormatError::InvalidFormat("truncated payload".into()))?;

        let payload = bytes[start..end].to_vec();
        let stored = LittleEndian::read_u32(&bytes[end..end + 4]);
        let computed = crc32fast::hash(&payload);
        if stored != computed {
            return Err(FormatError::CrcMismatch { stored, computed });
        }

        Ok(Self { header, payload })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Decompress and decode all entries.
    pub fn into_file(self) -> Result<BatchFile, FormatError> {
        let raw = if self.header.flags & FLAG_ZLIB != 0 {
            let mut raw = Vec::new();
            ZlibDecoder::new(self.payload.as_slice())
                .take(self.header.raw_size)
                .read_to_end(&mut raw)?;
            raw
        } else {
            self.payload
        };

        if raw.len() as u64 != self.header.raw_size {
            return Err(FormatError::InvalidFormat(format!(
                "payload decoded to {} bytes, header says {}",
                raw.len(),
                self.header.raw_size
            )));
        }

        let mut cursor = Cursor::new(raw.as_slice());
        let mut entries = Vec::with_capacity(self.header.entry_count as usize);
        for _ in 0..self.header.entry_count {
            entries.push(read_entry(&mut cursor)?);
        }

        Ok(BatchFile {
            header: self.header,
            entries,
        })
    }
}

/// Read and decode a batch file in one step.
pub fn read_batch<P: AsRef<Path>>(path: P) -> Result<BatchFile, FormatError> {
    BatchReader::open(path)?.into_file()
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn read_shape(cursor: &mut Cursor<&[u8]>) -> Result<Vec<usize>, FormatError> {
    let ndim = cursor.read_u8()? as usize;
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let dim = cursor.read_u64::<LittleEndian>()?;
        let dim = usize::try_from(dim)
            .map_err(|_| FormatError::InvalidFormat(format!("dimension too large: {}", dim)))?;
        shape.push(dim);
    }
    Ok(shape)
}

fn read_data(
    cursor: &mut Cursor<&[u8]>,
    dtype: DType,
    count: usize,
) -> Result<ArrayData, FormatError> {
    let needed = count
        .checked_mul(dtype.size())
        .ok_or_else(|| FormatError::InvalidFormat("array too large".into()))?;
    if needed > remaining(cursor) {
        return Err(FormatError::InvalidFormat(format!(
            "array needs {} bytes, {} left",
            needed,
            remaining(cursor)
        )));
    }

    Ok(match dtype {
        DType::F32 => {
            let mut values = vec![0f32; count];
            cursor.read_f32_into::<LittleEndian>(&mut values)?;
            ArrayData::F32(values)
        }
        DType::I64 => {
            let mut values = vec![0i64; count];
            cursor.read_i64_into::<LittleEndian>(&mut values)?;
            ArrayData::I64(values)
        }
        DType::U8 => {
            let mut values = vec![0u8; count];
            cursor.read_exact(&mut values)?;
            ArrayData::U8(values)
        }
    })
}

fn read_entry(cursor: &mut Cursor<&[u8]>) -> Result<(String, Entry), FormatError> {
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut name_buf = vec![0u8; name_len];
    cursor.read_exact(&mut name_buf)?;
    let name = String::from_utf8(name_buf)
        .map_err(|_| FormatError::InvalidFormat("entry name is not UTF-8".into()))?;

    let kind = cursor.read_u8()?;
    let dtype_code = cursor.read_u8()?;

    let entry = match kind {
        KIND_DENSE | KIND_RAGGED => {
            let dtype = DType::from_u8(dtype_code).ok_or_else(|| {
                FormatError::InvalidFormat(format!("'{}' has unknown dtype {}", name, dtype_code))
            })?;

            if kind == KIND_DENSE {
                let shape = read_shape(cursor)?;
                let data = read_data(cursor, dtype, element_count(&shape))?;
                Entry::Dense { shape, data }
            } else {
                let count = cursor.read_u32::<LittleEndian>()? as usize;
                let mut shapes = Vec::with_capacity(count.min(remaining(cursor)));
                for _ in 0..count {
                    shapes.push(read_shape(cursor)?);
                }
                let total = shapes
                    .iter()
                    .fold(0usize, |acc, s| acc.saturating_add(element_count(s)));
                let data = read_data(cursor, dtype, total)?;
                Entry::Ragged { shapes, data }
            }
        }
        KIND_TEXT => {
            let len = cursor.read_u32::<LittleEndian>()? as usize;
            if len > remaining(cursor) {
                return Err(FormatError::InvalidFormat(format!(
                    "'{}' text runs past end of payload",
                    name
                )));
            }
            let mut text = vec![0u8; len];
            cursor.read_exact(&mut text)?;
            Entry::Text(String::from_utf8_lossy(&text).into_owned())
        }
        other => {
            return Err(FormatError::InvalidFormat(format!(
                "'{}' has unknown entry kind {}",
                name, other
            )))
        }
    };

    Ok((name, entry))
}

/// Decoded batch file.
#[derive(Debug, Clone)]
pub struct BatchFile {
    header: FileHeader,
    entries: Vec<(String, Entry)>,
}

impl BatchFile {
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[(String, Entry)] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, entry)| entry)
    }

    fn require(&self, name: &str) -> Result<&Entry, FormatError> {
        self.get(name)
            .ok_or_else(|| FormatError::MissingArray(name.to_string()))
    }

    /// The scalar split field.
    pub fn split(&self) -> Result<Split, FormatError> {
        match self.require(SPLIT_FIELD)? {
            Entry::Text(text) => Ok(text.parse()?),
            _ => Err(FormatError::InvalidFormat("'split' is not a scalar".into())),
        }
    }

    /// Number of samples, taken from `frames`.
    pub fn len(&self) -> usize {
        self.get("frames").map(Entry::item_count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every required array exists and agrees on the sample count.
    pub fn validate(&self) -> Result<(), FormatError> {
        let n = self.require("frames")?.item_count();
        for name in REQUIRED_ARRAYS {
            let count = self.require(name)?.item_count();
            if count != n {
                return Err(FormatError::InvalidFormat(format!(
                    "'{}' has {} items, 'frames' has {}",
                    name, count, n
                )));
            }
        }
        self.split()?;
        Ok(())
    }

    /// Frame indices in file order.
    pub fn frames(&self) -> Result<Vec<u64>, FormatError> {
        let values = self
            .require("frames")?
            .data()
            .and_then(ArrayData::as_i64)
            .ok_or_else(|| FormatError::InvalidFormat("'frames' is not i64".into()))?;
        Ok(values.iter().map(|&f| f as u64).collect())
    }

    fn dense_f32(&self, name: &str, row: usize) -> Result<&[f32], FormatError> {
        match self.require(name)? {
            Entry::Dense {
                shape,
                data: ArrayData::F32(values),
            } if shape.len() == 2 && shape[1] == row => Ok(values.as_slice()),
            Entry::Dense {
                shape,
                data: ArrayData::F32(values),
            } if shape.len() == 1 && row == 1 => Ok(values.as_slice()),
            other => Err(FormatError::InvalidFormat(format!(
                "'{}' has unexpected layout {}",
                name,
                other.describe()
            ))),
        }
    }

    fn depth_maps(&self) -> Result<Vec<DepthMap>, FormatError> {
        let (shapes, values): (Vec<Vec<usize>>, &[f32]) = match self.require("depths")? {
            Entry::Dense {
                shape,
                data: ArrayData::F32(values),
            } if shape.len() == 3 => (vec![vec![shape[1], shape[2]]; shape[0]], values.as_slice()),
            Entry::Ragged {
                shapes,
                data: ArrayData::F32(values),
            } => (shapes.clone(), values.as_slice()),
            other => {
                return Err(FormatError::InvalidFormat(format!(
                    "'depths' has unexpected layout {}",
                    other.describe()
                )))
            }
        };

        let mut offset = 0;
        let mut maps = Vec::with_capacity(shapes.len());
        for shape in shapes {
            let (h, w) = match shape.as_slice() {
                [h, w] => (*h, *w),
                _ => {
                    return Err(FormatError::InvalidFormat(format!(
                        "depth item has shape {:?}",
                        shape
                    )))
                }
            };
            let count = h * w;
            let chunk = values
                .get(offset..offset + count)
                .ok_or_else(|| FormatError::InvalidFormat("depth data truncated".into()))?;
            let map = DepthMap::new(w as u32, h as u32, chunk.to_vec())
                .map_err(|e| FormatError::InvalidFormat(e.to_string()))?;
            maps.push(map);
            offset += count;
        }
        Ok(maps)
    }

    /// Rebuild the samples stored in this file.
    pub fn to_samples(&self) -> Result<Vec<Sample>, FormatError> {
        self.validate()?;

        let depths = self.depth_maps()?;
        let poses = self.dense_f32("poses", 6)?;
        let frames = self.frames()?;
        let distances = self.dense_f32("distances", 1)?;
        let dirs = self.dense_f32("victim_dirs", 3)?;
        let actions = self
            .require("actions")?
            .data()
            .and_then(ArrayData::as_u8)
            .ok_or_else(|| FormatError::InvalidFormat("'actions' is not u8".into()))?;

        depths
            .into_iter()
            .enumerate()
            .map(|(i, depth)| {
                let action_label = ActionLabel::from_u8(actions[i]).ok_or_else(|| {
                    FormatError::InvalidFormat(format!("invalid action label {}", actions[i]))
                })?;
                let mut pose = [0f32; 6];
                pose.copy_from_slice(&poses[i * 6..i * 6 + 6]);
                let mut direction = [0f32; 3];
                direction.copy_from_slice(&dirs[i * 3..i * 3 + 3]);

                Ok(Sample {
                    depth,
                    pose,
                    frame_index: frames[i],
                    distance: distances[i],
                    action_label,
                    direction,
                })
            })
            .collect()
    }
}
