//! Decoding of token shard files.
//!
//! A shard is either a one dimensional NumPy array (`.npy`) or, for any other
//! file, a raw stream of little endian `u16` token ids.

use std::{fs, path::Path};

use crate::error::{Result, WorkerErr};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Reads a whole shard file into memory.
pub fn read_shard(path: &Path) -> Result<Vec<u32>> {
    let name = path.display().to_string();
    let bytes = fs::read(path)?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("npy") => parse_npy(&name, &bytes),
        _ => parse_raw_u16(&name, &bytes),
    }
}

/// Decodes a headerless little endian `u16` token stream.
pub fn parse_raw_u16(name: &str, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 2 != 0 {
        return Err(shard_err(name, format!("odd byte length {}", bytes.len())));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u32::from(u16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Decodes a one dimensional `.npy` array of `<u2`, `<u4`, `<i4` or `<i8`.
pub fn parse_npy(name: &str, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(shard_err(name, "missing npy magic"));
    }

    let (header_len, header_start) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 if bytes.len() >= 12 => {
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        major => return Err(shard_err(name, format!("unsupported npy version {major}"))),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .ok_or_else(|| shard_err(name, "truncated npy header"))?;

    let header = NpyHeader::parse(name, header)?;
    let data = &bytes[data_start..];

    let width = header.dtype.width();
    if data.len() != header.len * width {
        return Err(shard_err(
            name,
            format!(
                "header announces {} elements but the body holds {} bytes",
                header.len,
                data.len()
            ),
        ));
    }

    let chunks = data.chunks_exact(width);
    match header.dtype {
        Dtype::U2 => Ok(chunks
            .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
            .collect()),
        Dtype::U4 => Ok(chunks
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()),
        Dtype::I4 => chunks
            .map(|c| {
                let v = i32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                u32::try_from(v).map_err(|_| shard_err(name, format!("negative token {v}")))
            })
            .collect(),
        Dtype::I8 => chunks
            .map(|c| {
                let mut raw = [0; 8];
                raw.copy_from_slice(c);
                let v = i64::from_le_bytes(raw);
                u32::try_from(v).map_err(|_| shard_err(name, format!("token {v} out of range")))
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    U2,
    U4,
    I4,
    I8,
}

impl Dtype {
    fn width(self) -> usize {
        match self {
            Dtype::U2 => 2,
            Dtype::U4 | Dtype::I4 => 4,
            Dtype::I8 => 8,
        }
    }
}

#[derive(Debug)]
struct NpyHeader {
    dtype: Dtype,
    len: usize,
}

impl NpyHeader {
    /// Parses the python dict literal of an npy header, e.g.
    /// `{'descr': '<u2', 'fortran_order': False, 'shape': (100,), }`.
    fn parse(name: &str, header: &str) -> Result<Self> {
        let descr = dict_value(header, "descr")
            .map(|v| v.trim_matches(|c| c == '\'' || c == '"'))
            .ok_or_else(|| shard_err(name, "npy header has no descr"))?;

        let dtype = match descr {
            "<u2" => Dtype::U2,
            "<u4" => Dtype::U4,
            "<i4" => Dtype::I4,
            "<i8" => Dtype::I8,
            other => return Err(shard_err(name, format!("unsupported dtype {other}"))),
        };

        if dict_value(header, "fortran_order") != Some("False") {
            return Err(shard_err(name, "fortran ordered arrays are not supported"));
        }

        let shape = dict_value(header, "shape")
            .ok_or_else(|| shard_err(name, "npy header has no shape"))?;
        let dims: Vec<&str> = shape
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(str::trim)
            .filter(|dim| !dim.is_empty())
            .collect();

        let [dim] = dims.as_slice() else {
            return Err(shard_err(name, format!("expected a 1-D array, got shape {shape}")));
        };
        let len = dim
            .parse()
            .map_err(|_| shard_err(name, format!("invalid shape {shape}")))?;

        Ok(Self { dtype, len })
    }
}

/// The raw text of `key`'s value, up to the next top level comma.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header
        .find(&format!("'{key}'"))
        .or_else(|| header.find(&format!("\"{key}\"")))?;
    let rest = &header[start + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find([',', '}']).unwrap_or(rest.len())
    };

    Some(rest[..end].trim())
}

fn shard_err(name: &str, detail: impl Into<String>) -> WorkerErr {
    WorkerErr::Shard {
        shard: name.to_string(),
        detail: detail.into(),
    }
}
