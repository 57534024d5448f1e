//! Minimal reader and writer for single-vector NumPy `.npy` files.
//!
//! Embedding files hold one float array per identity. Versions 1.0, 2.0 and
//! 3.0 of the format are accepted with `f4`/`f8` data in either byte order.
//! Arrays may have any shape with at most one axis longer than 1, so `(128,)`,
//! `(1, 128)` and `(128, 1)` all read as a 128-element vector.

use std::fs;
use std::path::Path;

use crate::error::FaceIdError;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy)]
enum Dtype {
    F4 { little: bool },
    F8 { little: bool },
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, String> {
        let (little, kind) = match descr.split_at_checked(1) {
            Some(("<", kind)) => (true, kind),
            Some((">", kind)) => (false, kind),
            // Native order.
            Some(("=", kind)) => (cfg!(target_endian = "little"), kind),
            _ => return Err(format!("unsupported dtype {descr:?}")),
        };
        match kind {
            "f4" => Ok(Self::F4 { little }),
            "f8" => Ok(Self::F8 { little }),
            _ => Err(format!("unsupported dtype {descr:?}")),
        }
    }

    fn size(self) -> usize {
        match self {
            Self::F4 { .. } => 4,
            Self::F8 { .. } => 8,
        }
    }

    fn decode(self, chunk: &[u8]) -> f32 {
        match self {
            Self::F4 { little } => {
                let b: [u8; 4] = chunk.try_into().unwrap_or_default();
                if little { f32::from_le_bytes(b) } else { f32::from_be_bytes(b) }
            }
            Self::F8 { little } => {
                let b: [u8; 8] = chunk.try_into().unwrap_or_default();
                (if little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) }) as f32
            }
        }
    }
}

/// Decode an in-memory `.npy` file into a vector.
pub fn parse_npy(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("not an npy file".into());
    }
    let major = bytes[6];
    let (header_len, header_start): (usize, usize) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            let raw: [u8; 4] = bytes
                .get(8..12)
                .and_then(|b| b.try_into().ok())
                .ok_or("truncated header length")?;
            (u32::from_le_bytes(raw) as usize, 12)
        }
        v => return Err(format!("unsupported npy version {v}")),
    };
    let header_end = header_start
        .checked_add(header_len)
        .ok_or("header length overflows")?;
    let header = bytes
        .get(header_start..header_end)
        .ok_or("truncated header")?;
    let header = std::str::from_utf8(header).map_err(|e| format!("header: {e}"))?;

    let descr = dict_value(header, "descr")
        .and_then(quoted)
        .ok_or("header has no descr")?;
    let dtype = Dtype::parse(descr)?;

    let shape = dict_value(header, "shape").ok_or("header has no shape")?;
    let shape = shape
        .strip_prefix('(')
        .and_then(|s| s.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or("malformed shape")?;
    let dims: Vec<usize> = shape
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("shape {s:?}: {e}")))
        .collect::<Result<_, _>>()?;
    if dims.iter().filter(|&&d| d > 1).count() > 1 {
        return Err(format!("expected a single vector, got shape {dims:?}"));
    }
    let count = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or("shape overflows")?;
    let want = count.checked_mul(dtype.size()).ok_or("shape overflows")?;

    let data = &bytes[header_end.min(bytes.len())..];
    if data.len() != want {
        return Err(format!(
            "expected {want} data bytes for {count} values, got {}",
            data.len()
        ));
    }
    Ok(data.chunks_exact(dtype.size()).map(|c| dtype.decode(c)).collect())
}

/// Encode `values` as a version 1.0 little-endian `f4` `.npy` file.
pub fn encode_npy(values: &[f32]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // Pad so the data starts on a 64-byte boundary, ending with a newline.
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(NPY_MAGIC.len() + 4 + header.len() + values.len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Read one embedding vector from an `.npy` file.
pub fn read_npy_vector(path: impl AsRef<Path>) -> Result<Vec<f32>, FaceIdError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| FaceIdError::malformed(path, e.to_string()))?;
    parse_npy(&bytes).map_err(|reason| FaceIdError::malformed(path, reason))
}

fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let at = header
        .find(&format!("'{key}'"))
        .or_else(|| header.find(&format!("\"{key}\"")))?;
    let rest = &header[at + key.len() + 2..];
    Some(rest.trim_start().strip_prefix(':')?.trim_start())
}

fn quoted(v: &str) -> Option<&str> {
    let q = v.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    v[1..].split_once(q).map(|(inner, _)| inner)
}
