use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

use crate::error::ForestError;
use crate::forest::{ForestConfig, ForestIndex};
use crate::tree::{Hyperplane, Node, ProjectionTree};
use crate::vectors::VectorSet;

const FOREST_MAGIC: [u8; 4] = [b'R', b'P', b'F', b'T'];
const FOREST_VERSION: u32 = 1;

const TAG_LEAF: u8 = 0;
const TAG_SPLIT: u8 = 1;

const MAX_LABEL_LEN: usize = 64 * 1024;

/// Save serializes a forest and its vector set in a compact binary format.
///
/// ```text
/// [4B magic "RPFT"] [4B version=1]
/// [4B dim] [4B count] [4B trees] [4B leafSize] [8B seed]
/// For each vector:
///   [4B labelLen] [labelLen bytes UTF-8 label] [dim x 4B float32]
/// For each tree:
///   [4B nodeCount]
///   For each node:
///     [1B tag]
///     tag 0 (leaf):  [4B len] [len x 4B position]
///     tag 1 (split): [dim x 4B float32 normal] [4B float32 offset] [4B left] [4B right]
/// ```
///
/// All multi-byte values are little-endian. Labels longer than 64 KiB are
/// refused up front with an `InvalidInput` I/O error, since [`load`] would
/// reject the file.
pub fn save(index: &ForestIndex, w: &mut dyn Write) -> Result<(), ForestError> {
    let set = index.vectors();
    let cfg = index.config();
    if let Some(label) = set.labels().iter().find(|l| l.len() > MAX_LABEL_LEN) {
        return Err(ForestError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("label of {} bytes exceeds {MAX_LABEL_LEN}", label.len()),
        )));
    }

    let mut bw = BufWriter::new(w);

    bw.write_all(&FOREST_MAGIC)?;
    bw.write_all(&FOREST_VERSION.to_le_bytes())?;

    bw.write_all(&(set.dimension() as u32).to_le_bytes())?;
    bw.write_all(&(set.len() as u32).to_le_bytes())?;
    bw.write_all(&(index.trees().len() as u32).to_le_bytes())?;
    bw.write_all(&(cfg.leaf_size as u32).to_le_bytes())?;
    bw.write_all(&cfg.seed.to_le_bytes())?;

    for (label, vector) in set.iter() {
        bw.write_all(&(label.len() as u32).to_le_bytes())?;
        bw.write_all(label.as_bytes())?;
        for &v in vector {
            bw.write_all(&v.to_le_bytes())?;
        }
    }

    for tree in index.trees() {
        bw.write_all(&(tree.nodes().len() as u32).to_le_bytes())?;
        for node in tree.nodes() {
            match node {
                Node::Leaf(items) => {
                    bw.write_all(&[TAG_LEAF])?;
                    bw.write_all(&(items.len() as u32).to_le_bytes())?;
                    for &i in items {
                        bw.write_all(&i.to_le_bytes())?;
                    }
                }
                Node::Split { plane, left, right } => {
                    bw.write_all(&[TAG_SPLIT])?;
                    for &v in &plane.normal {
                        bw.write_all(&v.to_le_bytes())?;
                    }
                    bw.write_all(&plane.offset.to_le_bytes())?;
                    bw.write_all(&left.to_le_bytes())?;
                    bw.write_all(&right.to_le_bytes())?;
                }
            }
        }
    }

    bw.flush()?;
    Ok(())
}

/// Load deserializes a forest written by [`save`].
///
/// Every structural invariant is checked: tree shape, child and position
/// bounds, and that each tree's leaves cover every position exactly once.
/// Any violation, as well as truncated input or trailing bytes, is
/// [`ForestError::CorruptIndex`].
pub fn load(r: &mut dyn Read) -> Result<ForestIndex, ForestError> {
    let mut dec = Decoder {
        r: BufReader::new(r),
    };

    let mut magic = [0u8; 4];
    dec.read_exact(&mut magic)?;
    if magic != FOREST_MAGIC {
        return Err(corrupt(format!("invalid magic {magic:?}")));
    }
    let version = dec.read_u32()?;
    if version != FOREST_VERSION {
        return Err(corrupt(format!(
            "unsupported version {version} (want {FOREST_VERSION})"
        )));
    }

    let dim = dec.read_u32()? as usize;
    if dim == 0 {
        return Err(corrupt("invalid dimension 0"));
    }
    let count = dec.read_u32()? as usize;
    if count == 0 {
        return Err(corrupt("index holds no vectors"));
    }
    let num_trees = dec.read_u32()? as usize;
    if num_trees == 0 {
        return Err(corrupt("index holds no trees"));
    }
    let leaf_size = dec.read_u32()? as usize;
    let seed = dec.read_u64()?;

    let total = count
        .checked_mul(dim)
        .ok_or_else(|| corrupt(format!("{count} x {dim} overflows")))?;
    let mut labels = Vec::with_capacity(count.min(1 << 16));
    let mut data = Vec::with_capacity(total.min(1 << 20));
    let mut seen = HashSet::new();
    for _ in 0..count {
        let len = dec.read_u32()? as usize;
        if len > MAX_LABEL_LEN {
            return Err(corrupt(format!("label length {len} exceeds {MAX_LABEL_LEN}")));
        }
        let mut bytes = vec![0u8; len];
        dec.read_exact(&mut bytes)?;
        let label = String::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))?;
        if !seen.insert(label.clone()) {
            return Err(corrupt(format!("duplicate label {label:?}")));
        }
        labels.push(label);
        for _ in 0..dim {
            data.push(dec.read_f32()?);
        }
    }
    let set = Arc::new(VectorSet::from_parts(dim, labels, data));

    let mut trees = Vec::with_capacity(num_trees.min(1 << 10));
    for t in 0..num_trees {
        trees.push(read_tree(&mut dec, dim, count).map_err(|e| match e {
            ForestError::CorruptIndex(msg) => corrupt(format!("tree {t}: {msg}")),
            other => other,
        })?);
    }

    let mut rest = [0u8; 1];
    if dec.r.read(&mut rest)? != 0 {
        return Err(corrupt("trailing bytes after last tree"));
    }

    let cfg = ForestConfig {
        num_trees,
        leaf_size,
        search_k: 0,
        seed,
    };
    Ok(ForestIndex::from_parts(set, cfg, trees))
}

fn read_tree<R: Read>(
    dec: &mut Decoder<R>,
    dim: usize,
    count: usize,
) -> Result<ProjectionTree, ForestError> {
    let node_count = dec.read_u32()? as usize;
    // Leaves are never empty, so a tree over `count` positions has at most
    // `2 * count - 1` nodes.
    if node_count == 0 || node_count > 2 * count - 1 {
        return Err(corrupt(format!(
            "node count {node_count} out of range for {count} vectors"
        )));
    }

    let mut nodes = Vec::with_capacity(node_count);
    let mut parents = vec![0u8; node_count];
    let mut covered = vec![false; count];
    let mut covered_count = 0usize;

    for id in 0..node_count {
        let mut tag = [0u8; 1];
        dec.read_exact(&mut tag)?;
        match tag[0] {
            TAG_LEAF => {
                let len = dec.read_u32()? as usize;
                if len == 0 || len > count {
                    return Err(corrupt(format!("node {id}: leaf length {len}")));
                }
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    let i = dec.read_u32()?;
                    let slot = covered.get_mut(i as usize).ok_or_else(|| {
                        corrupt(format!("node {id}: position {i} out of bounds ({count})"))
                    })?;
                    if *slot {
                        return Err(corrupt(format!("node {id}: position {i} repeated")));
                    }
                    *slot = true;
                    covered_count += 1;
                    items.push(i);
                }
                nodes.push(Node::Leaf(items));
            }
            TAG_SPLIT => {
                let mut normal = Vec::with_capacity(dim);
                for _ in 0..dim {
                    normal.push(dec.read_f32()?);
                }
                let offset = dec.read_f32()?;
                if !offset.is_finite() || normal.iter().any(|v| !v.is_finite()) {
                    return Err(corrupt(format!("node {id}: non-finite hyperplane")));
                }
                let left = dec.read_u32()?;
                let right = dec.read_u32()?;
                for child in [left, right] {
                    let c = child as usize;
                    if c <= id || c >= node_count {
                        return Err(corrupt(format!("node {id}: child {child} out of order")));
                    }
                    parents[c] += 1;
                    if parents[c] > 1 {
                        return Err(corrupt(format!("node {child} has several parents")));
                    }
                }
                nodes.push(Node::Split {
                    plane: Hyperplane { normal, offset },
                    left,
                    right,
                });
            }
            other => return Err(corrupt(format!("node {id}: unknown tag {other}"))),
        }
    }

    if let Some(orphan) = (1..node_count).find(|&i| parents[i] == 0) {
        return Err(corrupt(format!("node {orphan} is unreachable")));
    }
    if covered_count != count {
        return Err(corrupt(format!(
            "leaves cover {covered_count} of {count} positions"
        )));
    }

    Ok(ProjectionTree::from_nodes(nodes))
}

/// Save to `path` without ever exposing a partial file: the forest is
/// written to a temporary sibling, synced, then renamed over `path`.
pub fn save_file(index: &ForestIndex, path: impl AsRef<Path>) -> Result<(), ForestError> {
    let path = path.as_ref();
    let started = Instant::now();
    let tmp = temp_path(path);

    if let Err(e) = write_synced(index, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent(path)?;

    info!(
        path = %path.display(),
        trees = index.trees().len(),
        vectors = index.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "rpforest: saved forest"
    );
    Ok(())
}

/// Load a forest previously written with [`save_file`].
pub fn load_file(path: impl AsRef<Path>) -> Result<ForestIndex, ForestError> {
    let path = path.as_ref();
    let started = Instant::now();
    let mut file = File::open(path)?;
    let index = load(&mut file)?;
    info!(
        path = %path.display(),
        trees = index.trees().len(),
        vectors = index.len(),
        dim = index.dimension(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "rpforest: loaded forest"
    );
    Ok(index)
}

/// Fail with [`ForestError::DimensionMismatch`] unless `index` was built
/// over vectors of the same dimensionality as `set`.
pub fn ensure_compatible(index: &ForestIndex, set: &VectorSet) -> Result<(), ForestError> {
    if index.dimension() != set.dimension() {
        return Err(ForestError::DimensionMismatch {
            got: index.dimension(),
            want: set.dimension(),
        });
    }
    Ok(())
}

fn write_synced(index: &ForestIndex, tmp: &Path) -> Result<(), ForestError> {
    let mut file = File::create(tmp)?;
    save(index, &mut file)?;
    file.sync_all()?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "forest".into());
    path.with_file_name(format!(".{name}.tmp-{}-{n}", std::process::id()))
}

fn sync_parent(path: &Path) -> Result<(), ForestError> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn corrupt(msg: impl Into<String>) -> ForestError {
    ForestError::CorruptIndex(msg.into())
}

/// Little-endian reader that reports a short read as corruption.
struct Decoder<R: Read> {
    r: BufReader<R>,
}

impl<R: Read> Decoder<R> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ForestError> {
        self.r.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => corrupt("unexpected end of file"),
            _ => ForestError::Io(e),
        })
    }

    fn read_u32(&mut self) -> Result<u32, ForestError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64, ForestError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32, ForestError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}
