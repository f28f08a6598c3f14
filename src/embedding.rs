//! Speaker embedding loader.
//!
//! Supported containers, detected by magic bytes rather than extension:
//!   - `torch.save` zip archives holding a single `float32` tensor
//!     (`<name>/data.pkl` + raw little-endian storage in `<name>/data/0`);
//!     the offset and size recorded in the pickle select the tensor's
//!     values from its storage, so saved views load correctly
//!   - NPY format version 1.0 and 2.0, `float32`, C order
//!   - NPZ archives holding a single `.npy` member
//!
//! The embedding is passed to the mel model unchanged, so only the flat
//! values and the shape matter here.

use std::{
    collections::HashMap,
    io::{Cursor, Read, Seek},
    path::Path,
};

use anyhow::{bail, Context, Result};
use log::debug;
use zip::ZipArchive;

use crate::config::Device;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// A fixed voice vector, read-only after load.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding {
    shape: Vec<usize>,
    data: Vec<f32>,
    device: Device,
}

impl SpeakerEmbedding {
    pub fn new(shape: Vec<usize>, data: Vec<f32>, device: Device) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            bail!("embedding shape {:?} does not match {} values", shape, data.len());
        }
        Ok(Self { shape, data, device })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Number of values, i.e. the embedding width for a `[d]` or `[1, d]` tensor.
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Load an embedding file onto `device`.
pub fn load(path: &Path, device: Device) -> Result<SpeakerEmbedding> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read speaker embedding: {}", path.display()))?;

    let (shape, data) = if bytes.starts_with(NPY_MAGIC) {
        parse_npy(&bytes)?
    } else if bytes.starts_with(ZIP_MAGIC) {
        let archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
            .with_context(|| format!("Cannot open ZIP archive: {}", path.display()))?;
        read_archive(archive).with_context(|| format!("Bad embedding archive: {}", path.display()))?
    } else {
        bail!(
            "{} is neither a torch.save archive nor an NPY file",
            path.display()
        );
    };

    SpeakerEmbedding::new(shape, data, device)
}

// ─────────────────────────────────────────────────────────────────────────────
// Zip containers (torch.save / npz)
// ─────────────────────────────────────────────────────────────────────────────

fn read_member<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Missing archive member '{}'", name))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to read archive member '{}'", name))?;
    Ok(buf)
}

fn read_archive<R: Read + Seek>(mut archive: ZipArchive<R>) -> Result<(Vec<usize>, Vec<f32>)> {
    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();

    let npy: Vec<&String> = names.iter().filter(|n| n.ends_with(".npy")).collect();
    if let [member] = npy.as_slice() {
        let buf = read_member(&mut archive, member)?;
        return parse_npy(&buf).with_context(|| format!("Failed to parse NPY entry '{}'", member));
    } else if npy.len() > 1 {
        bail!("NPZ holds {} arrays; expected exactly one embedding", npy.len());
    }

    let storages: Vec<&String> = names
        .iter()
        .filter(|n| n.rsplit_once("/data/").is_some_and(|(_, key)| !key.contains('/')))
        .collect();
    let [storage] = storages.as_slice() else {
        bail!("expected exactly one tensor storage, found {}", storages.len());
    };
    let prefix = storage
        .rsplit_once("/data/")
        .map(|(p, _)| p)
        .unwrap_or_default()
        .to_owned();

    let pickle = read_member(&mut archive, &format!("{prefix}/data.pkl"))?;
    check_float_storage(&pickle)?;

    let big_endian = match read_member(&mut archive, &format!("{prefix}/byteorder")) {
        Ok(order) => String::from_utf8_lossy(&order).trim() == "big",
        Err(_) => false,
    };

    let raw = read_member(&mut archive, storage)?;
    let data = bytes_to_f32(&raw, big_endian)?;
    match tensor_view(&pickle) {
        Some(view) => view.select(data),
        None => {
            debug!("no tensor view found in {prefix}/data.pkl; using the whole storage");
            Ok((vec![data.len()], data))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// data.pkl
// ─────────────────────────────────────────────────────────────────────────────

/// Where a tensor's values live inside its storage.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TensorView {
    offset: usize,
    size: Vec<usize>,
    stride: Vec<usize>,
}

impl TensorView {
    fn select(&self, storage: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let mut expected = 1;
        for (&dim, &stride) in self.size.iter().zip(&self.stride).rev() {
            if dim > 1 && stride != expected {
                bail!(
                    "non-contiguous tensor (size {:?}, stride {:?}); save it with .contiguous()",
                    self.size,
                    self.stride
                );
            }
            expected *= dim;
        }
        let numel: usize = self.size.iter().product();
        let end = self.offset + numel;
        if end > storage.len() {
            bail!(
                "tensor of {} values at offset {} overruns its storage of {}",
                numel,
                self.offset,
                storage.len()
            );
        }
        if self.offset == 0 && end == storage.len() {
            return Ok((self.size.clone(), storage));
        }
        Ok((self.size.clone(), storage[self.offset..end].to_vec()))
    }
}

/// The subset of pickle values needed to follow `_rebuild_tensor_v2`.
#[derive(Debug, Clone, PartialEq)]
enum PickleValue {
    Int(i64),
    Tuple(Vec<PickleValue>),
    Global(String),
    Other,
}

struct PickleReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PickleReader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(bytes)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn line(&mut self) -> Option<&'a str> {
        let len = self.buf[self.pos..].iter().position(|&b| b == b'\n')?;
        let line = self.take(len)?;
        self.pos += 1;
        std::str::from_utf8(line).ok()
    }
}

/// Replay the pickle far enough to read the arguments of the
/// `torch._utils._rebuild_tensor_v2` call.  `None` when the pickle uses an
/// opcode outside the protocol-2 subset `torch.save` emits.
fn tensor_view(pickle: &[u8]) -> Option<TensorView> {
    let mut r = PickleReader { buf: pickle, pos: 0 };
    let mut stack: Vec<PickleValue> = Vec::new();
    let mut marks: Vec<usize> = Vec::new();
    let mut memo: HashMap<u32, PickleValue> = HashMap::new();
    let mut view = None;

    loop {
        match r.byte()? {
            0x80 => {
                r.byte()?;
            }
            b'c' => {
                let module = r.line()?;
                let name = r.line()?;
                stack.push(PickleValue::Global(format!("{module}.{name}")));
            }
            b'(' => marks.push(stack.len()),
            b')' => stack.push(PickleValue::Tuple(Vec::new())),
            b't' => {
                let mark = marks.pop()?;
                let items = stack.split_off(mark);
                stack.push(PickleValue::Tuple(items));
            }
            op @ 0x85..=0x87 => {
                let n = usize::from(op - 0x84);
                let items = stack.split_off(stack.len().checked_sub(n)?);
                stack.push(PickleValue::Tuple(items));
            }
            b'K' => stack.push(PickleValue::Int(i64::from(r.byte()?))),
            b'M' => {
                let b = r.take(2)?;
                stack.push(PickleValue::Int(i64::from(u16::from_le_bytes([b[0], b[1]]))));
            }
            b'J' => {
                let b = r.take(4)?;
                stack.push(PickleValue::Int(i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))));
            }
            0x8a => {
                let n = usize::from(r.byte()?);
                let b = r.take(n)?;
                if n > 8 {
                    return None;
                }
                let mut le = if b.last().is_some_and(|&x| x & 0x80 != 0) { [0xff; 8] } else { [0; 8] };
                le[..n].copy_from_slice(b);
                stack.push(PickleValue::Int(i64::from_le_bytes(le)));
            }
            b'X' | b'T' | b'B' => {
                let n = r.u32()? as usize;
                r.take(n)?;
                stack.push(PickleValue::Other);
            }
            b'U' | b'C' | 0x8c => {
                let n = usize::from(r.byte()?);
                r.take(n)?;
                stack.push(PickleValue::Other);
            }
            b'G' => {
                r.take(8)?;
                stack.push(PickleValue::Other);
            }
            b'N' | 0x88 | 0x89 | b'}' | b']' => stack.push(PickleValue::Other),
            b'q' => {
                let key = u32::from(r.byte()?);
                memo.insert(key, stack.last()?.clone());
            }
            b'r' => {
                let key = r.u32()?;
                memo.insert(key, stack.last()?.clone());
            }
            0x94 => {
                let key = memo.len() as u32;
                memo.insert(key, stack.last()?.clone());
            }
            b'h' => {
                let key = u32::from(r.byte()?);
                stack.push(memo.get(&key)?.clone());
            }
            b'j' => {
                let key = r.u32()?;
                stack.push(memo.get(&key)?.clone());
            }
            0x95 => {
                r.take(8)?;
            }
            b'Q' => {
                stack.pop()?;
                stack.push(PickleValue::Other);
            }
            b'R' | 0x81 => {
                let args = stack.pop()?;
                let callable = stack.pop()?;
                if view.is_none() && callable == PickleValue::Global("torch._utils._rebuild_tensor_v2".into()) {
                    view = rebuild_args(&args);
                }
                stack.push(PickleValue::Other);
            }
            b'b' | b'a' => {
                stack.pop()?;
            }
            b's' => {
                stack.truncate(stack.len().checked_sub(2)?);
            }
            b'u' | b'e' => {
                let mark = marks.pop()?;
                stack.truncate(mark);
            }
            b'.' => return view,
            _ => return None,
        }
    }
}

/// `(storage, storage_offset, size, stride, ...)`
fn rebuild_args(args: &PickleValue) -> Option<TensorView> {
    let PickleValue::Tuple(items) = args else {
        return None;
    };
    let dims = |value: &PickleValue| -> Option<Vec<usize>> {
        let PickleValue::Tuple(values) = value else {
            return None;
        };
        values
            .iter()
            .map(|v| match v {
                PickleValue::Int(i) => usize::try_from(*i).ok(),
                _ => None,
            })
            .collect()
    };
    let offset = match items.get(1)? {
        PickleValue::Int(i) => usize::try_from(*i).ok()?,
        _ => return None,
    };
    let size = dims(items.get(2)?)?;
    let stride = dims(items.get(3)?)?;
    if size.len() != stride.len() {
        return None;
    }
    Some(TensorView { offset, size, stride })
}

/// The pickle names its storage class; only `FloatStorage` is supported.
fn check_float_storage(pickle: &[u8]) -> Result<()> {
    let contains = |needle: &[u8]| pickle.windows(needle.len()).any(|w| w == needle);
    if contains(b"FloatStorage") {
        return Ok(());
    }
    for other in ["HalfStorage", "DoubleStorage", "BFloat16Storage", "LongStorage", "IntStorage"] {
        if contains(other.as_bytes()) {
            bail!("Unsupported tensor storage '{}' — only float32 is supported", other);
        }
    }
    bail!("Tensor storage type not recognised — only float32 is supported")
}

fn bytes_to_f32(raw: &[u8], big_endian: bool) -> Result<Vec<f32>> {
    if raw.len() % 4 != 0 {
        bail!("float32 storage length {} is not a multiple of 4", raw.len());
    }
    Ok(raw
        .chunks_exact(4)
        .map(|b| {
            let arr = [b[0], b[1], b[2], b[3]];
            if big_endian {
                f32::from_be_bytes(arr)
            } else {
                f32::from_le_bytes(arr)
            }
        })
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// NPY header parser
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a raw `.npy` byte buffer into its shape and flat f32 data.
pub fn parse_npy(data: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    if data.len() < 10 || !data.starts_with(NPY_MAGIC) {
        bail!("Not a valid NPY file (bad magic)");
    }

    let (header_len, header_start) = match data[6] {
        1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        2 => {
            if data.len() < 12 {
                bail!("NPY v2 file too short");
            }
            (u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize, 12)
        }
        major => bail!("Unsupported NPY version {}.{}", major, data[7]),
    };

    let header_end = header_start + header_len;
    if data.len() < header_end {
        bail!("NPY file truncated in header");
    }
    let header = std::str::from_utf8(&data[header_start..header_end])
        .context("NPY header is not valid UTF-8")?;

    let dtype = extract_header_field(header, "descr").context("NPY header missing 'descr'")?;
    let dtype = dtype.trim().trim_matches('\'').trim_matches('"');
    if !matches!(dtype, "<f4" | "=f4" | "|f4" | ">f4") {
        bail!("Unsupported dtype '{}' — only float32 is supported", dtype);
    }

    let fortran = extract_header_field(header, "fortran_order")
        .unwrap_or("False")
        .trim()
        .eq_ignore_ascii_case("true");
    if fortran {
        bail!("Fortran-order arrays are not supported");
    }

    let shape_str = extract_header_field(header, "shape").context("NPY header missing 'shape'")?;
    let shape = parse_shape(shape_str.trim())?;
    let n_elements: usize = shape.iter().product();

    let body = &data[header_end..];
    if body.len() < n_elements * 4 {
        bail!(
            "NPY data section too short: expected {} bytes, got {}",
            n_elements * 4,
            body.len()
        );
    }

    let values = bytes_to_f32(&body[..n_elements * 4], dtype.starts_with('>'))?;
    Ok((shape, values))
}

/// Extract the value of a field from a Python-literal dict header, e.g.
/// `"{'descr': '<f4', 'shape': (3,)}"` → `Some("<f4")` for `descr`.
fn extract_header_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    let key_sq = format!("'{}':", field);
    let key_dq = format!("\"{}\":", field);

    let start = header
        .find(key_sq.as_str())
        .map(|p| p + key_sq.len())
        .or_else(|| header.find(key_dq.as_str()).map(|p| p + key_dq.len()))?;

    let rest = header[start..].trim_start();

    if rest.starts_with('(') {
        let end = rest.find(')')?;
        Some(&rest[..end + 1])
    } else if rest.starts_with('\'') || rest.starts_with('"') {
        let quote = rest.chars().next()?;
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        Some(&inner[..end])
    } else {
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim())
    }
}

/// Parse a Python-style shape tuple like `(1, 256)`, `(100,)` or `()`.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    s.trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("Bad shape dim: '{}'", t)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use zip::write::SimpleFileOptions;

    /// Build a minimal v1.0 NPY byte buffer.
    fn make_npy(shape: &[usize], values: &[f32]) -> Vec<u8> {
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        let mut header = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
            dims.join(", ")
        );
        // magic(6) + version(2) + len(2) + header, padded to 64 with '\n' last
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut buf = Vec::new();
        buf.extend_from_slice(NPY_MAGIC);
        buf.extend_from_slice(&[1, 0]);
        buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
        buf.extend_from_slice(header.as_bytes());
        for &v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    fn make_zip(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in members {
            let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("glados-tts-{}-{}", std::process::id(), name));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn le_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_npy_2d() {
        let values: Vec<f32> = (0..6).map(|x| x as f32).collect();
        let (shape, data) = parse_npy(&make_npy(&[2, 3], &values)).unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(data, values);
    }

    #[test]
    fn test_bad_magic() {
        assert!(parse_npy(b"NOTANPY").is_err());
    }

    #[test]
    fn test_load_npy_file() {
        let path = temp_file("emb.npy", &make_npy(&[1, 4], &[0.5, -0.5, 1.0, 2.0]));
        let emb = load(&path, Device::Cpu).unwrap();
        assert_eq!(emb.shape(), &[1, 4]);
        assert_eq!(emb.dim(), 4);
        assert_eq!(emb.as_slice(), &[0.5, -0.5, 1.0, 2.0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_torch_archive() {
        let values = [0.25f32, 0.5, 0.75];
        let bytes = make_zip(&[
            ("glados_p2/data.pkl", b"\x80\x02ctorch._utils\n_rebuild_tensor_v2\nctorch\nFloatStorage\n".to_vec()),
            ("glados_p2/byteorder", b"little".to_vec()),
            ("glados_p2/data/0", le_bytes(&values)),
            ("glados_p2/version", b"3\n".to_vec()),
        ]);
        let path = temp_file("emb.pt", &bytes);
        let emb = load(&path, Device::Cuda).unwrap();
        assert_eq!(emb.as_slice(), &values);
        assert_eq!(emb.shape(), &[3]);
        assert_eq!(emb.device(), Device::Cuda);
        std::fs::remove_file(path).ok();
    }

    /// The `data.pkl` `torch.save` writes for a float tensor with the given
    /// storage offset, size and stride.
    fn tensor_pickle(numel: u8, offset: u8, size: &[u8], stride: &[u8]) -> Vec<u8> {
        let tuple = |dims: &[u8]| {
            let mut t = vec![b'('];
            for &d in dims {
                t.extend_from_slice(&[b'K', d]);
            }
            t.push(b't');
            t
        };
        let mut p = b"\x80\x02ctorch._utils\n_rebuild_tensor_v2\nq\x00((X\x07\x00\x00\x00storageq\x01ctorch\nFloatStorage\nq\x02X\x01\x00\x00\x000q\x03X\x03\x00\x00\x00cpuq\x04K".to_vec();
        p.push(numel);
        p.extend_from_slice(b"tq\x05QK");
        p.push(offset);
        p.extend(tuple(size));
        p.extend_from_slice(b"q\x06");
        p.extend(tuple(stride));
        p.extend_from_slice(b"q\x07\x89ccollections\nOrderedDict\nq\x08)Rq\ttq\nRq\x0b.");
        p
    }

    fn torch_archive(pickle: Vec<u8>, values: &[f32]) -> Vec<u8> {
        make_zip(&[
            ("emb/data.pkl", pickle),
            ("emb/byteorder", b"little".to_vec()),
            ("emb/data/0", le_bytes(values)),
        ])
    }

    #[test]
    fn test_tensor_view_read_from_pickle() {
        let view = tensor_view(&tensor_pickle(6, 0, &[2, 3], &[3, 1])).unwrap();
        assert_eq!(view, TensorView { offset: 0, size: vec![2, 3], stride: vec![3, 1] });
    }

    #[test]
    fn test_torch_view_selects_its_values() {
        // `emb[1]` of a [2, 3] tensor: offset 3 into a storage of six values.
        let storage: Vec<f32> = (0..6).map(|x| x as f32).collect();
        let path = temp_file("view.pt", &torch_archive(tensor_pickle(6, 3, &[3], &[1]), &storage));
        let emb = load(&path, Device::Cpu).unwrap();
        assert_eq!(emb.shape(), &[3]);
        assert_eq!(emb.as_slice(), &[3.0, 4.0, 5.0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_torch_non_contiguous_view_rejected() {
        let storage = [0.0f32; 6];
        let path = temp_file("strided.pt", &torch_archive(tensor_pickle(6, 0, &[3], &[2]), &storage));
        let err = load(&path, Device::Cpu).unwrap_err();
        assert!(format!("{err:#}").contains("non-contiguous"), "got: {err:#}");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_torch_view_past_storage_rejected() {
        let path = temp_file("overrun.pt", &torch_archive(tensor_pickle(2, 1, &[4], &[1]), &[1.0, 2.0]));
        assert!(load(&path, Device::Cpu).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_torch_archive_rejects_half_precision() {
        let bytes = make_zip(&[
            ("e/data.pkl", b"ctorch\nHalfStorage\n".to_vec()),
            ("e/data/0", vec![0u8; 4]),
        ]);
        let path = temp_file("half.pt", &bytes);
        let err = load(&path, Device::Cpu).unwrap_err();
        assert!(format!("{err:#}").contains("HalfStorage"), "got: {err:#}");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_single_array_npz() {
        let bytes = make_zip(&[("emb.npy", make_npy(&[2], &[1.0, 2.0]))]);
        let path = temp_file("emb.npz", &bytes);
        let emb = load(&path, Device::Cpu).unwrap();
        assert_eq!(emb.as_slice(), &[1.0, 2.0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_unknown_format() {
        let path = temp_file("emb.bin", b"garbage!");
        assert!(load(&path, Device::Cpu).is_err());
        std::fs::remove_file(path).ok();
    }
}
