//! NumPy `.npy` v1.0 codec for combined split files.
//!
//! Split files hold a one-dimensional structured array:
//!
//! ```text
//! descr = [('features', '<f4', (D,)), ('label', '<UW')]
//! shape = (N,), fortran_order = False
//! ```
//!
//! Each record is `D` little-endian `f32` values followed by `W` UTF-32LE
//! code units, zero padded. The header is a Python dict literal padded
//! with spaces and terminated by `\n` so the data starts on a 64-byte
//! boundary.
//!
//! Reading also accepts the older `(N, D + 1)` `'<UW'` string matrix, with
//! the label in the last column. Any other dtype is rejected.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::Dataset;
use crate::error::DatasetError;

/// File magic: `\x93NUMPY`.
pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

const VERSION: [u8; 2] = [1, 0];
const PREAMBLE_LEN: usize = MAGIC.len() + 2 + 2;
const ALIGN: usize = 64;

fn header_dict(feature_len: usize, label_width: usize, rows: usize) -> String {
    format!(
        "{{'descr': [('features', '<f4', ({feature_len},)), ('label', '<U{label_width}')], \
         'fortran_order': False, 'shape': ({rows},), }}"
    )
}

fn label_width(dataset: &Dataset) -> usize {
    dataset
        .labels()
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0)
        .max(1)
}

/// Serialize `dataset` into `.npy` bytes.
pub fn encode(dataset: &Dataset) -> Vec<u8> {
    let d = dataset.feature_len();
    let w = label_width(dataset);
    let dict = header_dict(d, w, dataset.len());

    // dict + padding + '\n' so that the preamble and header end on ALIGN
    let unpadded = PREAMBLE_LEN + dict.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    let header_len = dict.len() + padding + 1;

    let record_len = d * 4 + w * 4;
    let mut out = Vec::with_capacity(PREAMBLE_LEN + header_len + record_len * dataset.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');

    for (row, label) in dataset.iter() {
        for value in row {
            out.extend_from_slice(&value.to_le_bytes());
        }
        let mut written = 0;
        for ch in label.chars() {
            out.extend_from_slice(&(ch as u32).to_le_bytes());
            written += 1;
        }
        for _ in written..w {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }
    out
}

/// Parse `.npy` bytes in either accepted layout.
pub fn decode(bytes: &[u8]) -> Result<Dataset, String> {
    if bytes.len() < PREAMBLE_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err("missing NUMPY magic".to_string());
    }
    let (major, minor) = (bytes[6], bytes[7]);
    if (major, minor) != (1, 0) {
        return Err(format!("unsupported format version {major}.{minor}"));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = PREAMBLE_LEN + header_len;
    let header = bytes
        .get(PREAMBLE_LEN..data_start)
        .ok_or_else(|| "truncated header".to_string())?;
    let header = std::str::from_utf8(header).map_err(|e| format!("header is not utf-8: {e}"))?;
    let data = &bytes[data_start..];

    if !header.contains("'fortran_order': False") {
        return Err("only C-order arrays are supported".to_string());
    }
    if header.contains("'descr': [") {
        decode_records(header, data)
    } else if header.contains("'descr': '<U") {
        decode_string_matrix(header, data)
    } else {
        Err("unsupported dtype, expected a structured or '<U' array".to_string())
    }
}

fn decode_records(header: &str, data: &[u8]) -> Result<Dataset, String> {
    let feature_len = number_after(header, "('features', '<f4', (")?;
    let width = number_after(header, "('label', '<U")?;
    let dims = shape(header)?;
    let rows = match dims.as_slice() {
        &[rows] => rows,
        _ => return Err(format!("structured array must be 1-D, got shape {dims:?}")),
    };
    if feature_len == 0 || width == 0 {
        return Err("zero-sized field".to_string());
    }

    let record_len = (feature_len + width) * 4;
    check_data_len(data, rows, record_len)?;

    let mut features = Vec::with_capacity(rows * feature_len);
    let mut labels = Vec::with_capacity(rows);
    for (i, record) in data.chunks_exact(record_len).enumerate() {
        let (feat, text) = record.split_at(feature_len * 4);
        features.extend(
            feat.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        labels.push(utf32_cell(text).map_err(|e| format!("record {i}: {e}"))?);
    }

    Dataset::from_parts(feature_len, features, labels).map_err(|e| e.to_string())
}

/// `np.column_stack((X, y))` output: an `(N, D + 1)` string array whose
/// last column is the label and whose other cells are decimal numbers.
fn decode_string_matrix(header: &str, data: &[u8]) -> Result<Dataset, String> {
    let width = number_after(header, "'descr': '<U")?;
    let dims = shape(header)?;
    let (rows, columns) = match dims.as_slice() {
        &[rows, columns] => (rows, columns),
        _ => return Err(format!("string array must be 2-D, got shape {dims:?}")),
    };
    if width == 0 || columns < 2 {
        return Err("string array needs feature columns and a label column".to_string());
    }

    let cell_len = width
        .checked_mul(4)
        .ok_or_else(|| "shape overflow".to_string())?;
    let row_len = columns
        .checked_mul(cell_len)
        .ok_or_else(|| "shape overflow".to_string())?;
    check_data_len(data, rows, row_len)?;

    let feature_len = columns - 1;
    let mut features = Vec::with_capacity(rows * feature_len);
    let mut labels = Vec::with_capacity(rows);
    for (i, row) in data.chunks_exact(row_len).enumerate() {
        let (cells, label) = row.split_at(feature_len * cell_len);
        for (j, cell) in cells.chunks_exact(cell_len).enumerate() {
            let text = utf32_cell(cell).map_err(|e| format!("row {i} column {j}: {e}"))?;
            let value = text
                .trim()
                .parse::<f32>()
                .map_err(|_| format!("row {i} column {j}: `{text}` is not a number"))?;
            features.push(value);
        }
        labels.push(utf32_cell(label).map_err(|e| format!("row {i} label: {e}"))?);
    }

    Dataset::from_parts(feature_len, features, labels).map_err(|e| e.to_string())
}

fn check_data_len(data: &[u8], rows: usize, row_len: usize) -> Result<(), String> {
    let expected = rows
        .checked_mul(row_len)
        .ok_or_else(|| "shape overflow".to_string())?;
    if data.len() != expected {
        return Err(format!(
            "data section is {} bytes, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

/// Zero-padded UTF-32LE code units.
fn utf32_cell(units: &[u8]) -> Result<String, String> {
    let mut text = String::with_capacity(units.len() / 4);
    for unit in units.chunks_exact(4) {
        let code = u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]);
        if code == 0 {
            break;
        }
        let ch = char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"))?;
        text.push(ch);
    }
    Ok(text)
}

fn shape(header: &str) -> Result<Vec<usize>, String> {
    const PREFIX: &str = "'shape': (";
    let start = header
        .find(PREFIX)
        .ok_or_else(|| format!("header is missing `{PREFIX}`"))?
        + PREFIX.len();
    let end = header[start..]
        .find(')')
        .ok_or_else(|| "unterminated shape".to_string())?
        + start;
    header[start..end]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse().map_err(|_| format!("bad shape dimension `{dim}`")))
        .collect()
}

fn number_after(header: &str, prefix: &str) -> Result<usize, String> {
    let start = header
        .find(prefix)
        .ok_or_else(|| format!("header is missing `{prefix}`"))?
        + prefix.len();
    let digits: String = header[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .map_err(|_| format!("expected a number after `{prefix}`"))
}

/// Write `dataset` to `path` atomically (temp file in the same directory, then rename).
pub fn write_split(path: &Path, dataset: &Dataset) -> Result<(), DatasetError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&encode(dataset))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a split file written by [`write_split`].
pub fn read_split(path: &Path) -> Result<Dataset, DatasetError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes).map_err(|reason| DatasetError::Format {
        path: path.to_path_buf(),
        reason,
    })
}
