//! Quanta snapshot files.
//!
//! Binary: `[i32; 3]` field size, `u64` quanta count, then the raw quanta
//! array, all little-endian. Text: a header line
//! `FieldSize: x y z QuantaCount: n` followed by one line per quanta,
//! `[i] pos(x y z w) res(x y z w) inf(x y z w) mana(x y z w)`.
//!
//! Loads parse into a temporary and only replace the field once the whole
//! file checked out, so a failed load never leaves a half-written field.

use std::fmt::Write as _;
use std::path::Path;

use crate::core::error::Error;
use crate::core::Result;
use crate::sim::quanta::{Quanta, QuantaField};

const QUANTA_BYTES: usize = std::mem::size_of::<Quanta>();
const HEADER_BYTES: usize = 12 + 8;

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Encode a field as a binary blob
pub fn to_blob(field: &QuantaField) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_BYTES + field.len() * QUANTA_BYTES);
    for s in field.field_size {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes.extend_from_slice(&(field.len() as u64).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(&field.quanta));
    bytes
}

/// Decode a blob holding exactly `expected` quanta
pub fn from_blob(bytes: &[u8], expected: usize) -> Result<QuantaField> {
    if bytes.len() < HEADER_BYTES {
        return Err(Error::Format(format!("blob is {} bytes, header needs {}", bytes.len(), HEADER_BYTES)));
    }
    let word = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    let field_size = [word(0), word(4), word(8)];
    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[12..HEADER_BYTES]);
    let count = u64::from_le_bytes(count);

    if count != expected as u64 {
        return Err(Error::QuantaCountMismatch { expected: expected as u64, found: count });
    }
    let body = &bytes[HEADER_BYTES..];
    if body.len() != expected * QUANTA_BYTES {
        return Err(Error::Format(format!(
            "blob body is {} bytes, {} quanta need {}",
            body.len(),
            expected,
            expected * QUANTA_BYTES
        )));
    }
    let quanta: Vec<Quanta> = body.chunks_exact(QUANTA_BYTES).map(bytemuck::pod_read_unaligned).collect();
    Ok(QuantaField { field_size, quanta })
}

/// Encode a field as text
pub fn to_text(field: &QuantaField) -> String {
    let mut out = String::with_capacity(64 + field.len() * 96);
    let [x, y, z] = field.field_size;
    let _ = writeln!(out, "FieldSize: {} {} {} QuantaCount: {}", x, y, z, field.len());
    for (i, q) in field.quanta.iter().enumerate() {
        let [px, py, pz, pw] = q.position;
        let [rx, ry, rz, rw] = q.resonance;
        let [ix, iy, iz, iw] = q.information;
        let [mx, my, mz, mw] = q.mana;
        let _ = writeln!(
            out,
            "[{}] pos({} {} {} {}) res({} {} {} {}) inf({} {} {} {}) mana({} {} {} {})",
            i, px, py, pz, pw, rx, ry, rz, rw, ix, iy, iz, iw, mx, my, mz, mw
        );
    }
    out
}

/// Values inside `tag(...)` on one line
fn group<'a>(line: &'a str, tag: &str, lineno: usize) -> Result<[&'a str; 4]> {
    let start = line
        .find(&format!("{}(", tag))
        .ok_or_else(|| Error::Format(format!("line {}: missing {}(", lineno, tag)))?
        + tag.len()
        + 1;
    let end = line[start..]
        .find(')')
        .ok_or_else(|| Error::Format(format!("line {}: unterminated {}(", lineno, tag)))?;
    let mut parts = line[start..start + end].split_whitespace();
    let mut values = [""; 4];
    for v in &mut values {
        *v = parts
            .next()
            .ok_or_else(|| Error::Format(format!("line {}: {}() needs 4 values", lineno, tag)))?;
    }
    if parts.next().is_some() {
        return Err(Error::Format(format!("line {}: {}() has more than 4 values", lineno, tag)));
    }
    Ok(values)
}

fn parse<T: std::str::FromStr>(s: &str, lineno: usize) -> Result<T> {
    s.parse()
        .map_err(|_| Error::Format(format!("line {}: bad number {:?}", lineno, s)))
}

fn parse4<T: std::str::FromStr + Copy + Default>(values: [&str; 4], lineno: usize) -> Result<[T; 4]> {
    let mut out = [T::default(); 4];
    for (o, v) in out.iter_mut().zip(values) {
        *o = parse(v, lineno)?;
    }
    Ok(out)
}

/// Decode text holding exactly `expected` quanta
pub fn from_text(text: &str, expected: usize) -> Result<QuantaField> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()).peekable();

    // The header may also be split over two lines
    let mut header = String::new();
    while let Some((_, line)) = lines.peek() {
        if line.trim_start().starts_with('[') {
            break;
        }
        header.push_str(line);
        header.push(' ');
        lines.next();
    }
    let tokens: Vec<&str> = header.split_whitespace().collect();
    let field_size = match tokens.iter().position(|t| *t == "FieldSize:") {
        Some(i) if i + 3 < tokens.len() => [parse(tokens[i + 1], 1)?, parse(tokens[i + 2], 1)?, parse(tokens[i + 3], 1)?],
        _ => return Err(Error::Format("missing FieldSize header".into())),
    };
    let count: u64 = match tokens.iter().position(|t| *t == "QuantaCount:") {
        Some(i) if i + 1 < tokens.len() => parse(tokens[i + 1], 1)?,
        _ => return Err(Error::Format("missing QuantaCount header".into())),
    };
    if count != expected as u64 {
        return Err(Error::QuantaCountMismatch { expected: expected as u64, found: count });
    }

    let mut quanta = vec![Quanta::default(); expected];
    let mut seen = vec![false; expected];
    for (index, line) in lines {
        let lineno = index + 1;
        let close = line
            .find(']')
            .ok_or_else(|| Error::Format(format!("line {}: missing index", lineno)))?;
        let i: usize = parse(line.trim_start().trim_start_matches('[').split(']').next().unwrap_or(""), lineno)?;
        if i >= expected || seen[i] {
            return Err(Error::Format(format!("line {}: index {} out of range or repeated", lineno, i)));
        }
        let rest = &line[close + 1..];
        quanta[i] = Quanta {
            position: parse4(group(rest, "pos", lineno)?, lineno)?,
            resonance: parse4(group(rest, "res", lineno)?, lineno)?,
            information: parse4(group(rest, "inf", lineno)?, lineno)?,
            mana: parse4(group(rest, "mana", lineno)?, lineno)?,
        };
        seen[i] = true;
    }
    let missing = seen.iter().filter(|s| !**s).count();
    if missing > 0 {
        return Err(Error::Format(format!("{} quanta lines missing", missing)));
    }
    Ok(QuantaField { field_size, quanta })
}

impl QuantaField {
    /// Write a binary snapshot, creating parent directories
    pub fn save_blob(&self, path: &Path) -> Result<()> {
        create_parent(path)?;
        std::fs::write(path, to_blob(self))?;
        log::info!("Quanta blob written to {} ({} quanta)", path.display(), self.len());
        Ok(())
    }

    /// Write a text snapshot, creating parent directories
    pub fn save_text(&self, path: &Path) -> Result<()> {
        create_parent(path)?;
        std::fs::write(path, to_text(self))?;
        log::info!("Quanta text written to {}", path.display());
        Ok(())
    }

    /// Replace this field from a binary snapshot with the same quanta count.
    ///
    /// On any error the field is left as it was.
    pub fn load_blob(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let loaded = from_blob(&bytes, self.len()).inspect_err(|e| {
            log::warn!("Quanta blob {} rejected: {}", path.display(), e);
        })?;
        *self = loaded;
        log::info!("Quanta blob loaded from {} (field {:?})", path.display(), self.field_size);
        Ok(())
    }

    /// Replace this field from a text snapshot with the same quanta count.
    ///
    /// On any error the field is left as it was.
    pub fn load_text(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let loaded = from_text(&text, self.len()).inspect_err(|e| {
            log::warn!("Quanta text {} rejected: {}", path.display(), e);
        })?;
        *self = loaded;
        log::info!("Quanta text loaded from {} (field {:?})", path.display(), self.field_size);
        Ok(())
    }
}
