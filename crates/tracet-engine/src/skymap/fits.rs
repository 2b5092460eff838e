//! Minimal FITS reader: locates the first BINTABLE extension and reads
//! numeric columns from it. Only what multi-order skymaps need.

use std::collections::HashMap;

use tracet_core::errors::SkymapError;

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Parsed header: keyword → raw value text (strings unquoted).
#[derive(Debug, Default)]
struct Header {
    values: HashMap<String, String>,
    len: usize,
}

impl Header {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn int(&self, key: &str) -> Result<Option<i64>, SkymapError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|_| SkymapError::InvalidFits(format!("{key} is not an integer: {v}"))),
        }
    }

    fn required_int(&self, key: &str) -> Result<i64, SkymapError> {
        self.int(key)?
            .ok_or_else(|| SkymapError::InvalidFits(format!("missing {key}")))
    }
}

fn parse_header(bytes: &[u8], start: usize) -> Result<Header, SkymapError> {
    let mut header = Header::default();
    let mut pos = start;
    loop {
        let card = bytes
            .get(pos..pos + CARD)
            .ok_or_else(|| SkymapError::InvalidFits("header ended without END".into()))?;
        pos += CARD;
        if !card.is_ascii() {
            return Err(SkymapError::InvalidFits("non-ASCII header card".into()));
        }
        let card = std::str::from_utf8(card)
            .map_err(|_| SkymapError::InvalidFits("non-ASCII header card".into()))?;
        let key = card[..8].trim();
        if key == "END" {
            break;
        }
        if &card[8..10] != "= " {
            continue;
        }
        header
            .values
            .insert(key.to_string(), parse_value(&card[10..]));
    }
    let used = pos - start;
    header.len = used.div_ceil(BLOCK) * BLOCK;
    Ok(header)
}

fn parse_value(raw: &str) -> String {
    let raw = raw.trim_start();
    if let Some(rest) = raw.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                    continue;
                }
                break;
            }
            out.push(c);
        }
        return out.trim_end().to_string();
    }
    raw.split('/').next().unwrap_or("").trim().to_string()
}

/// Bytes occupied by an HDU's data section, padded to whole blocks.
fn data_len(header: &Header) -> Result<usize, SkymapError> {
    let naxis = header.required_int("NAXIS")?;
    if naxis == 0 {
        return Ok(0);
    }
    let bitpix = header.required_int("BITPIX")?;
    let mut elements: i64 = 1;
    for i in 1..=naxis {
        elements = elements.saturating_mul(header.required_int(&format!("NAXIS{i}"))?);
    }
    let pcount = header.int("PCOUNT")?.unwrap_or(0);
    let gcount = header.int("GCOUNT")?.unwrap_or(1);
    let bits = bitpix
        .abs()
        .saturating_mul(gcount)
        .saturating_mul(pcount.saturating_add(elements));
    let len = usize::try_from(bits / 8)
        .map_err(|_| SkymapError::InvalidFits("negative data size".into()))?;
    Ok(len.div_ceil(BLOCK) * BLOCK)
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    code: char,
    repeat: usize,
    offset: usize,
}

fn parse_tform(tform: &str) -> Result<(usize, char), SkymapError> {
    let tform = tform.trim();
    let digits: String = tform.chars().take_while(char::is_ascii_digit).collect();
    let code = tform[digits.len()..]
        .chars()
        .next()
        .ok_or_else(|| SkymapError::UnsupportedFormat(tform.to_string()))?;
    let repeat = if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| SkymapError::UnsupportedFormat(tform.to_string()))?
    };
    Ok((repeat, code))
}

fn field_width(repeat: usize, code: char) -> Result<usize, SkymapError> {
    let size = match code {
        'L' | 'B' | 'A' => 1,
        'X' => return Ok(repeat.div_ceil(8)),
        'I' => 2,
        'J' | 'E' => 4,
        'K' | 'D' | 'C' | 'P' => 8,
        'M' | 'Q' => 16,
        other => return Err(SkymapError::UnsupportedFormat(other.to_string())),
    };
    Ok(size * repeat)
}

/// The first binary table of a FITS file.
#[derive(Debug, Clone)]
pub struct BinTable {
    columns: Vec<Column>,
    row_len: usize,
    rows: usize,
    data: Vec<u8>,
}

impl BinTable {
    pub fn rows(&self) -> usize {
        self.rows
    }

    fn column(&self, name: &str) -> Result<&Column, SkymapError> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SkymapError::MissingColumn(name.to_string()))
    }

    fn cell(&self, row: usize, col: &Column, width: usize) -> &[u8] {
        let start = row * self.row_len + col.offset;
        &self.data[start..start + width]
    }

    /// First element of each row of an integer column.
    pub fn column_i64(&self, name: &str) -> Result<Vec<i64>, SkymapError> {
        let col = self.column(name)?;
        let read: fn(&[u8]) -> i64 = match col.code {
            'K' => |b: &[u8]| i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            'J' => |b: &[u8]| i64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            'I' => |b: &[u8]| i64::from(i16::from_be_bytes([b[0], b[1]])),
            'B' => |b: &[u8]| i64::from(b[0]),
            other => return Err(SkymapError::UnsupportedFormat(format!("{name}: {other}"))),
        };
        let width = field_width(1, col.code)?;
        Ok((0..self.rows).map(|r| read(self.cell(r, col, width))).collect())
    }

    /// First element of each row of a floating-point column.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, SkymapError> {
        let col = self.column(name)?;
        let read: fn(&[u8]) -> f64 = match col.code {
            'D' => |b: &[u8]| f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            'E' => |b: &[u8]| f64::from(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            other => return Err(SkymapError::UnsupportedFormat(format!("{name}: {other}"))),
        };
        let width = field_width(1, col.code)?;
        Ok((0..self.rows).map(|r| read(self.cell(r, col, width))).collect())
    }
}

/// Locate and load the first BINTABLE extension.
pub fn read_bintable(bytes: &[u8]) -> Result<BinTable, SkymapError> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        return Err(SkymapError::InvalidFits(
            "gzip-compressed skymaps are not supported".into(),
        ));
    }
    if !bytes.starts_with(b"SIMPLE") {
        return Err(SkymapError::InvalidFits("missing SIMPLE primary header".into()));
    }

    let mut pos = 0;
    while pos < bytes.len() {
        let header = parse_header(bytes, pos)?;
        let data_start = pos + header.len;
        let data_size = data_len(&header)?;

        if header.get("XTENSION") == Some("BINTABLE") {
            return load_table(bytes, &header, data_start);
        }
        pos = data_start
            .checked_add(data_size)
            .ok_or_else(|| SkymapError::InvalidFits("data size overflow".into()))?;
    }
    Err(SkymapError::InvalidFits("no BINTABLE extension".into()))
}

fn load_table(bytes: &[u8], header: &Header, data_start: usize) -> Result<BinTable, SkymapError> {
    let row_len = usize::try_from(header.required_int("NAXIS1")?)
        .map_err(|_| SkymapError::InvalidFits("negative NAXIS1".into()))?;
    let rows = usize::try_from(header.required_int("NAXIS2")?)
        .map_err(|_| SkymapError::InvalidFits("negative NAXIS2".into()))?;
    let fields = header.required_int("TFIELDS")?;

    let mut columns = Vec::new();
    let mut offset = 0;
    for i in 1..=fields {
        let tform = header
            .get(&format!("TFORM{i}"))
            .ok_or_else(|| SkymapError::InvalidFits(format!("missing TFORM{i}")))?;
        let (repeat, code) = parse_tform(tform)?;
        let name = header
            .get(&format!("TTYPE{i}"))
            .unwrap_or_default()
            .to_string();
        columns.push(Column {
            name,
            code,
            repeat,
            offset,
        });
        offset += field_width(repeat, code)?;
    }
    if offset > row_len {
        return Err(SkymapError::InvalidFits(format!(
            "columns need {offset} bytes but rows are {row_len}"
        )));
    }

    let needed = row_len
        .checked_mul(rows)
        .ok_or_else(|| SkymapError::InvalidFits("table too large".into()))?;
    let end = data_start
        .checked_add(needed)
        .ok_or_else(|| SkymapError::InvalidFits("table too large".into()))?;
    let data = bytes
        .get(data_start..end)
        .ok_or_else(|| SkymapError::InvalidFits("truncated table data".into()))?
        .to_vec();

    Ok(BinTable {
        columns: columns.into_iter().filter(|c| c.repeat > 0).collect(),
        row_len,
        rows,
        data,
    })
}

/// Builders for synthetic multi-order skymaps used across the test suites.
#[cfg(test)]
pub(crate) mod testutil {
    use super::{BLOCK, CARD};

    fn card(key: &str, value: &str) -> String {
        let mut c = format!("{key:<8}= {value:>20}");
        c.truncate(CARD);
        format!("{c:<80}")
    }

    fn pad(buf: &mut Vec<u8>, fill: u8) {
        while buf.len() % BLOCK != 0 {
            buf.push(fill);
        }
    }

    /// FITS file with an empty primary HDU and a (UNIQ K, PROBDENSITY D) table.
    pub fn multiorder_fits(rows: &[(i64, f64)]) -> Vec<u8> {
        let mut out = Vec::new();
        for c in [
            card("SIMPLE", "T"),
            card("BITPIX", "8"),
            card("NAXIS", "0"),
            card("EXTEND", "T"),
        ] {
            out.extend_from_slice(c.as_bytes());
        }
        out.extend_from_slice(format!("{:<80}", "END").as_bytes());
        pad(&mut out, b' ');

        for c in [
            card("XTENSION", "'BINTABLE'"),
            card("BITPIX", "8"),
            card("NAXIS", "2"),
            card("NAXIS1", "16"),
            card("NAXIS2", &rows.len().to_string()),
            card("PCOUNT", "0"),
            card("GCOUNT", "1"),
            card("TFIELDS", "2"),
            card("TTYPE1", "'UNIQ    '"),
            card("TFORM1", "'K       '"),
            card("TTYPE2", "'PROBDENSITY'"),
            card("TFORM2", "'D       '"),
            card("ORDERING", "'NUNIQ   '"),
        ] {
            out.extend_from_slice(c.as_bytes());
        }
        out.extend_from_slice(format!("{:<80}", "END").as_bytes());
        pad(&mut out, b' ');

        for (uniq, density) in rows {
            out.extend_from_slice(&uniq.to_be_bytes());
            out.extend_from_slice(&density.to_be_bytes());
        }
        pad(&mut out, 0);
        out
    }

    /// Whole-sky map at `order` with density given by `f(ra, dec)` at each
    /// pixel's approximate centre.
    pub fn sky_map(order: u32, f: impl Fn(f64, f64) -> f64) -> Vec<u8> {
        let nside = 1u64 << order;
        let npix = 12 * nside * nside;
        let mut density = vec![0.0; npix as usize];
        // Sample a fine lat/lon grid and record the density at each pixel hit.
        let steps = (nside * 16) as i64;
        for i in 0..steps * 2 {
            for j in 0..steps {
                let ra = 360.0 * (i as f64 + 0.5) / (steps * 2) as f64;
                let dec = -90.0 + 180.0 * (j as f64 + 0.5) / steps as f64;
                let pix = super::super::healpix::ang2pix_nest(order, ra, dec);
                density[pix as usize] = f(ra, dec);
            }
        }
        let base = 4 * nside * nside;
        let rows: Vec<(i64, f64)> = density
            .iter()
            .enumerate()
            .map(|(pix, d)| ((base + pix as u64) as i64, *d))
            .collect();
        multiorder_fits(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::multiorder_fits;
    use super::*;

    #[test]
    fn reads_uniq_and_density_columns() {
        let bytes = multiorder_fits(&[(4, 0.5), (5, 1.5), (16, 2.5)]);
        assert_eq!(bytes.len() % BLOCK, 0);
        let table = read_bintable(&bytes).unwrap();
        assert_eq!(table.rows(), 3);
        assert_eq!(table.column_i64("UNIQ").unwrap(), vec![4, 5, 16]);
        assert_eq!(table.column_f64("probdensity").unwrap(), vec![0.5, 1.5, 2.5]);
    }

    #[test]
    fn missing_column_is_reported() {
        let bytes = multiorder_fits(&[(4, 0.5)]);
        let table = read_bintable(&bytes).unwrap();
        let err = table.column_f64("DISTMU").unwrap_err();
        assert!(matches!(err, SkymapError::MissingColumn(_)));
    }

    #[test]
    fn rejects_gzip_and_garbage() {
        assert!(read_bintable(&[0x1f, 0x8b, 0x08]).is_err());
        assert!(read_bintable(b"not a fits file").is_err());
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut bytes = multiorder_fits(&[(4, 0.5), (5, 1.5)]);
        bytes.truncate(BLOCK * 2 + 8);
        assert!(read_bintable(&bytes).is_err());
    }

    #[test]
    fn parses_quoted_and_commented_values() {
        assert_eq!(parse_value(" 'BINTABLE'           / binary table"), "BINTABLE");
        assert_eq!(parse_value(" 'O''HARA '"), "O'HARA");
        assert_eq!(parse_value("                   16 / width"), "16");
    }

    #[test]
    fn tform_repeat_counts() {
        assert_eq!(parse_tform("K").unwrap(), (1, 'K'));
        assert_eq!(parse_tform("1D").unwrap(), (1, 'D'));
        assert_eq!(parse_tform("20A").unwrap(), (20, 'A'));
        assert!(parse_tform("").is_err());
    }
}
