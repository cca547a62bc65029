//! Stream filters used by the container layer
//!
//! Only the filters the container itself needs are provided: Flate for
//! cross-reference streams, object streams and page content, and ASCIIHex.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{trace, warn};

use super::{Dictionary, Object};
use crate::error::{PDFError, PDFResult};

/// PDF stream filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    ASCIIHexDecode,
    FlateDecode,
}

/// Filter processing parameters from `/DecodeParms`
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub predictor: u8,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
    pub compression_level: u32,
}

impl Default for FilterContext {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
            compression_level: 6,
        }
    }
}

impl FilterContext {
    /// Read parameters from a decode parameter dictionary
    pub fn from_params(params: Option<&Dictionary>) -> Self {
        let mut ctx = Self::default();
        if let Some(params) = params {
            ctx.predictor = params.get_integer("Predictor").unwrap_or(1).clamp(0, 255) as u8;
            ctx.columns = params.get_integer("Columns").unwrap_or(1).max(1) as usize;
            ctx.colors = params.get_integer("Colors").unwrap_or(1).max(1) as usize;
            ctx.bits_per_component = params.get_integer("BitsPerComponent").unwrap_or(8).max(1) as usize;
        }
        ctx
    }
}

impl Filter {
    /// Create filter from name
    pub fn from_name(name: &str) -> PDFResult<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Ok(Filter::ASCIIHexDecode),
            "FlateDecode" | "Fl" => Ok(Filter::FlateDecode),
            _ => Err(PDFError::UnsupportedFilter(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::ASCIIHexDecode => "ASCIIHexDecode",
            Filter::FlateDecode => "FlateDecode",
        }
    }

    /// Decode data using this filter
    pub fn decode(&self, data: &[u8], ctx: &FilterContext) -> PDFResult<Vec<u8>> {
        let result = match self {
            Filter::ASCIIHexDecode => decode_ascii_hex(data)?,
            Filter::FlateDecode => decode_flate(data)?,
        };

        if ctx.predictor > 1 {
            apply_predictor(&result, ctx)
        } else {
            Ok(result)
        }
    }

    /// Encode data using this filter
    pub fn encode(&self, data: &[u8], ctx: &FilterContext) -> PDFResult<Vec<u8>> {
        match self {
            Filter::ASCIIHexDecode => {
                let mut output = hex::encode_upper(data).into_bytes();
                output.push(b'>');
                Ok(output)
            }
            Filter::FlateDecode => encode_flate(data, ctx.compression_level),
        }
    }
}

/// Filters and their parameters declared by a stream dictionary, in order
pub fn filter_chain(dict: &Dictionary) -> PDFResult<Vec<(Filter, FilterContext)>> {
    let names: Vec<&str> = match dict.get("Filter") {
        None | Some(Object::Null) => return Ok(Vec::new()),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(PDFError::InvalidObjectType {
                expected: "Name",
                found: other.type_name(),
            })
        }
    };

    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(params)) => vec![Some(params)],
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| match item {
                Object::Dictionary(params) => Some(params),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let ctx = FilterContext::from_params(params.get(i).copied().flatten());
            Filter::from_name(name).map(|filter| (filter, ctx))
        })
        .collect()
}

/// Run `data` through every filter of `dict`
pub fn decode_all(dict: &Dictionary, data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = data.to_vec();
    for (filter, ctx) in filter_chain(dict)? {
        trace!("Applying filter: {:?}", filter);
        output = filter.decode(&output, &ctx)?;
    }
    Ok(output)
}

fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() / 2);
    let mut value = 0u8;
    let mut high_digit = true;

    for &byte in data {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'F' => byte - b'A' + 10,
            b'a'..=b'f' => byte - b'a' + 10,
            b'>' => break,
            b if super::object::is_whitespace(b) => continue,
            _ => {
                return Err(PDFError::malformed(format!(
                    "Invalid hex character: {}",
                    byte
                )))
            }
        };

        if high_digit {
            value = digit << 4;
        } else {
            output.push(value | digit);
        }
        high_digit = !high_digit;
    }

    if !high_digit {
        output.push(value);
    }
    Ok(output)
}

fn decode_flate(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    match ZlibDecoder::new(data).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            warn!("Flate data ends early ({}), keeping {} bytes", e, output.len());
            Ok(output)
        }
        Err(e) => Err(PDFError::CompressionError(e.to_string())),
    }
}

fn encode_flate(data: &[u8], level: u32) -> PDFResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| PDFError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PDFError::CompressionError(e.to_string()))
}

fn apply_predictor(data: &[u8], ctx: &FilterContext) -> PDFResult<Vec<u8>> {
    let bytes_per_pixel = ((ctx.colors * ctx.bits_per_component + 7) / 8).max(1);
    let bytes_per_row = (ctx.columns * ctx.colors * ctx.bits_per_component + 7) / 8;
    let mut output = Vec::with_capacity(data.len());

    match ctx.predictor {
        2 => {
            // TIFF predictor, 8-bit components only
            for row in data.chunks(bytes_per_row) {
                let start = output.len();
                for (i, &byte) in row.iter().enumerate() {
                    let left = if i >= bytes_per_pixel {
                        output[start + i - bytes_per_pixel]
                    } else {
                        0
                    };
                    output.push(byte.wrapping_add(left));
                }
            }
            Ok(output)
        }
        10..=15 => {
            let mut prev_row = vec![0u8; bytes_per_row];
            let mut row_out = vec![0u8; bytes_per_row];

            for row in data.chunks(bytes_per_row + 1) {
                if row.len() < 2 {
                    break;
                }
                let filter_type = row[0];
                let row_data = &row[1..];

                for i in 0..row_data.len() {
                    let left = if i >= bytes_per_pixel { row_out[i - bytes_per_pixel] } else { 0 };
                    let up = prev_row[i];
                    let up_left = if i >= bytes_per_pixel { prev_row[i - bytes_per_pixel] } else { 0 };

                    let predicted = match filter_type {
                        0 => 0,
                        1 => left,
                        2 => up,
                        3 => ((left as u16 + up as u16) / 2) as u8,
                        4 => paeth(left, up, up_left),
                        _ => {
                            return Err(PDFError::malformed(format!(
                                "Invalid PNG filter type {}",
                                filter_type
                            )))
                        }
                    };
                    row_out[i] = row_data[i].wrapping_add(predicted);
                }

                output.extend_from_slice(&row_out[..row_data.len()]);
                prev_row[..row_data.len()].copy_from_slice(&row_out[..row_data.len()]);
            }
            Ok(output)
        }
        other => Err(PDFError::malformed(format!("Invalid predictor {}", other))),
    }
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = left as i16 + up as i16 - up_left as i16;
    let pa = (p - left as i16).abs();
    let pb = (p - up as i16).abs();
    let pc = (p - up_left as i16).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}
