//! Minimal text extraction from page content streams
//!
//! Only the text-showing operators are interpreted. Glyph codes are mapped
//! one byte to one character, which is right for simple fonts with a
//! standard encoding and an approximation for everything else.

use log::{trace, warn};

use crate::error::PDFResult;
use crate::pdf::lexer::{find_forward, Lexer, Token};
use crate::pdf::Object;
use crate::storage::RandomAccessStore;

/// Displacement (in thousandths of a text unit) that reads as a word break
const WORD_GAP: f64 = -200.0;

/// Text shown by a content stream
pub fn extract_text(content: &[u8]) -> PDFResult<String> {
    let store = RandomAccessStore::from_bytes(content.to_vec());
    let mut lexer = Lexer::new(&store);
    let mut operands: Vec<Object> = Vec::new();
    let mut text = String::new();

    while let Some(token) = lexer.next_token()? {
        let operator = match token {
            Token::Keyword(operator) => operator,
            Token::Integer(n) => {
                operands.push(Object::Integer(n));
                continue;
            }
            other => {
                match lexer.object_from_token(other) {
                    Ok(object) => operands.push(object),
                    Err(err) => {
                        warn!("Skipping malformed content operand: {}", err);
                        operands.clear();
                    }
                }
                continue;
            }
        };

        match operator.as_str() {
            "Tj" => show(&mut text, operands.last()),
            "'" => {
                new_line(&mut text);
                show(&mut text, operands.last());
            }
            "\"" => {
                new_line(&mut text);
                show(&mut text, operands.get(2));
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.last() {
                    for item in items {
                        match item {
                            Object::String(..) => show(&mut text, Some(item)),
                            other => {
                                if other.as_real().is_some_and(|gap| gap < WORD_GAP) && !text.ends_with(' ') {
                                    text.push(' ');
                                }
                            }
                        }
                    }
                }
            }
            "T*" => new_line(&mut text),
            "Td" | "TD" => {
                let moves_line = operands.get(1).and_then(Object::as_real).is_some_and(|ty| ty != 0.0);
                if moves_line {
                    new_line(&mut text);
                }
            }
            "ET" => new_line(&mut text),
            "BI" => skip_inline_image(&store, &mut lexer),
            _ => trace!("Ignoring content operator {}", operator),
        }
        operands.clear();
    }

    Ok(text.trim_end().to_string())
}

fn show(text: &mut String, operand: Option<&Object>) {
    if let Some(bytes) = operand.and_then(Object::as_bytes) {
        text.extend(bytes.iter().map(|&b| b as char));
    }
}

fn new_line(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

/// Move past `ID <binary> EI`
fn skip_inline_image(store: &RandomAccessStore, lexer: &mut Lexer<'_>) {
    match find_forward(store, lexer.position(), b"EI") {
        Some(end) => lexer.seek(end + 2),
        None => lexer.seek(store.len()),
    }
}
