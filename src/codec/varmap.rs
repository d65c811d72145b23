//! Self-describing option-map sub-format.
//!
//! `builtin_options` and `custom_options` carry heterogeneous structured
//! parameters (padding plans, thread counts) that later passes and the
//! runtime must read back exactly, including type tags. Every value is a
//! one-byte tag followed by its payload; maps and sequences are count-
//! prefixed. Encoding iterates the map in key order, so the same logical
//! map always produces the same bytes.

use crate::error::{Error, Result};
use crate::ir::{OptionValue, Options};

use super::wire::{Reader, Writer};

const TAG_BOOL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_SEQ: u8 = 4;

pub fn encode_options(options: &Options, w: &mut Writer) {
    w.put_u32(options.len() as u32);
    for (key, value) in options {
        w.put_str(key);
        encode_value(value, w);
    }
}

fn encode_value(value: &OptionValue, w: &mut Writer) {
    match value {
        OptionValue::Bool(v) => {
            w.put_u8(TAG_BOOL);
            w.put_u8(u8::from(*v));
        }
        OptionValue::Int(v) => {
            w.put_u8(TAG_INT);
            w.put_i64(*v);
        }
        OptionValue::Float(v) => {
            w.put_u8(TAG_FLOAT);
            w.put_f64(*v);
        }
        OptionValue::Str(v) => {
            w.put_u8(TAG_STR);
            w.put_str(v);
        }
        OptionValue::Seq(items) => {
            w.put_u8(TAG_SEQ);
            w.put_u32(items.len() as u32);
            for item in items {
                encode_value(item, w);
            }
        }
    }
}

pub fn decode_options(r: &mut Reader) -> Result<Options> {
    let count = r.get_u32()?;
    let mut options = Options::new();
    for _ in 0..count {
        let key = r.get_str()?;
        let value = decode_value(r)?;
        if options.insert(key.clone(), value).is_some() {
            return Err(Error::format(format!("duplicate option key '{key}'")));
        }
    }
    Ok(options)
}

fn decode_value(r: &mut Reader) -> Result<OptionValue> {
    let tag = r.get_u8()?;
    Ok(match tag {
        TAG_BOOL => OptionValue::Bool(r.get_u8()? != 0),
        TAG_INT => OptionValue::Int(r.get_i64()?),
        TAG_FLOAT => OptionValue::Float(r.get_f64()?),
        TAG_STR => OptionValue::Str(r.get_str()?),
        TAG_SEQ => {
            let count = r.get_u32()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_value(r)?);
            }
            OptionValue::Seq(items)
        }
        other => return Err(Error::format(format!("unknown option value tag {other}"))),
    })
}
