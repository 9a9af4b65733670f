//! Versioned binary image of a value network.
//!
//! Layout:
//! - magic `GRIDQ001`, version `u32`
//! - `HEAD` chunk: vision size, activation code, learning rate, layer count
//! - `LAYR` chunk (LZ4): per layer `inputs`, `outputs`, weights, biases
//!
//! Unknown chunks are skipped. Optimizer moments are not stored; a loaded
//! network starts with a fresh Adam state.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::network::{Activation, Dense, ValueNetwork};

pub const MAGIC: &[u8; 8] = b"GRIDQ001";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

const TAG_HEAD: [u8; 4] = *b"HEAD";
const TAG_LAYERS: [u8; 4] = *b"LAYR";

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32_le<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_f32_le<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_exact::<4, _>(r)?))
}

fn write_chunk<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    w.write_all(&tag)?;
    write_u32_le(w, payload.len() as u32)?;
    w.write_all(payload)
}

/// LZ4 chunk: `len` covers the 4-byte uncompressed length plus the block.
fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let total_len = u32::try_from(compressed.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?
        .saturating_add(4);

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, payload.len() as u32)?;
    w.write_all(&compressed)
}

fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<Option<([u8; 4], u32)>> {
    let mut tag = [0u8; 4];
    match r.read_exact(&mut tag) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = read_u32_le(r)?;
    Ok(Some((tag, len)))
}

fn storage_err(message: impl Into<String>) -> Error {
    Error::Storage {
        message: message.into(),
    }
}

pub fn save_network_to<W: Write>(net: &ValueNetwork, w: &mut W) -> Result<()> {
    w.write_all(MAGIC)?;
    write_u32_le(w, VERSION_CURRENT)?;

    let mut head = Vec::with_capacity(16);
    write_u32_le(&mut head, net.vision_size() as u32)?;
    write_u32_le(&mut head, net.activation().code())?;
    write_f32_le(&mut head, net.learning_rate())?;
    write_u32_le(&mut head, net.layers().len() as u32)?;
    write_chunk(w, TAG_HEAD, &head)?;

    let mut body = Vec::with_capacity(net.param_count() * 4 + net.layers().len() * 8);
    for layer in net.layers() {
        write_u32_le(&mut body, layer.inputs as u32)?;
        write_u32_le(&mut body, layer.outputs as u32)?;
        for v in layer.weights.iter().chain(layer.biases.iter()) {
            write_f32_le(&mut body, *v)?;
        }
    }
    write_chunk_lz4(w, TAG_LAYERS, &body)?;
    Ok(())
}

pub fn load_network_from<R: Read>(r: &mut R) -> Result<ValueNetwork> {
    let magic = read_exact::<8, _>(r)?;
    if &magic != MAGIC {
        return Err(storage_err("bad network image magic"));
    }
    let version = read_u32_le(r)?;
    if version != VERSION_V1 {
        return Err(storage_err(format!("unsupported image version {version}")));
    }

    let mut head: Option<(usize, Activation, f32, usize)> = None;
    let mut layers: Option<Vec<Dense>> = None;

    while let Some((tag, len)) = read_chunk_header(r)? {
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload)?;
        let mut cur = io::Cursor::new(payload);

        match tag {
            TAG_HEAD => {
                let vision_size = read_u32_le(&mut cur)? as usize;
                let code = read_u32_le(&mut cur)?;
                let activation = Activation::from_code(code)
                    .ok_or_else(|| storage_err(format!("unknown activation code {code}")))?;
                let lr = read_f32_le(&mut cur)?;
                let layer_count = read_u32_le(&mut cur)? as usize;
                head = Some((vision_size, activation, lr, layer_count));
            }
            TAG_LAYERS => {
                let raw_len = read_u32_le(&mut cur)? as usize;
                let start = cur.position() as usize;
                let raw = decompress_lz4(&cur.get_ref()[start..], raw_len)?;
                layers = Some(read_layers(&raw)?);
            }
            _ => {}
        }
    }

    let (vision_size, activation, lr, layer_count) =
        head.ok_or_else(|| storage_err("missing HEAD chunk"))?;
    let layers = layers.ok_or_else(|| storage_err("missing LAYR chunk"))?;
    validate_layers(vision_size, layer_count, &layers)?;

    Ok(ValueNetwork::from_parts(vision_size, activation, layers, lr))
}

fn read_layers(raw: &[u8]) -> Result<Vec<Dense>> {
    let mut cur = io::Cursor::new(raw);
    let mut layers = Vec::new();
    while (cur.position() as usize) < raw.len() {
        let inputs = read_u32_le(&mut cur)? as usize;
        let outputs = read_u32_le(&mut cur)? as usize;
        let count = inputs
            .checked_mul(outputs)
            .filter(|n| n * 4 <= raw.len())
            .ok_or_else(|| storage_err(format!("layer {inputs}x{outputs} exceeds payload")))?;
        let mut weights = Vec::with_capacity(count);
        for _ in 0..count {
            weights.push(read_f32_le(&mut cur)?);
        }
        let mut biases = Vec::new();
        for _ in 0..outputs {
            biases.push(read_f32_le(&mut cur)?);
        }
        layers.push(Dense {
            inputs,
            outputs,
            weights,
            biases,
        });
    }
    Ok(layers)
}

fn validate_layers(vision_size: usize, layer_count: usize, layers: &[Dense]) -> Result<()> {
    if layers.len() != layer_count || layers.is_empty() {
        return Err(storage_err(format!(
            "expected {layer_count} layers, found {}",
            layers.len()
        )));
    }
    let side = crate::codec::side_for_vision(vision_size);
    let mut width = side * side;
    for (i, l) in layers.iter().enumerate() {
        if l.inputs != width {
            return Err(storage_err(format!(
                "layer {i} takes {} inputs, previous layer yields {width}",
                l.inputs
            )));
        }
        width = l.outputs;
    }
    if width != crate::policy::BUTTON_COUNT {
        return Err(storage_err(format!(
            "head has {width} outputs, expected {}",
            crate::policy::BUTTON_COUNT
        )));
    }
    Ok(())
}
