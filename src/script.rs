//! Script values: parsed chunks and their ASM, hex and binary renderings.

use std::fmt;

use bitcoin::hex::{DisplayHex, FromHex};

use crate::{
    num::encode_num,
    opcodes::{
        self, MAX_PUSH_OPCODE, OP_0, OP_1, OP_1NEGATE, OP_CODESEPARATOR, OP_PUSHDATA1,
        OP_PUSHDATA2, OP_PUSHDATA4,
    },
    EncodingError, ParseError,
};

/// Largest payload a single push may carry (1 GiB).
pub const MAX_PUSH_SIZE: usize = 1024 * 1024 * 1024;

/// One instruction: an opcode plus the payload of a push.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub op: u8,
    pub data: Option<Vec<u8>>,
}

impl Chunk {
    pub fn op(op: u8) -> Self {
        Self { op, data: None }
    }

    /// Builds the minimal push for `data`.
    pub fn push(data: &[u8]) -> Result<Self, EncodingError> {
        if data.len() > MAX_PUSH_SIZE {
            return Err(EncodingError::OversizedPush {
                len: data.len(),
                max: MAX_PUSH_SIZE,
            });
        }
        let chunk = match data {
            [] => Self::op(OP_0),
            [value @ 1..=16] => Self::op(OP_1 + value - 1),
            [0x81] => Self::op(OP_1NEGATE),
            _ => Self {
                op: push_opcode_for_len(data.len()),
                data: Some(data.to_vec()),
            },
        };
        Ok(chunk)
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Whether this push uses the smallest encoding for its payload.
    ///
    /// Non-push chunks are trivially minimal.
    pub fn is_minimal_push(&self) -> bool {
        if self.op > OP_PUSHDATA4 {
            return true;
        }
        let data = self.data();
        if data.is_empty() {
            return self.op == OP_0;
        }
        if data.len() == 1 {
            let value = data[0];
            if value == 0x81 {
                return self.op == OP_1NEGATE;
            }
            if (1..=16).contains(&value) {
                return self.op == OP_1 + value - 1;
            }
        }
        if data.len() < OP_PUSHDATA1 as usize {
            return self.op as usize == data.len();
        }
        if data.len() <= 0xff {
            return self.op == OP_PUSHDATA1;
        }
        if data.len() <= 0xffff {
            return self.op == OP_PUSHDATA2;
        }
        self.op == OP_PUSHDATA4
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.op);
        let Some(data) = &self.data else {
            return;
        };
        match self.op {
            1..=0x4b => {}
            OP_PUSHDATA1 => out.push(data.len() as u8),
            OP_PUSHDATA2 => out.extend_from_slice(&(data.len() as u16).to_le_bytes()),
            OP_PUSHDATA4 => out.extend_from_slice(&(data.len() as u32).to_le_bytes()),
            _ => return,
        }
        out.extend_from_slice(data);
    }

    fn asm_token(&self) -> String {
        if let Some(data) = &self.data {
            if self.op == push_opcode_for_len(data.len()) {
                return data.to_lower_hex_string();
            }
            let name = opcodes::display_name(self.op);
            if data.is_empty() {
                return format!("{name} 0");
            }
            return format!("{name} {} {}", data.len(), data.to_lower_hex_string());
        }
        match self.op {
            OP_0 => "0".to_string(),
            OP_1NEGATE => "-1".to_string(),
            op => opcodes::display_name(op),
        }
    }
}

/// Length-based push opcode, without the small-integer shortcuts.
fn push_opcode_for_len(len: usize) -> u8 {
    if len < OP_PUSHDATA1 as usize {
        len as u8
    } else if len <= 0xff {
        OP_PUSHDATA1
    } else if len <= 0xffff {
        OP_PUSHDATA2
    } else {
        OP_PUSHDATA4
    }
}

/// Largest payload an `OP_PUSHDATAn` length prefix can describe.
fn pushdata_capacity(op: u8) -> usize {
    match op {
        OP_PUSHDATA1 => 0xff,
        OP_PUSHDATA2 => 0xffff,
        _ => u32::MAX as usize,
    }
}

/// An ordered list of chunks. Its binary serialization is its identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Script {
    chunks: Vec<Chunk>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Parses space-separated ASM.
    ///
    /// Tokens are opcode mnemonics, the literals `0` and `-1`, an
    /// `OP_PUSHDATAn <len> <hex>` triple, or bare hex payloads whose push
    /// opcode is inferred from their length.
    pub fn from_asm(asm: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = asm.split_whitespace().collect();
        let mut chunks = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            match opcodes::from_name(token) {
                Some(op @ (OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4)) => {
                    let missing = || ParseError::MissingPushData {
                        opcode: token.to_string(),
                        index: i,
                    };
                    let declared = *tokens.get(i + 1).ok_or_else(missing)?;
                    // An empty payload has no hex token: `OP_PUSHDATA1 0`.
                    let (data, consumed) = if declared == "0" {
                        (Vec::new(), 2)
                    } else {
                        let payload = tokens.get(i + 2).ok_or_else(missing)?;
                        (decode_hex_token(payload)?, 3)
                    };
                    if declared.parse::<usize>().ok() != Some(data.len()) {
                        return Err(ParseError::PushLengthMismatch {
                            opcode: token.to_string(),
                            index: i,
                            declared: declared.to_string(),
                            actual: data.len(),
                        });
                    }
                    if data.len() > pushdata_capacity(op) {
                        return Err(ParseError::PushTooLong {
                            opcode: token.to_string(),
                            len: data.len(),
                        });
                    }
                    chunks.push(Chunk {
                        op,
                        data: Some(data),
                    });
                    i += consumed;
                }
                Some(op) => {
                    chunks.push(Chunk::op(op));
                    i += 1;
                }
                None if token == "0" => {
                    chunks.push(Chunk::op(OP_0));
                    i += 1;
                }
                None if token == "-1" => {
                    chunks.push(Chunk::op(OP_1NEGATE));
                    i += 1;
                }
                None => {
                    let data = decode_hex_token(token)?;
                    if data.len() > u32::MAX as usize {
                        return Err(ParseError::InvalidHex(token.to_string()));
                    }
                    chunks.push(Chunk {
                        op: push_opcode_for_len(data.len()),
                        data: Some(data),
                    });
                    i += 1;
                }
            }
        }
        Ok(Self { chunks })
    }

    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        let bytes =
            Vec::<u8>::from_hex(hex).map_err(|_| ParseError::InvalidHex(hex.to_string()))?;
        Self::from_binary(&bytes)
    }

    /// Parses wire bytes. A push that runs past the end is an error.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut chunks = Vec::new();
        let mut index = 0;
        while index < bytes.len() {
            let offset = index;
            let op = bytes[index];
            index += 1;
            let len = match op {
                1..=0x4b => op as usize,
                OP_PUSHDATA1 => read_push_length(bytes, &mut index, 1, offset)?,
                OP_PUSHDATA2 => read_push_length(bytes, &mut index, 2, offset)?,
                OP_PUSHDATA4 => read_push_length(bytes, &mut index, 4, offset)?,
                _ => {
                    chunks.push(Chunk::op(op));
                    continue;
                }
            };
            let end = index
                .checked_add(len)
                .filter(|end| *end <= bytes.len())
                .ok_or(ParseError::TruncatedPush { offset })?;
            chunks.push(Chunk {
                op,
                data: Some(bytes[index..end].to_vec()),
            });
            index = end;
        }
        Ok(Self { chunks })
    }

    pub fn to_asm(&self) -> String {
        self.chunks
            .iter()
            .map(Chunk::asm_token)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_hex(&self) -> String {
        self.to_binary().to_lower_hex_string()
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in &self.chunks {
            chunk.write_to(&mut out);
        }
        out
    }

    pub fn write_op_code(&mut self, op: u8) -> &mut Self {
        self.chunks.push(Chunk::op(op));
        self
    }

    /// Appends `data` using the minimal push encoding.
    pub fn write_bin(&mut self, data: &[u8]) -> Result<&mut Self, EncodingError> {
        self.chunks.push(Chunk::push(data)?);
        Ok(self)
    }

    /// Appends a script number: `OP_0`, `OP_1NEGATE`, `OP_1..OP_16`, or a
    /// sign-magnitude little-endian push.
    pub fn write_bn(&mut self, value: i64) -> &mut Self {
        let chunk = match value {
            0 => Chunk::op(OP_0),
            -1 => Chunk::op(OP_1NEGATE),
            1..=16 => Chunk::op(OP_1 + value as u8 - 1),
            _ => {
                let data = encode_num(value);
                Chunk {
                    op: push_opcode_for_len(data.len()),
                    data: Some(data),
                }
            }
        };
        self.chunks.push(chunk);
        self
    }

    pub fn write_number(&mut self, value: i64) -> &mut Self {
        self.write_bn(value)
    }

    pub fn write_script(&mut self, other: &Script) -> &mut Self {
        self.chunks.extend(other.chunks.iter().cloned());
        self
    }

    pub fn is_push_only(&self) -> bool {
        self.chunks.iter().all(|chunk| chunk.op <= MAX_PUSH_OPCODE)
    }

    pub fn remove_codeseparators(&mut self) -> &mut Self {
        self.chunks.retain(|chunk| chunk.op != OP_CODESEPARATOR);
        self
    }

    /// Removes every chunk whose serialization equals that of `pattern`.
    pub fn find_and_delete(&mut self, pattern: &Script) -> &mut Self {
        let needle = pattern.to_binary();
        let mut scratch = Vec::new();
        self.chunks.retain(|chunk| {
            scratch.clear();
            chunk.write_to(&mut scratch);
            scratch != needle
        });
        self
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_asm())
    }
}

fn decode_hex_token(token: &str) -> Result<Vec<u8>, ParseError> {
    let padded;
    let hex = if token.len() % 2 != 0 {
        padded = format!("0{token}");
        padded.as_str()
    } else {
        token
    };
    Vec::<u8>::from_hex(hex).map_err(|_| ParseError::InvalidHex(token.to_string()))
}

fn read_push_length(
    bytes: &[u8],
    index: &mut usize,
    width: usize,
    offset: usize,
) -> Result<usize, ParseError> {
    let end = *index + width;
    let Some(raw) = bytes.get(*index..end) else {
        return Err(ParseError::TruncatedPush { offset });
    };
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(raw);
    *index = end;
    Ok(u32::from_le_bytes(buf) as usize)
}
