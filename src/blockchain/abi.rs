//! Minimal Solidity ABI codec covering the types the KYC registry contract
//! uses: `string`, `bool` and `uint256`.

use crate::errors::{AppError, Result};
use sha3::{Digest, Keccak256};

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    String(String),
    Bool(bool),
    Uint(u128),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Bool,
    Uint,
}

/// First four bytes of keccak256 of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(args));
    out
}

pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Bool(b) => head.extend(uint_word(*b as u128)),
            Token::Uint(v) => head.extend(uint_word(*v)),
            Token::String(s) => {
                head.extend(uint_word((head_len + tail.len()) as u128));
                tail.extend(uint_word(s.len() as u128));
                tail.extend(s.as_bytes());
                let padding = (WORD - s.len() % WORD) % WORD;
                tail.extend(std::iter::repeat(0u8).take(padding));
            }
        }
    }

    head.extend(tail);
    head
}

pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    types
        .iter()
        .enumerate()
        .map(|(index, param)| {
            let word = read_word(data, index * WORD)?;
            match param {
                ParamType::Bool => Ok(Token::Bool(word_to_u128(word)? != 0)),
                ParamType::Uint => Ok(Token::Uint(word_to_u128(word)?)),
                ParamType::String => {
                    let offset = word_to_usize(word)?;
                    let len = word_to_usize(read_word(data, offset)?)?;
                    let start = offset.checked_add(WORD).ok_or_else(|| abi_error("offset overflow"))?;
                    let end = start.checked_add(len).ok_or_else(|| abi_error("offset overflow"))?;
                    let bytes = data
                        .get(start..end)
                        .ok_or_else(|| abi_error("string data out of bounds"))?;
                    String::from_utf8(bytes.to_vec())
                        .map(Token::String)
                        .map_err(|_| abi_error("string is not valid UTF-8"))
                }
            }
        })
        .collect()
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8]> {
    let end = offset.checked_add(WORD).ok_or_else(|| abi_error("offset overflow"))?;
    data.get(offset..end)
        .ok_or_else(|| abi_error("return data too short"))
}

fn word_to_u128(word: &[u8]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(abi_error("uint256 value does not fit in 128 bits"));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(bytes))
}

fn word_to_usize(word: &[u8]) -> Result<usize> {
    usize::try_from(word_to_u128(word)?).map_err(|_| abi_error("offset overflow"))
}

fn abi_error(message: &str) -> AppError {
    AppError::BlockchainError(format!("ABI decode error: {}", message))
}

impl Token {
    pub fn into_string(self) -> Result<String> {
        match self {
            Token::String(s) => Ok(s),
            other => Err(abi_error(&format!("expected string, got {:?}", other))),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Token::Bool(b) => Ok(b),
            other => Err(abi_error(&format!("expected bool, got {:?}", other))),
        }
    }

    pub fn into_uint(self) -> Result<u128> {
        match self {
            Token::Uint(v) => Ok(v),
            other => Err(abi_error(&format!("expected uint, got {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn encodes_dynamic_string_after_static_head() {
        let encoded = encode(&[Token::String("abc".into()), Token::Bool(true)]);
        assert_eq!(encoded.len(), 4 * WORD);
        // offset of the string data is the head size
        assert_eq!(encoded[WORD - 1], 0x40);
        assert_eq!(encoded[2 * WORD - 1], 1);
        assert_eq!(encoded[3 * WORD - 1], 3);
        assert_eq!(&encoded[3 * WORD..3 * WORD + 3], b"abc");
    }

    #[test]
    fn decodes_verification_tuple() {
        let data = encode(&[
            Token::Bool(true),
            Token::Bool(false),
            Token::Uint(1_700_000_000),
            Token::String("admin-7".into()),
            Token::String("f".repeat(64)),
        ]);
        let decoded = decode(
            &[ParamType::Bool, ParamType::Bool, ParamType::Uint, ParamType::String, ParamType::String],
            &data,
        )
        .unwrap();
        assert_eq!(decoded[2], Token::Uint(1_700_000_000));
        assert_eq!(decoded[3], Token::String("admin-7".into()));
        assert_eq!(decoded[4], Token::String("f".repeat(64)));
    }

    #[test]
    fn short_data_is_an_error() {
        assert!(decode(&[ParamType::Bool, ParamType::Bool], &[0u8; 32]).is_err());
    }

    #[test]
    fn huge_offset_or_length_is_an_error() {
        let huge = uint_word((usize::MAX - 8) as u128);

        let mut bad_offset = encode(&[Token::String("abc".into())]);
        bad_offset[..WORD].copy_from_slice(&huge);
        assert!(matches!(
            decode(&[ParamType::String], &bad_offset),
            Err(AppError::BlockchainError(_))
        ));

        let mut bad_len = encode(&[Token::String("abc".into())]);
        bad_len[WORD..2 * WORD].copy_from_slice(&huge);
        assert!(matches!(
            decode(&[ParamType::String], &bad_len),
            Err(AppError::BlockchainError(_))
        ));
    }
}
