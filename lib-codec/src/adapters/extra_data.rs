//! IBFT block extra-data epoch record codec
//!
//! Encodes the epoch record `{vanity(32), validators[], vote?, round,
//! seals[]}` as a length-prefixed list, and maps it to and from the
//! `extensions["extra_data"]` entry of a canonical message.
//!
//! Binary layout (big-endian):
//!
//! ```text
//! [32-byte vanity]
//! [u16 validator count] { [u16 len][bytes] }*
//! [u8 vote flag] ( [u16 len][recipient bytes] [u8 vote type] )?
//! [u64 round]
//! [u16 seal count] { [u16 len][bytes] }*
//! ```

use std::collections::BTreeMap;

use crate::error::CodecError;
use crate::value::ExtensionValue;

/// Extension key the adapters look for.
pub const EXTRA_DATA_KEY: &str = "extra_data";

/// Fixed vanity length.
pub const VANITY_LEN: usize = 32;

/// Validator membership vote inside the epoch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochVote {
    pub recipient: Vec<u8>,
    /// 0 = add, 1 = remove.
    pub vote_type: u8,
}

/// The IBFT epoch record carried in a block's extra data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EpochExtraData {
    pub vanity: [u8; VANITY_LEN],
    pub validators: Vec<Vec<u8>>,
    pub vote: Option<EpochVote>,
    pub round: u64,
    pub seals: Vec<Vec<u8>>,
}

impl EpochExtraData {
    /// Encode to the length-prefixed list form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(VANITY_LEN + 16);
        out.extend_from_slice(&self.vanity);

        write_list(&mut out, "validators", &self.validators)?;

        match &self.vote {
            Some(vote) => {
                out.push(1);
                write_item(&mut out, "vote.recipient", &vote.recipient)?;
                out.push(vote.vote_type);
            }
            None => out.push(0),
        }

        out.extend_from_slice(&self.round.to_be_bytes());
        write_list(&mut out, "seals", &self.seals)?;
        Ok(out)
    }

    /// Decode from the length-prefixed list form.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor { data, pos: 0 };

        let vanity_slice = cursor.take(VANITY_LEN, "vanity")?;
        let mut vanity = [0u8; VANITY_LEN];
        vanity.copy_from_slice(vanity_slice);

        let validators = read_list(&mut cursor, "validators")?;

        let vote = match cursor.take(1, "vote flag")?[0] {
            0 => None,
            1 => {
                let recipient = read_item(&mut cursor, "vote.recipient")?;
                let vote_type = cursor.take(1, "vote.type")?[0];
                Some(EpochVote { recipient, vote_type })
            }
            other => {
                return Err(CodecError::decode(
                    "extra_data",
                    format!("invalid vote flag {other}"),
                ))
            }
        };

        let round_bytes = cursor.take(8, "round")?;
        let round = u64::from_be_bytes(round_bytes.try_into().expect("length checked"));

        let seals = read_list(&mut cursor, "seals")?;

        if cursor.pos != data.len() {
            return Err(CodecError::decode(
                "extra_data",
                format!("{} trailing bytes", data.len() - cursor.pos),
            ));
        }

        Ok(Self { vanity, validators, vote, round, seals })
    }

    /// Render as the extension map stored under [`EXTRA_DATA_KEY`].
    pub fn to_extension(&self) -> ExtensionValue {
        let mut map = BTreeMap::new();
        map.insert("vanity".to_string(), ExtensionValue::Text(hex::encode(self.vanity)));
        map.insert(
            "validators".to_string(),
            ExtensionValue::List(
                self.validators
                    .iter()
                    .map(|v| ExtensionValue::Text(hex::encode(v)))
                    .collect(),
            ),
        );
        if let Some(vote) = &self.vote {
            let mut vote_map = BTreeMap::new();
            vote_map.insert(
                "recipient".to_string(),
                ExtensionValue::Text(hex::encode(&vote.recipient)),
            );
            vote_map.insert("vote_type".to_string(), ExtensionValue::Int(vote.vote_type as i64));
            map.insert("vote".to_string(), ExtensionValue::Map(vote_map));
        }
        map.insert("round".to_string(), ExtensionValue::Int(self.round as i64));
        map.insert(
            "seals".to_string(),
            ExtensionValue::List(
                self.seals
                    .iter()
                    .map(|s| ExtensionValue::Text(hex::encode(s)))
                    .collect(),
            ),
        );
        ExtensionValue::Map(map)
    }

    /// Rebuild from the extension map form.
    pub fn from_extension(value: &ExtensionValue) -> Result<Self, CodecError> {
        let map = value
            .as_map()
            .ok_or_else(|| CodecError::decode("extra_data", "expected a map"))?;

        let vanity_hex = map
            .get("vanity")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodecError::missing("extra_data.vanity"))?;
        let vanity_bytes = hex::decode(vanity_hex)
            .map_err(|e| CodecError::decode("extra_data.vanity", e))?;
        if vanity_bytes.len() != VANITY_LEN {
            return Err(CodecError::decode(
                "extra_data.vanity",
                format!("expected {VANITY_LEN} bytes, got {}", vanity_bytes.len()),
            ));
        }
        let mut vanity = [0u8; VANITY_LEN];
        vanity.copy_from_slice(&vanity_bytes);

        let validators = decode_hex_list(map.get("validators"), "extra_data.validators")?;
        let seals = decode_hex_list(map.get("seals"), "extra_data.seals")?;

        let vote = match map.get("vote").and_then(|v| v.as_map()) {
            Some(vote_map) => {
                let recipient_hex = vote_map
                    .get("recipient")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CodecError::missing("extra_data.vote.recipient"))?;
                let recipient = hex::decode(recipient_hex)
                    .map_err(|e| CodecError::decode("extra_data.vote.recipient", e))?;
                let vote_type = vote_map
                    .get("vote_type")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0) as u8;
                Some(EpochVote { recipient, vote_type })
            }
            None => None,
        };

        let round = map.get("round").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(Self { vanity, validators, vote, round, seals })
    }
}

fn decode_hex_list(
    value: Option<&ExtensionValue>,
    field: &str,
) -> Result<Vec<Vec<u8>>, CodecError> {
    let Some(list) = value.and_then(|v| v.as_list()) else {
        return Ok(Vec::new());
    };
    list.iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| CodecError::decode(field, "expected hex text"))
                .and_then(|s| hex::decode(s).map_err(|e| CodecError::decode(field, e)))
        })
        .collect()
}

fn write_item(out: &mut Vec<u8>, field: &str, item: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(item.len())
        .map_err(|_| CodecError::decode(field, format!("item too long: {}", item.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(item);
    Ok(())
}

fn write_list(out: &mut Vec<u8>, field: &str, items: &[Vec<u8>]) -> Result<(), CodecError> {
    let count = u16::try_from(items.len())
        .map_err(|_| CodecError::decode(field, format!("too many items: {}", items.len())))?;
    out.extend_from_slice(&count.to_be_bytes());
    for item in items {
        write_item(out, field, item)?;
    }
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::decode(
                "extra_data",
                format!("truncated while reading {field}"),
            ));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

fn read_item(cursor: &mut Cursor<'_>, field: &str) -> Result<Vec<u8>, CodecError> {
    let len_bytes = cursor.take(2, field)?;
    let len = u16::from_be_bytes(len_bytes.try_into().expect("length checked")) as usize;
    Ok(cursor.take(len, field)?.to_vec())
}

fn read_list(cursor: &mut Cursor<'_>, field: &str) -> Result<Vec<Vec<u8>>, CodecError> {
    let count_bytes = cursor.take(2, field)?;
    let count = u16::from_be_bytes(count_bytes.try_into().expect("length checked")) as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(read_item(cursor, field)?);
    }
    Ok(items)
}
