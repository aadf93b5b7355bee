//! On-disk records of the StepFile engine
//!
//! Data subfile `data.<rank>`:
//! - 32 byte header: magic `CSTPDATA`, format version (u32), rank (u32),
//!   stream id (16 bytes)
//! - step records, each:
//!   - 4 bytes: record length (excluding this field)
//!   - 1 byte: flags (bit 0 = LZ4)
//!   - N bytes: bincode `StepRecord`, possibly LZ4 compressed
//!   - 4 bytes: CRC32 of flags + payload
//!
//! Metadata index `md.idx`:
//! - magic `CSTPMETA`, format version (u32), payload length (u32)
//! - bincode `StreamMeta`
//! - 4 bytes: CRC32 of the payload

use super::{CompressionKind, Selection, Transport, VariableDef};
use crate::types::ArrayData;
use crate::{ColStepError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stream format version
pub const FORMAT_VERSION: u32 = 1;

const DATA_MAGIC: &[u8; 8] = b"CSTPDATA";
const META_MAGIC: &[u8; 8] = b"CSTPMETA";
const FLAG_LZ4: u8 = 0x01;

/// Size of the data subfile header
pub const DATA_HEADER_SIZE: usize = 32;

/// One buffered put
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub variable: String,
    pub selection: Selection,
    pub data: ArrayData,
}

/// Everything one rank wrote during one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub rank: u32,
    pub step: u64,
    pub blocks: Vec<Block>,
}

impl StepRecord {
    /// Serialize with length prefix, flags and CRC checksum
    pub fn encode(&self, compression: CompressionKind) -> Result<Bytes> {
        let payload =
            bincode::serialize(self).map_err(|e| ColStepError::Corruption(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(payload.len() + 9);

        // Reserve space for length prefix
        buf.put_u32_le(0);

        match compression {
            CompressionKind::None => {
                buf.put_u8(0);
                buf.put_slice(&payload);
            }
            CompressionKind::Lz4 => {
                buf.put_u8(FLAG_LZ4);
                buf.put_slice(&lz4_flex::compress_prepend_size(&payload));
            }
        }

        // Checksum excludes the length prefix
        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());

        Ok(buf.freeze())
    }

    /// Deserialize one record from the front of `data`, validating its checksum.
    /// Returns the record and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(ColStepError::Corruption("step record too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);
        let len = cursor.get_u32_le() as usize;
        if len < 5 || data.len() < 4 + len {
            return Err(ColStepError::Corruption("truncated step record".into()));
        }

        let body = &data[4..4 + len];
        let (content, trailer) = body.split_at(len - 4);
        let expected = (&trailer[..]).get_u32_le();
        let actual = crc32fast::hash(content);
        if expected != actual {
            return Err(ColStepError::ChecksumMismatch { expected, actual });
        }

        let flags = content[0];
        let payload = if flags & FLAG_LZ4 != 0 {
            lz4_flex::decompress_size_prepended(&content[1..])
                .map_err(|e| ColStepError::Compression(e.to_string()))?
        } else {
            content[1..].to_vec()
        };

        let record =
            bincode::deserialize(&payload).map_err(|e| ColStepError::Corruption(e.to_string()))?;
        Ok((record, 4 + len))
    }
}

/// Header at the start of every data subfile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub rank: u32,
    pub stream_id: Uuid,
}

impl DataHeader {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_HEADER_SIZE);
        buf.put_slice(DATA_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(self.rank);
        buf.put_slice(self.stream_id.as_bytes());
        buf.freeze()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < DATA_HEADER_SIZE {
            return Err(ColStepError::Corruption("data subfile header too short".into()));
        }
        if &data[..8] != DATA_MAGIC {
            return Err(ColStepError::Corruption("bad data subfile magic".into()));
        }
        let mut cursor = std::io::Cursor::new(&data[8..DATA_HEADER_SIZE]);
        let version = cursor.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(ColStepError::Corruption(format!(
                "unsupported data subfile version {}",
                version
            )));
        }
        let rank = cursor.get_u32_le();
        let mut id = [0u8; 16];
        cursor.copy_to_slice(&mut id);
        Ok(Self {
            rank,
            stream_id: Uuid::from_bytes(id),
        })
    }
}

/// Stream-wide metadata kept by rank 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub stream_id: Uuid,
    pub engine_type: String,
    pub created_at: DateTime<Utc>,
    /// Ranks that contributed subfiles
    pub ranks: u32,
    /// Steps committed by every rank
    pub steps: u64,
    /// Variables in definition order
    pub variables: Vec<VariableDef>,
    pub transports: Vec<Transport>,
    pub engine_params: BTreeMap<String, String>,
}

impl StreamMeta {
    pub fn new(engine_type: &str, ranks: u32) -> Self {
        Self {
            stream_id: Uuid::new_v4(),
            engine_type: engine_type.to_string(),
            created_at: Utc::now(),
            ranks,
            steps: 0,
            variables: Vec::new(),
            transports: Vec::new(),
            engine_params: BTreeMap::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let payload =
            bincode::serialize(self).map_err(|e| ColStepError::Corruption(e.to_string()))?;
        let mut buf = BytesMut::with_capacity(payload.len() + 20);
        buf.put_slice(META_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);
        buf.put_u32_le(crc32fast::hash(&payload));
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 20 || &data[..8] != META_MAGIC {
            return Err(ColStepError::Corruption("bad stream metadata header".into()));
        }
        let mut cursor = std::io::Cursor::new(&data[8..16]);
        let version = cursor.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(ColStepError::Corruption(format!(
                "unsupported stream metadata version {}",
                version
            )));
        }
        let len = cursor.get_u32_le() as usize;
        if data.len() < 16 + len + 4 {
            return Err(ColStepError::Corruption("truncated stream metadata".into()));
        }
        let payload = &data[16..16 + len];
        let expected = (&data[16 + len..]).get_u32_le();
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(ColStepError::ChecksumMismatch { expected, actual });
        }
        bincode::deserialize(payload).map_err(|e| ColStepError::Corruption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementKind;

    fn sample_record() -> StepRecord {
        StepRecord {
            rank: 1,
            step: 0,
            blocks: vec![Block {
                variable: "scalar_Int".into(),
                selection: Selection::new(vec![1], vec![1]),
                data: ArrayData::Int32(vec![42]),
            }],
        }
    }

    #[test]
    fn test_record_framing() {
        for compression in [CompressionKind::None, CompressionKind::Lz4] {
            let record = sample_record();
            let encoded = record.encode(compression).unwrap();
            let (decoded, used) = StepRecord::decode(&encoded).unwrap();
            assert_eq!(used, encoded.len());
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn test_record_checksum_validation() {
        let mut encoded = sample_record()
            .encode(CompressionKind::None)
            .unwrap()
            .to_vec();
        encoded[10] ^= 0xFF;
        assert!(matches!(
            StepRecord::decode(&encoded),
            Err(ColStepError::ChecksumMismatch { .. })
        ));

        let encoded = sample_record().encode(CompressionKind::None).unwrap();
        assert!(StepRecord::decode(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn test_meta_and_header() {
        let mut meta = StreamMeta::new("StepFile", 2);
        meta.steps = 3;
        meta.variables
            .push(VariableDef::new("a", ElementKind::Bool, vec![2]));
        let decoded = StreamMeta::decode(&meta.encode().unwrap()).unwrap();
        assert_eq!(decoded, meta);

        let header = DataHeader {
            rank: 1,
            stream_id: meta.stream_id,
        };
        assert_eq!(DataHeader::from_bytes(&header.to_bytes()).unwrap(), header);
        assert!(DataHeader::from_bytes(b"CSTPMETA").is_err());
    }
}
