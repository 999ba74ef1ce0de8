//! Binary index file format.
//!
//! Layout (little-endian):
//!
//! ```text
//! Header:
//!   Magic: "FRIV" (4 bytes)
//!   Version: u16
//!   Dimension: u32
//!   NList: u32
//!   NTotal: u64
//!   Normalized: u8 (0/1)
//!   BuildId: [u8; 16]
//!   ModelLen: u16
//!   Model: bytes (UTF-8)
//!   HeaderCRC32: u32 (CRC32 of header bytes before this field)
//!
//! Body:
//!   Centroids: NList × Dimension × f32
//!   NList × posting list:
//!     Count: u64
//!     Ids: Count × i64
//!     Vectors: Count × Dimension × f32
//!   BodyCRC32: u32
//! ```
//!
//! The stamp (build id, model, normalization flag) lets the index store
//! match the file with its metadata sibling and lets the search engine
//! refuse queries embedded under a different policy.

use std::io::{Read, Write};

use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{IndexError, IndexResult};

use super::{InvertedList, IvfIndex, IvfParams};

pub const INDEX_MAGIC: [u8; 4] = *b"FRIV";
pub const INDEX_VERSION: u16 = 1;

/// Provenance written alongside the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStamp {
    pub build_id: Uuid,
    pub model: String,
    pub normalized: bool,
}

struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn put(&mut self, bytes: &[u8]) -> IndexResult<()> {
        self.hasher.update(bytes);
        self.inner.write_all(bytes)?;
        Ok(())
    }

    /// Write the running checksum (not itself hashed) and reset it.
    fn seal(&mut self) -> IndexResult<()> {
        let crc = std::mem::replace(&mut self.hasher, crc32fast::Hasher::new()).finalize();
        self.inner.write_all(&crc.to_le_bytes())?;
        Ok(())
    }
}

struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    /// Bytes left in the source; sections claiming more are corrupt.
    remaining: u64,
}

impl<R: Read> CrcReader<R> {
    fn new(inner: R, byte_len: u64) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            remaining: byte_len,
        }
    }

    /// Fail before allocating when a section is longer than what is left.
    fn ensure(&self, n: usize, what: &str) -> IndexResult<()> {
        if n as u64 > self.remaining {
            return Err(IndexError::Corrupt(format!(
                "{} needs {} bytes but only {} remain",
                what, n, self.remaining
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize, what: &str) -> IndexResult<Vec<u8>> {
        self.ensure(n, what)?;
        let mut buf = Vec::new();
        (&mut self.inner)
            .take(n as u64)
            .read_to_end(&mut buf)
            .map_err(truncated)?;
        if buf.len() != n {
            return Err(IndexError::Corrupt("unexpected end of file".to_string()));
        }
        self.remaining -= n as u64;
        self.hasher.update(&buf);
        Ok(buf)
    }

    fn array<const N: usize>(&mut self) -> IndexResult<[u8; N]> {
        self.ensure(N, "field")?;
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(truncated)?;
        self.remaining -= N as u64;
        self.hasher.update(&buf);
        Ok(buf)
    }

    fn verify(&mut self, section: &str) -> IndexResult<()> {
        let expected = std::mem::replace(&mut self.hasher, crc32fast::Hasher::new()).finalize();
        self.ensure(4, "checksum")?;
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf).map_err(truncated)?;
        self.remaining -= 4;
        let stored = u32::from_le_bytes(buf);
        if stored != expected {
            return Err(IndexError::Corrupt(format!(
                "{} checksum mismatch (stored {:08x}, computed {:08x})",
                section, stored, expected
            )));
        }
        Ok(())
    }
}

/// `a × b × elem` bytes, or `Corrupt` when the product overflows.
fn section_len(a: usize, b: usize, elem: usize, what: &str) -> IndexResult<usize> {
    a.checked_mul(b)
        .and_then(|n| n.checked_mul(elem))
        .ok_or_else(|| IndexError::Corrupt(format!("{} size overflows", what)))
}

fn truncated(e: std::io::Error) -> IndexError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        IndexError::Corrupt("unexpected end of file".to_string())
    } else {
        IndexError::Io(e)
    }
}

impl IvfIndex {
    /// Serialize a trained index.
    pub fn write_to<W: Write>(&self, stamp: &IndexStamp, writer: W) -> IndexResult<()> {
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        let model = stamp.model.as_bytes();
        let model_len = u16::try_from(model.len())
            .map_err(|_| IndexError::Corrupt("model name longer than 65535 bytes".to_string()))?;

        let mut w = CrcWriter::new(writer);
        w.put(&INDEX_MAGIC)?;
        w.put(&INDEX_VERSION.to_le_bytes())?;
        w.put(&(self.params.dims as u32).to_le_bytes())?;
        w.put(&(self.params.nlist as u32).to_le_bytes())?;
        w.put(&(self.ntotal as u64).to_le_bytes())?;
        w.put(&[stamp.normalized as u8])?;
        w.put(stamp.build_id.as_bytes())?;
        w.put(&model_len.to_le_bytes())?;
        w.put(model)?;
        w.seal()?;

        w.put(&vec_to_blob(&self.centroids))?;
        for list in &self.lists {
            w.put(&(list.ids.len() as u64).to_le_bytes())?;
            for id in &list.ids {
                w.put(&id.to_le_bytes())?;
            }
            w.put(&vec_to_blob(&list.vectors))?;
        }
        w.seal()?;
        w.inner.flush()?;
        Ok(())
    }

    /// Deserialize an index written by [`write_to`](IvfIndex::write_to).
    pub fn read_from<R: Read>(reader: R) -> IndexResult<(IvfIndex, IndexStamp)> {
        Self::read_sized(reader, u64::MAX)
    }

    /// Like [`read_from`](IvfIndex::read_from) for a source of known
    /// length: any section the header sizes past `byte_len` is
    /// rejected as `Corrupt` before it is allocated.
    pub fn read_sized<R: Read>(reader: R, byte_len: u64) -> IndexResult<(IvfIndex, IndexStamp)> {
        let mut r = CrcReader::new(reader, byte_len);

        if r.array::<4>()? != INDEX_MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }
        let version = u16::from_le_bytes(r.array()?);
        if version != INDEX_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index version {}",
                version
            )));
        }
        let dims = u32::from_le_bytes(r.array()?) as usize;
        let nlist = u32::from_le_bytes(r.array()?) as usize;
        let ntotal = u64::from_le_bytes(r.array()?) as usize;
        let normalized = r.array::<1>()?[0] != 0;
        let build_id = Uuid::from_bytes(r.array()?);
        let model_len = u16::from_le_bytes(r.array()?) as usize;
        let model = String::from_utf8(r.take(model_len, "model name")?)
            .map_err(|_| IndexError::Corrupt("model name is not UTF-8".to_string()))?;
        r.verify("header")?;

        if dims == 0 || nlist == 0 {
            return Err(IndexError::Corrupt(format!(
                "invalid shape dims={} nlist={}",
                dims, nlist
            )));
        }

        let centroid_len = section_len(nlist, dims, 4, "centroid table")?;
        let centroids = blob_to_vec(&r.take(centroid_len, "centroid table")?);
        r.ensure(section_len(nlist, 1, 8, "posting lists")?, "posting lists")?;
        let mut lists = Vec::with_capacity(nlist);
        let mut seen = 0usize;
        for _ in 0..nlist {
            let count = u64::from_le_bytes(r.array()?) as usize;
            seen = seen.saturating_add(count);
            if seen > ntotal {
                return Err(IndexError::Corrupt(format!(
                    "posting lists hold more than {} vectors",
                    ntotal
                )));
            }
            let ids_len = section_len(count, 1, 8, "posting ids")?;
            let vectors_len = section_len(count, dims, 4, "posting vectors")?;
            r.ensure(ids_len, "posting ids")?;
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                let id = i64::from_le_bytes(r.array()?);
                if id < 0 || id as usize >= ntotal {
                    return Err(IndexError::Corrupt(format!("ordinal {} out of range", id)));
                }
                ids.push(id);
            }
            let vectors = blob_to_vec(&r.take(vectors_len, "posting vectors")?);
            lists.push(InvertedList { ids, vectors });
        }
        r.verify("body")?;

        if seen != ntotal {
            return Err(IndexError::Corrupt(format!(
                "posting lists hold {} vectors, header says {}",
                seen, ntotal
            )));
        }

        let index = IvfIndex {
            params: IvfParams { dims, nlist },
            centroids,
            lists,
            ntotal,
        };
        let stamp = IndexStamp {
            build_id,
            model,
            normalized,
        };
        Ok((index, stamp))
    }
}
