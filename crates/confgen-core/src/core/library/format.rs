//! Binary stream format of a fragment library.
//!
//! All integers are little-endian.
//!
//! ```text
//! header   := "CGFL" version:u32
//! record   := fingerprint:u64 length:u32 body[length]
//! body     := topology_len:u32 topology[topology_len]
//!             occurrences:u64 conformer_count:u32 conformer*
//! conformer:= atom_count:u32 energy:f32 (x:f32 y:f32 z:f32)*atom_count
//! ```
//!
//! Records follow the header until end of stream. The record length bounds the body,
//! so a reader may skip bytes it does not understand at the end of a body.

use super::entry::{FragmentEntry, StoredConformer};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"CGFL";
pub const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LibraryIoError {
    #[error("Failed to access library file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on library stream: {0}")]
    Io(#[from] io::Error),
    #[error("Not a fragment library stream (bad magic)")]
    BadMagic,
    #[error("Unsupported fragment library version {0} (expected {VERSION})")]
    UnsupportedVersion(u32),
    #[error("Library stream ends inside record {record}")]
    Truncated { record: usize },
    #[error("Malformed library record {fingerprint:016x}: {reason}")]
    Malformed { fingerprint: u64, reason: String },
}

/// Reads the header and every record of a stream, handing entries to `sink` in order.
pub fn read_records<R, F>(mut reader: R, mut sink: F) -> Result<usize, LibraryIoError>
where
    R: Read,
    F: FnMut(u64, FragmentEntry),
{
    let mut header = [0u8; 8];
    if read_fully(&mut reader, &mut header)? < header.len() {
        return Err(LibraryIoError::BadMagic);
    }
    if &header[0..4] != MAGIC {
        return Err(LibraryIoError::BadMagic);
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != VERSION {
        return Err(LibraryIoError::UnsupportedVersion(version));
    }

    let mut count = 0;
    loop {
        let mut prefix = [0u8; 12];
        match read_fully(&mut reader, &mut prefix)? {
            0 => break,
            n if n < prefix.len() => return Err(LibraryIoError::Truncated { record: count }),
            _ => {}
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&prefix[0..8]);
        let fingerprint = u64::from_le_bytes(raw);
        let length = u32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]) as usize;
        let mut body = vec![0u8; length];
        if read_fully(&mut reader, &mut body)? < length {
            return Err(LibraryIoError::Truncated { record: count });
        }
        let entry = parse_body(&body).map_err(|reason| LibraryIoError::Malformed {
            fingerprint,
            reason,
        })?;
        sink(fingerprint, entry);
        count += 1;
    }
    Ok(count)
}

/// Writes a header followed by one record per entry.
pub fn write_records<W: Write>(
    mut writer: W,
    entries: &[(u64, Arc<FragmentEntry>)],
) -> Result<(), LibraryIoError> {
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    for (fingerprint, entry) in entries {
        let body = encode_body(entry);
        let length = u32::try_from(body.len()).map_err(|_| LibraryIoError::Malformed {
            fingerprint: *fingerprint,
            reason: "record exceeds 4 GiB".to_string(),
        })?;
        writer.write_all(&fingerprint.to_le_bytes())?;
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(&body)?;
    }
    Ok(())
}

fn encode_body(entry: &FragmentEntry) -> Vec<u8> {
    let topology = entry.topology();
    let coord_bytes: usize = entry
        .conformers()
        .iter()
        .map(|c| 8 + 12 * c.coords.len())
        .sum();
    let mut body = Vec::with_capacity(16 + topology.len() + coord_bytes);
    body.extend_from_slice(&(topology.len() as u32).to_le_bytes());
    body.extend_from_slice(topology);
    body.extend_from_slice(&entry.occurrences().to_le_bytes());
    body.extend_from_slice(&(entry.conformer_count() as u32).to_le_bytes());
    for conformer in entry.conformers() {
        body.extend_from_slice(&(conformer.coords.len() as u32).to_le_bytes());
        body.extend_from_slice(&conformer.energy.to_le_bytes());
        for xyz in &conformer.coords {
            for value in xyz {
                body.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    body
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| format!("body ends inside {what}"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> Result<u32, String> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64, String> {
        let b = self.take(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn f32(&mut self, what: &str) -> Result<f32, String> {
        let b = self.take(4, what)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn parse_body(body: &[u8]) -> Result<FragmentEntry, String> {
    let mut cursor = Cursor { data: body, pos: 0 };
    let topology_len = cursor.u32("topology length")? as usize;
    let topology = cursor.take(topology_len, "topology")?.to_vec();
    let occurrences = cursor.u64("occurrence count")?;
    let conformer_count = cursor.u32("conformer count")? as usize;

    let mut conformers = Vec::with_capacity(conformer_count.min(1024));
    for index in 0..conformer_count {
        let what = format!("conformer {index}");
        let atom_count = cursor.u32(&what)? as usize;
        let energy = cursor.f32(&what)?;
        if atom_count.saturating_mul(12) > body.len() {
            return Err(format!("{what} claims {atom_count} atoms"));
        }
        let mut coords = Vec::with_capacity(atom_count);
        for _ in 0..atom_count {
            coords.push([cursor.f32(&what)?, cursor.f32(&what)?, cursor.f32(&what)?]);
        }
        conformers.push(StoredConformer { energy, coords });
    }
    Ok(FragmentEntry::new(topology, conformers, occurrences))
}

/// Like `read_exact`, but reports how many bytes were available before end of stream.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(u64, Arc<FragmentEntry>)> {
        vec![
            (
                0x0102_0304_0506_0708,
                Arc::new(FragmentEntry::new(
                    vec![6, 0, 3, 0],
                    vec![
                        StoredConformer {
                            energy: -1.5,
                            coords: vec![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]],
                        },
                        StoredConformer {
                            energy: 2.25,
                            coords: vec![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]],
                        },
                    ],
                    7,
                )),
            ),
            (9, Arc::new(FragmentEntry::new(vec![8], vec![], 1))),
        ]
    }

    fn encoded() -> Vec<u8> {
        let mut buffer = Vec::new();
        write_records(&mut buffer, &sample()).unwrap();
        buffer
    }

    fn decode(bytes: &[u8]) -> Result<Vec<(u64, FragmentEntry)>, LibraryIoError> {
        let mut out = Vec::new();
        read_records(bytes, |fp, entry| out.push((fp, entry)))?;
        Ok(out)
    }

    #[test]
    fn header_is_magic_and_version() {
        let bytes = encoded();
        assert_eq!(&bytes[0..4], b"CGFL");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x0102_0304_0506_0708u64.to_le_bytes());
    }

    #[test]
    fn records_decode_in_stream_order() {
        let decoded = decode(&encoded()).unwrap();
        assert_eq!(decoded.len(), 2);
        let (fp, entry) = &decoded[0];
        assert_eq!(*fp, 0x0102_0304_0506_0708);
        assert_eq!(entry.topology(), &[6, 0, 3, 0]);
        assert_eq!(entry.occurrences(), 7);
        assert_eq!(entry.conformers()[1].energy, 2.25);
        assert_eq!(entry.conformers()[0].coords[1], [3.0, 4.0, 5.0]);
        assert_eq!(decoded[1].1.conformer_count(), 0);
    }

    #[test]
    fn empty_library_is_just_a_header() {
        let mut buffer = Vec::new();
        write_records(&mut buffer, &[]).unwrap();
        assert_eq!(buffer.len(), 8);
        assert!(decode(&buffer).unwrap().is_empty());
    }

    #[test]
    fn truncated_record_is_an_error() {
        let bytes = encoded();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decode(cut),
            Err(LibraryIoError::Truncated { record: 1 })
        ));
        assert!(matches!(
            decode(&bytes[..14]),
            Err(LibraryIoError::Truncated { record: 0 })
        ));
    }

    #[test]
    fn trailing_bytes_inside_a_record_are_skipped() {
        let entry = FragmentEntry::new(vec![1, 2], vec![], 3);
        let mut body = encode_body(&entry);
        body.extend_from_slice(&[0xAA; 5]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&77u64.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded[0].0, 77);
        assert_eq!(decoded[0].1.topology(), &[1, 2]);
    }

    #[test]
    fn inconsistent_body_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(LibraryIoError::Malformed { fingerprint: 5, .. })
        ));
    }

    #[test]
    fn bad_header_is_rejected() {
        assert!(matches!(decode(b"FRAG\x01\0\0\0"), Err(LibraryIoError::BadMagic)));
        assert!(matches!(decode(b"CG"), Err(LibraryIoError::BadMagic)));
        assert!(matches!(
            decode(b"CGFL\x02\0\0\0"),
            Err(LibraryIoError::UnsupportedVersion(2))
        ));
    }
}
