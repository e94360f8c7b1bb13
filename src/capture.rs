//! A minimal pcap mirroring writer. No third-party pcap crate: the format
//! is a stable 24-byte global header followed by 16-byte-prefixed records,
//! and this system only ever writes, never reads, so pulling in a reader
//! crate for that would buy nothing.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65535;
/// `LINKTYPE_RAW`: the captured bytes start at the IP header, with no
/// link-layer framing, matching what the engine dequeues from NFQUEUE.
const LINKTYPE_RAW: u32 = 101;

/// A per-path table of open capture files, each behind its own mutex so
/// concurrent appends to the same path serialize without blocking appends
/// to a different one.
#[derive(Default)]
pub struct CaptureRegistry {
    files: Mutex<HashMap<PathBuf, Arc<Mutex<File>>>>,
}

impl CaptureRegistry {
    pub fn new() -> CaptureRegistry {
        CaptureRegistry { files: Mutex::new(HashMap::new()) }
    }

    /// Appends one record holding `bytes` to the capture file at `path`,
    /// opening and writing the global header first if the file is new or
    /// empty.
    pub fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let file = self.file_for(path)?;
        let mut file = file.lock().unwrap();
        write_record(&mut file, bytes)
    }

    fn file_for(&self, path: &Path) -> io::Result<Arc<Mutex<File>>> {
        let mut files = self.files.lock().unwrap();
        if let Some(existing) = files.get(path) {
            return Ok(Arc::clone(existing));
        }
        let mut file = OpenOptions::new().create(true).append(true).read(true).open(path)?;
        if file.metadata()?.len() == 0 {
            write_global_header(&mut file)?;
        }
        let handle = Arc::new(Mutex::new(file));
        files.insert(path.to_path_buf(), Arc::clone(&handle));
        Ok(handle)
    }
}

fn write_global_header(file: &mut File) -> io::Result<()> {
    file.write_all(&PCAP_MAGIC.to_le_bytes())?;
    file.write_all(&PCAP_VERSION_MAJOR.to_le_bytes())?;
    file.write_all(&PCAP_VERSION_MINOR.to_le_bytes())?;
    file.write_all(&0i32.to_le_bytes())?; // thiszone
    file.write_all(&0u32.to_le_bytes())?; // sigfigs
    file.write_all(&SNAPLEN.to_le_bytes())?;
    file.write_all(&LINKTYPE_RAW.to_le_bytes())?;
    Ok(())
}

fn write_record(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let len = bytes.len() as u32;
    file.write_all(&(now.as_secs() as u32).to_le_bytes())?;
    file.write_all(&now.subsec_micros().to_le_bytes())?;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(bytes)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn first_append_writes_global_header_then_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");
        let registry = CaptureRegistry::new();
        registry.append(&path, b"hello").unwrap();
        registry.append(&path, b"world!").unwrap();

        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(&contents[0..4], &PCAP_MAGIC.to_le_bytes());
        let first_record = &contents[24..24 + 16 + 5];
        assert_eq!(&first_record[12..16], &5u32.to_le_bytes());
        assert_eq!(&first_record[16..], b"hello");
    }

    #[test]
    fn same_path_reuses_the_same_file_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");
        let registry = CaptureRegistry::new();
        registry.append(&path, b"a").unwrap();
        registry.append(&path, b"b").unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 24 + 2 * (16 + 1));
    }
}
