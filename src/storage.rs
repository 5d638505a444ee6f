//! Block-storage abstraction.
//!
//! The pipeline never touches a filesystem directly; every plane, scratch and
//! output file goes through the [`Storage`] capability, a flat namespace of
//! byte-addressable files with sequential-friendly random access. Writes past
//! end-of-file extend the file. Names are opaque strings.
//!
//! Two backends ship with the crate: [`DiskStorage`], rooted at a host
//! directory, and [`MemStorage`], an in-RAM namespace used by tests and by
//! hosts without a filesystem.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::IcerError;

/// File open mode. A file is opened for read xor write; `Write` creates the
/// file if missing and never truncates, so a component can seek and patch a
/// region of an existing plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// An open file handle.
///
/// `read`/`write` return the number of bytes actually transferred; callers
/// detect short transfers by comparing against the requested length. `seek`
/// and `flush` report success as a bool. `is_open` reflects only the explicit
/// open/close state tracked by the wrapper, never ambient handle validity.
pub trait StorageFile {
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, data: &[u8]) -> usize;
    fn seek(&mut self, position: u64) -> bool;
    fn position(&mut self) -> u64;
    fn size(&mut self) -> u64;
    fn flush(&mut self) -> bool;
    fn close(&mut self) -> bool;
    fn is_open(&self) -> bool;
}

/// A flat file namespace.
pub trait Storage {
    fn open(&self, name: &str, mode: Mode) -> Result<Box<dyn StorageFile>, IcerError>;
    fn remove(&self, name: &str) -> bool;
    fn exists(&self, name: &str) -> bool;
}

/// Copy `total` bytes from `src` to `dst` through a 4 KiB chunk buffer.
///
/// Both handles are used from their current positions.
pub fn copy_bytes(
    src: &mut dyn StorageFile,
    dst: &mut dyn StorageFile,
    total: u64,
) -> Result<(), IcerError> {
    let mut chunk = [0u8; 4096];
    let mut remaining = total;
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let got = src.read(&mut chunk[..want]);
        if got != want {
            return Err(IcerError::StorageReadShort);
        }
        let put = dst.write(&chunk[..want]);
        if put != want {
            return Err(IcerError::StorageWriteShort);
        }
        remaining -= want as u64;
    }
    Ok(())
}

/// Replace the contents of `dst_name` with the contents of `src_name`,
/// then remove `src_name`. Used by components that mutate a plane through a
/// scratch file.
pub fn replace_file(
    storage: &dyn Storage,
    src_name: &str,
    dst_name: &str,
) -> Result<(), IcerError> {
    storage.remove(dst_name);
    {
        let mut src = storage.open(src_name, Mode::Read)?;
        let mut dst = storage.open(dst_name, Mode::Write)?;
        let total = src.size();
        let res = copy_bytes(src.as_mut(), dst.as_mut(), total);
        src.close();
        dst.close();
        res?;
    }
    storage.remove(src_name);
    Ok(())
}

// ---------------------------------------------------------------------------
// Disk backend
// ---------------------------------------------------------------------------

/// Storage rooted at a host directory. Names map to direct children of the
/// root; no path traversal is interpreted.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

struct DiskFile {
    handle: Option<File>,
}

impl StorageFile for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Some(f) = self.handle.as_mut() else {
            return 0;
        };
        let mut done = 0;
        while done < buf.len() {
            match f.read(&mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(_) => break,
            }
        }
        done
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let Some(f) = self.handle.as_mut() else {
            return 0;
        };
        match f.write_all(data) {
            Ok(()) => data.len(),
            Err(_) => 0,
        }
    }

    fn seek(&mut self, position: u64) -> bool {
        match self.handle.as_mut() {
            Some(f) => f.seek(SeekFrom::Start(position)).is_ok(),
            None => false,
        }
    }

    fn position(&mut self) -> u64 {
        match self.handle.as_mut() {
            Some(f) => f.stream_position().unwrap_or(0),
            None => 0,
        }
    }

    fn size(&mut self) -> u64 {
        match self.handle.as_mut() {
            Some(f) => f.metadata().map(|m| m.len()).unwrap_or(0),
            None => 0,
        }
    }

    fn flush(&mut self) -> bool {
        match self.handle.as_mut() {
            Some(f) => f.flush().is_ok(),
            None => false,
        }
    }

    fn close(&mut self) -> bool {
        // Dropping the File closes the descriptor.
        self.handle.take().is_some()
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl Storage for DiskStorage {
    fn open(&self, name: &str, mode: Mode) -> Result<Box<dyn StorageFile>, IcerError> {
        let path = self.path_for(name);
        let handle = match mode {
            Mode::Read => OpenOptions::new().read(true).open(&path),
            Mode::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path),
        };
        match handle {
            Ok(f) => Ok(Box::new(DiskFile { handle: Some(f) })),
            Err(_) => Err(IcerError::StorageOpenFailed),
        }
    }

    fn remove(&self, name: &str) -> bool {
        std::fs::remove_file(self.path_for(name)).is_ok()
    }

    fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

type MemFs = Rc<RefCell<HashMap<String, Rc<RefCell<Vec<u8>>>>>>;

/// In-memory storage namespace. Single-threaded, like the pipeline itself.
#[derive(Default)]
pub struct MemStorage {
    files: MemFs,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file with contents (test and host convenience).
    pub fn put(&self, name: &str, data: &[u8]) {
        self.files
            .borrow_mut()
            .insert(name.to_string(), Rc::new(RefCell::new(data.to_vec())));
    }

    /// Snapshot a file's contents, if present.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .borrow()
            .get(name)
            .map(|d| d.borrow().clone())
    }

    /// Names currently present, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

struct MemFile {
    data: Rc<RefCell<Vec<u8>>>,
    pos: u64,
    open: bool,
    writable: bool,
}

impl StorageFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.open {
            return 0;
        }
        let data = self.data.borrow();
        let start = self.pos.min(data.len() as u64) as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        n
    }

    fn write(&mut self, src: &[u8]) -> usize {
        if !self.open || !self.writable {
            return 0;
        }
        let mut data = self.data.borrow_mut();
        let start = self.pos as usize;
        let end = start + src.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        self.pos = end as u64;
        src.len()
    }

    fn seek(&mut self, position: u64) -> bool {
        if !self.open {
            return false;
        }
        self.pos = position;
        true
    }

    fn position(&mut self) -> u64 {
        self.pos
    }

    fn size(&mut self) -> u64 {
        self.data.borrow().len() as u64
    }

    fn flush(&mut self) -> bool {
        self.open
    }

    fn close(&mut self) -> bool {
        let was_open = self.open;
        self.open = false;
        was_open
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Storage for MemStorage {
    fn open(&self, name: &str, mode: Mode) -> Result<Box<dyn StorageFile>, IcerError> {
        let mut files = self.files.borrow_mut();
        let data = match files.get(name) {
            Some(d) => d.clone(),
            None => {
                if mode == Mode::Read {
                    return Err(IcerError::StorageOpenFailed);
                }
                let d = Rc::new(RefCell::new(Vec::new()));
                files.insert(name.to_string(), d.clone());
                d
            }
        };
        Ok(Box::new(MemFile {
            data,
            pos: 0,
            open: true,
            writable: mode == Mode::Write,
        }))
    }

    fn remove(&self, name: &str) -> bool {
        self.files.borrow_mut().remove(name).is_some()
    }

    fn exists(&self, name: &str) -> bool {
        self.files.borrow().contains_key(name)
    }
}
