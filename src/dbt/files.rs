use fs2::FileExt;

use std::{
    ffi, fs,
    io::{Read, Seek, SeekFrom, Write},
    path,
};

use crate::{
    dbt::{buf, store::RecordStore},
    Result,
};

// write `data` fully, detecting partial writes.
macro_rules! write_part {
    ($fd:expr, $data:expr, $loc:expr) => {{
        match err_at!(IOError, $fd.write($data))? {
            n if n == $data.len() => Ok(()),
            n => err_at!(IOError, msg: "partial-wr {:?}, {}/{}", $loc, $data.len(), n),
        }
    }};
}

pub struct IndexFileName(pub ffi::OsString);

impl From<String> for IndexFileName {
    fn from(name: String) -> IndexFileName {
        let file_name = format!("{}.btree", name);
        IndexFileName(file_name.into())
    }
}

impl From<IndexFileName> for ffi::OsString {
    fn from(name: IndexFileName) -> ffi::OsString {
        name.0
    }
}

// file prologue, before the first record.
const FILE_MAGIC: u32 = 0x1b7c_e55e;
const FILE_VERSION: u32 = 1;
const SIZE_PROLOGUE: usize = 16;

/// File backed [RecordStore]. Fixed-length records are stored back
/// to back after a small prologue carrying the record length. The
/// file is advisory-locked for the lifetime of the store, exclusive
/// for writable stores, shared for read-only stores.
pub struct FileStore {
    loc: ffi::OsString,
    fd: fs::File,
    record_len: usize,
    n_records: u64,
    rdonly: bool,
}

impl FileStore {
    /// Create a fresh store at `loc` holding records of
    /// `record_len` bytes. An existing file at `loc` is destroyed.
    pub fn create(loc: &ffi::OsStr, record_len: usize) -> Result<FileStore> {
        if record_len == 0 {
            err_at!(InvalidInput, msg: "record length cannot be zero")?;
        }
        let os_file = path::Path::new(loc);
        fs::remove_file(os_file).ok(); // NOTE: ignore remove errors.
        if let Some(parent) = os_file.parent() {
            err_at!(IOError, fs::create_dir_all(parent))?;
        }

        let mut opts = fs::OpenOptions::new();
        let mut fd = err_at!(
            IOError,
            opts.read(true).write(true).create_new(true).open(os_file)
        )?;
        err_at!(IOError, fd.lock_exclusive(), "locking {:?}", loc)?;

        let mut prologue = [0_u8; SIZE_PROLOGUE];
        buf::set_u32(&mut prologue, 0, FILE_MAGIC);
        buf::set_u32(&mut prologue, 4, FILE_VERSION);
        buf::set_u32(&mut prologue, 8, record_len as u32);
        write_part!(fd, &prologue, loc)?;

        Ok(FileStore {
            loc: loc.to_os_string(),
            fd,
            record_len,
            n_records: 0,
            rdonly: false,
        })
    }

    /// Open an existing store at `loc`. The record length is read
    /// back from the file prologue.
    pub fn open(loc: &ffi::OsStr, rdonly: bool) -> Result<FileStore> {
        let mut opts = fs::OpenOptions::new();
        opts.read(true);
        if !rdonly {
            opts.write(true);
        }
        let mut fd = err_at!(IOError, opts.open(path::Path::new(loc)))?;
        if rdonly {
            err_at!(IOError, fd.lock_shared(), "locking {:?}", loc)?;
        } else {
            err_at!(IOError, fd.lock_exclusive(), "locking {:?}", loc)?;
        }

        let mut prologue = [0_u8; SIZE_PROLOGUE];
        err_at!(IOError, fd.seek(SeekFrom::Start(0)))?;
        err_at!(IOError, fd.read_exact(&mut prologue), "reading {:?}", loc)?;
        let magic = buf::get_u32(&prologue, 0);
        if magic != FILE_MAGIC {
            err_at!(InvalidFile, msg: "bad magic {:x} in {:?}", magic, loc)?;
        }
        let version = buf::get_u32(&prologue, 4);
        if version != FILE_VERSION {
            err_at!(InvalidFile, msg: "bad version {} in {:?}", version, loc)?;
        }
        let record_len = buf::get_u32(&prologue, 8) as usize;
        if record_len == 0 {
            err_at!(InvalidFile, msg: "zero record length in {:?}", loc)?;
        }

        let len = err_at!(IOError, fd.metadata())?.len();
        let payload = len.saturating_sub(SIZE_PROLOGUE as u64);
        if payload % record_len as u64 != 0 {
            err_at!(InvalidFile, msg: "{:?} truncated at {}", loc, len)?;
        }

        Ok(FileStore {
            loc: loc.to_os_string(),
            fd,
            record_len,
            n_records: payload / record_len as u64,
            rdonly,
        })
    }

    /// Return whether a store exists at `loc`.
    pub fn exists(loc: &ffi::OsStr) -> bool {
        path::Path::new(loc).is_file()
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    fn to_fpos(&self, recno: u64) -> u64 {
        SIZE_PROLOGUE as u64 + (recno - 1) * self.record_len as u64
    }

    fn check_recno(&self, recno: u64) -> Result<()> {
        if recno == 0 || recno > self.n_records {
            err_at!(IOError, msg: "no record {} in {:?}", recno, self.loc)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self, data: &[u8]) -> Result<()> {
        if self.rdonly {
            err_at!(ReadOnly, msg: "{:?} opened read-only", self.loc)?;
        }
        if data.len() != self.record_len {
            err_at!(InvalidInput, msg: "record length {} != {}", data.len(), self.record_len)?;
        }
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn record_len(&self) -> usize {
        self.record_len
    }

    fn get(&mut self, recno: u64, buf: &mut [u8]) -> Result<()> {
        self.check_recno(recno)?;
        let fpos = self.to_fpos(recno);
        err_at!(IOError, self.fd.seek(SeekFrom::Start(fpos)))?;
        err_at!(IOError, self.fd.read_exact(buf), "reading {:?}", self.loc)
    }

    fn put(&mut self, recno: u64, data: &[u8]) -> Result<()> {
        self.check_writable(data)?;
        self.check_recno(recno)?;
        let fpos = self.to_fpos(recno);
        err_at!(IOError, self.fd.seek(SeekFrom::Start(fpos)))?;
        write_part!(self.fd, data, self.loc)
    }

    fn append(&mut self, data: &[u8]) -> Result<u64> {
        self.check_writable(data)?;
        let fpos = self.to_fpos(self.n_records + 1);
        err_at!(IOError, self.fd.seek(SeekFrom::Start(fpos)))?;
        write_part!(self.fd, data, self.loc)?;
        self.n_records += 1;
        Ok(self.n_records)
    }

    fn del(&mut self, recno: u64) -> Result<()> {
        if self.rdonly {
            err_at!(ReadOnly, msg: "{:?} opened read-only", self.loc)?;
        }
        self.check_recno(recno)?;
        if recno != self.n_records {
            err_at!(InvalidInput, msg: "record {} not the trailing record", recno)?;
        }
        self.n_records -= 1;
        err_at!(IOError, self.fd.set_len(self.to_fpos(recno)))
    }

    fn sync(&mut self) -> Result<()> {
        err_at!(IOError, self.fd.sync_all())
    }
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
