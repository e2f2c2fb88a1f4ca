use crate::Result;

/// Record storage abstraction backing [crate::dbt::Index]. Stores
/// fixed-length records keyed by monotonically increasing record
/// numbers, starting from 1.
///
/// Implementations are expected to provide whatever transactional
/// guarantees the application needs. After aborting such a
/// transaction, resynchronize the index with
/// [crate::dbt::Index::reload].
pub trait RecordStore {
    /// Length of every record in this store.
    fn record_len(&self) -> usize;

    /// Read record `recno` into `buf`, which must be record_len
    /// bytes.
    fn get(&mut self, recno: u64, buf: &mut [u8]) -> Result<()>;

    /// Overwrite existing record `recno`.
    fn put(&mut self, recno: u64, data: &[u8]) -> Result<()>;

    /// Append a new record, return its record number.
    fn append(&mut self, data: &[u8]) -> Result<u64>;

    /// Erase record `recno`. Only the highest allocated record can
    /// be erased.
    fn del(&mut self, recno: u64) -> Result<()>;

    /// Make previous writes durable.
    fn sync(&mut self) -> Result<()>;
}

/// Volatile [RecordStore], records live in process memory. Useful
/// for tests and caches that do not out-live the process.
pub struct MemStore {
    record_len: usize,
    records: Vec<Vec<u8>>,
}

impl MemStore {
    pub fn new(record_len: usize) -> MemStore {
        MemStore {
            record_len,
            records: Vec::default(),
        }
    }

    fn check_recno(&self, recno: u64) -> Result<usize> {
        if recno == 0 || recno > self.records.len() as u64 {
            err_at!(IOError, msg: "no record {}", recno)
        } else {
            Ok((recno - 1) as usize)
        }
    }

    fn check_data(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.record_len {
            err_at!(InvalidInput, msg: "record length {} != {}", data.len(), self.record_len)
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemStore {
    fn record_len(&self) -> usize {
        self.record_len
    }

    fn get(&mut self, recno: u64, buf: &mut [u8]) -> Result<()> {
        let off = self.check_recno(recno)?;
        buf.copy_from_slice(&self.records[off]);
        Ok(())
    }

    fn put(&mut self, recno: u64, data: &[u8]) -> Result<()> {
        self.check_data(data)?;
        let off = self.check_recno(recno)?;
        self.records[off].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> Result<u64> {
        self.check_data(data)?;
        self.records.push(data.to_vec());
        Ok(self.records.len() as u64)
    }

    fn del(&mut self, recno: u64) -> Result<()> {
        self.check_recno(recno)?;
        if recno != self.records.len() as u64 {
            err_at!(InvalidInput, msg: "record {} not the trailing record", recno)?;
        }
        self.records.pop();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
