//! Cursor over a bytecode buffer.
//!
//! The reader owns the raw bytes, an explicit instruction pointer, and the
//! module's global constant pools (filled in when the dispatch loop passes
//! the constant table instructions). Every read is bounds-checked and fails
//! with a *bytecode* error instead of panicking.

use core_types::{HtError, HtVersion};
use std::rc::Rc;

/// A bounds-checked cursor over one module's bytecode.
///
/// The underlying buffer and constant pools are shared, so cloning a reader
/// is cheap: nested executions (function bodies, late initializers) each run
/// on their own cursor over the same bytes.
///
/// # Examples
///
/// ```
/// use bytecode_system::BytecodeReader;
///
/// let mut reader = BytecodeReader::new(vec![0x2A, 0x01, 0x00]);
/// assert_eq!(reader.read_u8().unwrap(), 0x2A);
/// assert_eq!(reader.read_u16().unwrap(), 1);
/// assert!(reader.read_u8().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BytecodeReader {
    bytes: Rc<Vec<u8>>,
    ip: usize,
    const_ints: Rc<Vec<i64>>,
    const_floats: Rc<Vec<f64>>,
    const_strings: Rc<Vec<String>>,
}

impl BytecodeReader {
    /// Create a reader over a byte buffer, positioned at the start.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Rc::new(bytes),
            ip: 0,
            const_ints: Rc::new(Vec::new()),
            const_floats: Rc::new(Vec::new()),
            const_strings: Rc::new(Vec::new()),
        }
    }

    /// Current instruction pointer.
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Move the instruction pointer to an absolute position.
    pub fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the cursor has bytes left to read.
    pub fn has_remaining(&self) -> bool {
        self.ip < self.bytes.len()
    }

    fn take(&mut self, count: usize) -> Result<&[u8], HtError> {
        if self.ip + count > self.bytes.len() {
            return Err(HtError::bytecode(format!(
                "Unexpected end of bytecode at ip {} (wanted {} bytes of {})",
                self.ip,
                count,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.ip..self.ip + count];
        self.ip += count;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, HtError> {
        Ok(self.take(1)?[0])
    }

    /// Read one byte as a boolean (nonzero is true).
    pub fn read_bool(&mut self) -> Result<bool, HtError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a little-endian i16.
    pub fn read_i16(&mut self) -> Result<i16, HtError> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, HtError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, HtError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64, HtError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// Read a little-endian IEEE-754 f64.
    pub fn read_f64(&mut self) -> Result<f64, HtError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    /// Read a u32-length-prefixed UTF-8 string.
    pub fn read_utf8(&mut self) -> Result<String, HtError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HtError::bytecode(format!("Invalid UTF-8 in bytecode: {}", e)))
    }

    /// Read a version tuple.
    pub fn read_version(&mut self) -> Result<HtVersion, HtError> {
        let major = self.read_u8()?;
        let minor = self.read_u8()?;
        let patch = self.read_u16()?;
        let mut version = HtVersion::new(major, minor, patch);
        let pre_count = self.read_u8()?;
        for _ in 0..pre_count {
            version.pre.push(self.read_utf8()?);
        }
        let build_count = self.read_u8()?;
        for _ in 0..build_count {
            version.build.push(self.read_utf8()?);
        }
        Ok(version)
    }

    /// Skip `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<(), HtError> {
        self.take(count).map(|_| ())
    }

    /// Fill the int constant pool: u16 count then that many i64 entries.
    pub fn read_const_int_table(&mut self) -> Result<(), HtError> {
        let count = self.read_u16()? as usize;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            table.push(self.read_i64()?);
        }
        self.const_ints = Rc::new(table);
        Ok(())
    }

    /// Fill the float constant pool: u16 count then that many f64 entries.
    pub fn read_const_float_table(&mut self) -> Result<(), HtError> {
        let count = self.read_u16()? as usize;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            table.push(self.read_f64()?);
        }
        self.const_floats = Rc::new(table);
        Ok(())
    }

    /// Fill the string constant pool: u16 count then that many utf8 entries.
    pub fn read_const_string_table(&mut self) -> Result<(), HtError> {
        let count = self.read_u16()? as usize;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            table.push(self.read_utf8()?);
        }
        self.const_strings = Rc::new(table);
        Ok(())
    }

    /// Look up an int constant by pool index.
    pub fn const_int(&self, index: u16) -> Result<i64, HtError> {
        self.const_ints.get(index as usize).copied().ok_or_else(|| {
            HtError::bytecode(format!("Int constant index {} out of range", index))
        })
    }

    /// Look up a float constant by pool index.
    pub fn const_float(&self, index: u16) -> Result<f64, HtError> {
        self.const_floats.get(index as usize).copied().ok_or_else(|| {
            HtError::bytecode(format!("Float constant index {} out of range", index))
        })
    }

    /// Look up a string constant by pool index.
    pub fn const_string(&self, index: u16) -> Result<&str, HtError> {
        self.const_strings
            .get(index as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| {
                HtError::bytecode(format!("String constant index {} out of range", index))
            })
    }

    /// Read a u16 pool index and resolve it as a string constant.
    pub fn read_const_string(&mut self) -> Result<String, HtError> {
        let index = self.read_u16()?;
        self.const_string(index).map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_reads() {
        let mut bytes = Vec::new();
        bytes.push(7u8);
        bytes.extend_from_slice(&(-3i16).to_le_bytes());
        bytes.extend_from_slice(&500u16.to_le_bytes());
        bytes.extend_from_slice(&(-42i64).to_le_bytes());
        bytes.extend_from_slice(&3.5f64.to_le_bytes());

        let mut reader = BytecodeReader::new(bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_i16().unwrap(), -3);
        assert_eq!(reader.read_u16().unwrap(), 500);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert_eq!(reader.read_f64().unwrap(), 3.5);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_out_of_range_read_fails() {
        let mut reader = BytecodeReader::new(vec![1]);
        assert_eq!(reader.read_u8().unwrap(), 1);
        let error = reader.read_u8().unwrap_err();
        assert_eq!(error.kind, core_types::ErrorKind::Bytecode);
    }

    #[test]
    fn test_utf8_read() {
        let mut bytes = Vec::new();
        let text = "héllo";
        bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
        let mut reader = BytecodeReader::new(bytes);
        assert_eq!(reader.read_utf8().unwrap(), "héllo");
    }

    #[test]
    fn test_const_tables() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&40i64.to_le_bytes());
        bytes.extend_from_slice(&2i64.to_le_bytes());
        let mut reader = BytecodeReader::new(bytes);
        reader.read_const_int_table().unwrap();
        assert_eq!(reader.const_int(0).unwrap(), 40);
        assert_eq!(reader.const_int(1).unwrap(), 2);
        assert!(reader.const_int(2).is_err());
    }

    #[test]
    fn test_ip_seek() {
        let mut reader = BytecodeReader::new(vec![1, 2, 3, 4]);
        reader.set_ip(2);
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert_eq!(reader.ip(), 3);
    }

    #[test]
    fn test_version_roundtrip() {
        let mut bytes = vec![0u8, 5, 0, 0];
        bytes.push(1); // one pre chunk
        bytes.extend_from_slice(&(3u32).to_le_bytes());
        bytes.extend_from_slice(b"dev");
        bytes.push(0); // no build chunks
        let mut reader = BytecodeReader::new(bytes);
        let version = reader.read_version().unwrap();
        assert_eq!(version.to_string(), "0.5.0-dev");
    }
}
