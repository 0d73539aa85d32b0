use crate::error::ProtocolError;

/// Builds big-endian payloads.
///
/// Length-prefixed fields that overflow a `u16` are remembered and reported by
/// [`Writer::finish`], so call sites can write fields without checking each one.
pub(crate) struct Writer {
    buf: Vec<u8>,
    overflow: Option<usize>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            overflow: None,
        }
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn write_len(&mut self, len: usize) {
        if let Ok(len) = u16::try_from(len) {
            self.write_u16(len);
        } else {
            self.overflow.get_or_insert(len);
            self.write_u16(0);
        }
    }

    pub(crate) fn write_blob(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn write_string(&mut self, s: &str) {
        self.write_blob(s.as_bytes());
    }

    pub(crate) fn write_strings(&mut self, items: &[String]) {
        self.write_len(items.len());
        for item in items {
            self.write_string(item);
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn reserve_u16(&mut self) -> usize {
        let pos = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 2]);
        pos
    }

    /// Patches a slot returned by [`Writer::reserve_u16`] with a length.
    pub(crate) fn patch_len(&mut self, pos: usize, len: usize) {
        match u16::try_from(len) {
            Ok(len) => self.buf[pos..pos + 2].copy_from_slice(&len.to_be_bytes()),
            Err(_) => {
                self.overflow.get_or_insert(len);
            }
        }
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>, ProtocolError> {
        match self.overflow {
            Some(len) => Err(ProtocolError::FieldTooLong { len }),
            None => Ok(self.buf),
        }
    }
}
