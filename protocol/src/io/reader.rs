use crate::error::ProtocolError;

/// Big-endian cursor over a borrowed buffer.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Takes the next `len` bytes, or reports how many were missing.
    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + len;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(ProtocolError::PacketTooShort {
                expected: end,
                got: self.data.len(),
            })?;
        self.pos = end;
        Ok(bytes)
    }

    #[inline]
    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    #[inline]
    pub(crate) fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>()?[0])
    }

    #[inline]
    pub(crate) fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.read_array().map(u16::from_be_bytes)
    }

    #[inline]
    pub(crate) fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.read_array().map(u32::from_be_bytes)
    }

    #[inline]
    pub(crate) fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.read_array().map(u64::from_be_bytes)
    }

    #[inline]
    pub(crate) fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a `u16`-length-prefixed byte blob.
    pub(crate) fn read_blob(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    pub(crate) fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Reads a `u16` count followed by that many strings.
    pub(crate) fn read_strings(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.read_u16()? as usize;
        (0..count).map(|_| self.read_string()).collect()
    }

    #[inline]
    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}
