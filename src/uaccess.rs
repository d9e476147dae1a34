//! Caller address-space regions.
//!
//! [`UserSlice`] and [`UserSliceMut`] stand for memory owned by the process
//! issuing a `write(2)` or `read(2)`. A region is either mapped (backed by a
//! caller slice) or unmapped. Copies check the whole range first and never
//! transfer a partial prefix: a copy either moves every byte or faults.

use crate::error::{DriverError, Result};

/// Readable region of caller memory (source of a write).
#[derive(Debug, Clone, Copy)]
pub struct UserSlice<'a> {
    mapped: Option<&'a [u8]>,
}

impl<'a> UserSlice<'a> {
    /// A mapped region backed by `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { mapped: Some(data) }
    }

    /// A region the caller does not have mapped.
    pub fn unmapped() -> Self {
        Self { mapped: None }
    }

    /// Number of accessible bytes.
    pub fn accessible(&self) -> usize {
        self.mapped.map_or(0, <[u8]>::len)
    }

    /// Copy the first `out.len()` bytes of the region into `out`.
    ///
    /// Returns `CopyFault` if that range is not accessible; `out` is
    /// untouched in that case.
    pub fn copy_into(&self, out: &mut [u8]) -> Result<()> {
        let len = out.len();
        match self.mapped {
            Some(src) if src.len() >= len => {
                out.copy_from_slice(&src[..len]);
                Ok(())
            }
            _ => Err(DriverError::CopyFault {
                len,
                accessible: self.accessible(),
            }),
        }
    }
}

/// Writable region of caller memory (destination of a read).
#[derive(Debug)]
pub struct UserSliceMut<'a> {
    mapped: Option<&'a mut [u8]>,
}

impl<'a> UserSliceMut<'a> {
    /// A mapped region backed by `data`.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { mapped: Some(data) }
    }

    /// A region the caller does not have mapped.
    pub fn unmapped() -> Self {
        Self { mapped: None }
    }

    /// Number of accessible bytes.
    pub fn accessible(&self) -> usize {
        self.mapped.as_deref().map_or(0, <[u8]>::len)
    }

    /// Copy all of `data` to the start of the region.
    ///
    /// Returns `CopyFault` if the region cannot hold `data`; the region is
    /// untouched in that case.
    pub fn copy_from(&mut self, data: &[u8]) -> Result<()> {
        let accessible = self.accessible();
        match self.mapped.as_deref_mut() {
            Some(dst) if dst.len() >= data.len() => {
                dst[..data.len()].copy_from_slice(data);
                Ok(())
            }
            _ => Err(DriverError::CopyFault {
                len: data.len(),
                accessible,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_into_prefix() {
        let src = UserSlice::new(b"1abc");
        let mut out = [0u8; 2];
        src.copy_into(&mut out).unwrap();
        assert_eq!(&out, b"1a");
    }

    #[test]
    fn test_short_source_faults_without_copy() {
        let src = UserSlice::new(b"ab");
        let mut out = [7u8; 4];
        let err = src.copy_into(&mut out).unwrap_err();
        assert!(matches!(
            err,
            DriverError::CopyFault {
                len: 4,
                accessible: 2
            }
        ));
        assert_eq!(out, [7u8; 4]);
    }

    #[test]
    fn test_unmapped_destination_faults() {
        let mut dst = UserSliceMut::unmapped();
        assert_eq!(dst.accessible(), 0);
        assert!(dst.copy_from(b"x").unwrap_err().is_copy_fault());
    }

    #[test]
    fn test_copy_from_fills_destination() {
        let mut backing = [0u8; 8];
        let mut dst = UserSliceMut::new(&mut backing);
        dst.copy_from(b"abc").unwrap();
        assert_eq!(&backing[..3], b"abc");
        assert_eq!(&backing[3..], &[0u8; 5]);
    }
}
