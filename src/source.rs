// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::io;

/// The random-access byte source backing an MSF file.
///
/// The MSF layer asks a `Source` for exact reads at absolute file offsets;
/// it never reads past `size()`. A single owner holds the source and all
/// reads go through it sequentially, so implementations do not need to be
/// thread-safe.
///
/// # Default
///
/// There is a blanket implementation for `std::io::Read + std::io::Seek +
/// std::fmt::Debug`, so a `std::fs::File` or an in-memory
/// `std::io::Cursor<Vec<u8>>` can be used directly.
pub trait Source: fmt::Debug {
    /// Fills `buf` with the bytes at `offset`.
    ///
    /// Short reads are errors; the MSF layer sizes its requests from the
    /// stream directory and a short read means the file is truncated.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Returns the total size of the source in bytes.
    fn size(&mut self) -> io::Result<u64>;
}

impl<T> Source for T
where
    T: io::Read + io::Seek + fmt::Debug,
{
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.seek(io::SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        let end = self.seek(io::SeekFrom::End(0))?;
        self.seek(io::SeekFrom::Start(0))?;
        Ok(end)
    }
}
