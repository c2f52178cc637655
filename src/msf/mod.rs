// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The MSF (Multi-Stream Format) block container underlying every PDB file.

use std::io;

use crate::common::*;
use crate::source::Source;

mod stream;
pub use self::stream::StreamReader;

/// The MSF 7.00 magic signature.
pub(crate) const MAGIC: &[u8; 32] = b"Microsoft C/C++ MSF 7.00\r\n\x1a\x44\x53\x00\x00\x00";

/// A stream directory size of `0xffffffff` marks an unused stream.
pub(crate) const UNUSED_STREAM_SIZE: u32 = 0xffff_ffff;

const SUPER_BLOCK_SIZE: usize = 56;
const VALID_BLOCK_SIZES: [u32; 4] = [512, 1024, 2048, 4096];

/// The fixed header at the start of an MSF file.
#[derive(Debug, Copy, Clone)]
pub struct SuperBlock {
    /// Block size in bytes; one of 512, 1024, 2048 or 4096.
    pub block_size: u32,
    /// Index of the active free-block-map block; 1 or 2.
    pub free_block_map: u32,
    /// Total number of blocks in the file.
    pub num_blocks: u32,
    /// Size of the stream directory in bytes.
    pub num_directory_bytes: u32,
    /// Reserved.
    pub unknown: u32,
    /// Block index of the directory block map.
    pub block_map_addr: u32,
}

impl SuperBlock {
    fn parse(buf: &mut ParseBuffer<'_>) -> Result<Self> {
        let magic = buf.take(32)?;
        if magic != MAGIC {
            return Err(Error::UnrecognizedFileFormat);
        }

        let super_block = SuperBlock {
            block_size: buf.parse_u32()?,
            free_block_map: buf.parse_u32()?,
            num_blocks: buf.parse_u32()?,
            num_directory_bytes: buf.parse_u32()?,
            unknown: buf.parse_u32()?,
            block_map_addr: buf.parse_u32()?,
        };

        if !VALID_BLOCK_SIZES.contains(&super_block.block_size) {
            return Err(Error::InvalidBlockSize(super_block.block_size));
        }
        if super_block.free_block_map != 1 && super_block.free_block_map != 2 {
            return Err(Error::InvalidFreeBlockMap(super_block.free_block_map));
        }

        Ok(super_block)
    }

    /// The number of blocks needed to store the stream directory.
    pub fn num_directory_blocks(&self) -> u32 {
        blocks_needed(self.num_directory_bytes, self.block_size)
    }

    /// The file size implied by the block count.
    pub fn file_size(&self) -> u64 {
        u64::from(self.num_blocks) * u64::from(self.block_size)
    }
}

fn blocks_needed(bytes: u32, block_size: u32) -> u32 {
    ((u64::from(bytes) + u64::from(block_size) - 1) / u64::from(block_size)) as u32
}

fn read_exact_at<S: Source>(source: &mut S, buf: &mut [u8], offset: u64) -> Result<()> {
    source.read_at(buf, offset).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::IoError(e)
        }
    })
}

#[derive(Debug)]
struct StreamEntry {
    size: u32,
    blocks: Vec<u32>,
}

/// An opened MSF file: the super-block plus the parsed stream directory.
///
/// Streams are addressed by index. A stream's bytes live in potentially
/// non-contiguous blocks; [`StreamReader`] presents them as a contiguous
/// sequence.
#[derive(Debug)]
pub struct Msf<S> {
    source: S,
    super_block: SuperBlock,
    streams: Vec<StreamEntry>,
}

impl<S: Source> Msf<S> {
    /// Opens an MSF file: validates the super-block and loads the stream
    /// directory.
    pub fn open(mut source: S) -> Result<Self> {
        let mut header = [0u8; SUPER_BLOCK_SIZE];
        source.read_at(&mut header, 0).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::UnrecognizedFileFormat
            } else {
                Error::IoError(e)
            }
        })?;

        let super_block = SuperBlock::parse(&mut ParseBuffer::from(&header[..]))?;

        if source.size()? < super_block.file_size() {
            return Err(Error::FileTooSmall);
        }

        let directory = read_directory(&mut source, &super_block)?;
        let streams = parse_directory(&directory, super_block.block_size)?;

        log::debug!(
            "opened MSF: block size {}, {} blocks, {} streams",
            super_block.block_size,
            super_block.num_blocks,
            streams.len()
        );

        Ok(Msf {
            source,
            super_block,
            streams,
        })
    }

    /// The super-block this file was opened with.
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// The block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.super_block.block_size
    }

    /// The total number of blocks in the file.
    pub fn num_blocks(&self) -> u32 {
        self.super_block.num_blocks
    }

    /// The number of blocks holding the stream directory.
    pub fn num_directory_blocks(&self) -> u32 {
        self.super_block.num_directory_blocks()
    }

    /// The number of streams in the directory.
    pub fn num_streams(&self) -> u32 {
        self.streams.len() as u32
    }

    /// The size of a stream in bytes. Unused streams report 0.
    pub fn stream_size(&self, index: u32) -> Result<u32> {
        match self.streams.get(index as usize) {
            Some(entry) => Ok(entry.size),
            None => Err(Error::StreamNotFound(index)),
        }
    }

    /// Returns a reader positioned at the start of the given stream.
    pub fn stream_reader(&mut self, index: u32) -> Result<StreamReader<'_, S>> {
        let entry = match self.streams.get(index as usize) {
            Some(entry) => entry,
            None => return Err(Error::StreamNotFound(index)),
        };
        Ok(StreamReader::new(
            &mut self.source,
            &entry.blocks,
            entry.size,
            self.super_block.block_size,
        ))
    }

    /// Reads an entire stream into memory.
    ///
    /// Returns exactly `stream_size(index)` bytes, or `Error::UnexpectedEof`
    /// if the underlying file is shorter than the directory promises.
    pub fn read_stream(&mut self, index: u32) -> Result<Vec<u8>> {
        use std::io::Read;

        let size = self.stream_size(index)? as usize;
        let mut data = vec![0u8; size];
        let mut reader = self.stream_reader(index)?;
        reader.read_exact(&mut data).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::IoError(e)
            }
        })?;
        Ok(data)
    }
}

/// Concatenates the directory blocks named by the block map.
fn read_directory<S: Source>(source: &mut S, super_block: &SuperBlock) -> Result<Vec<u8>> {
    let block_size = super_block.block_size;
    let num_dir_blocks = super_block.num_directory_blocks() as usize;

    // the block map is an array of u32 block indices at block_map_addr
    let mut map_bytes = vec![0u8; num_dir_blocks * 4];
    let map_offset = u64::from(super_block.block_map_addr) * u64::from(block_size);
    read_exact_at(source, &mut map_bytes, map_offset)?;

    let mut map_buf = ParseBuffer::from(map_bytes.as_slice());
    let mut directory = vec![0u8; super_block.num_directory_bytes as usize];

    let mut copied = 0usize;
    for _ in 0..num_dir_blocks {
        let block = map_buf.parse_u32()?;
        let to_read = (block_size as usize).min(directory.len() - copied);
        let offset = u64::from(block) * u64::from(block_size);
        read_exact_at(source, &mut directory[copied..copied + to_read], offset)?;
        copied += to_read;
    }

    Ok(directory)
}

/// Parses the stream directory: stream count, sizes, then per-stream block
/// lists. A size of `0xffffffff` marks an unused stream, which gets no
/// blocks and reads as empty.
fn parse_directory(directory: &[u8], block_size: u32) -> Result<Vec<StreamEntry>> {
    let mut buf = ParseBuffer::from(directory);

    let num_streams = buf.parse_u32()?;

    let mut sizes = Vec::new();
    for _ in 0..num_streams {
        sizes.push(buf.parse_u32()?);
    }

    let mut streams = Vec::new();
    for size in sizes {
        if size == UNUSED_STREAM_SIZE {
            streams.push(StreamEntry {
                size: 0,
                blocks: Vec::new(),
            });
            continue;
        }

        let num_stream_blocks = blocks_needed(size, block_size);
        let mut blocks = Vec::new();
        for _ in 0..num_stream_blocks {
            blocks.push(buf.parse_u32()?);
        }
        streams.push(StreamEntry { size, blocks });
    }

    Ok(streams)
}
