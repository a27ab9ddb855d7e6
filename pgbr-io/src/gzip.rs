use std::io;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::Filter;

enum Direction {
    Compress(Compress),
    Decompress(Decompress),
}

/// Gzip compress/decompress stage, driven the way the teacher's
/// `DeflateEncoder` drives `flate2::Compress` directly rather than through
/// the `Read`/`Write` wrapper types, since a `FilterGroup` stage needs
/// explicit control over partial consumption and flush state.
pub struct Gzip {
    dir: Direction,
    finished: bool,
}

impl Gzip {
    pub fn compress(level: u32) -> Self {
        Self {
            dir: Direction::Compress(Compress::new(Compression::new(level), true)),
            finished: false,
        }
    }

    pub fn decompress() -> Self {
        Self {
            dir: Direction::Decompress(Decompress::new(true)),
            finished: false,
        }
    }
}

impl Filter for Gzip {
    fn process_inout(&mut self, input: Option<&[u8]>, output: &mut [u8]) -> io::Result<(usize, usize)> {
        match &mut self.dir {
            Direction::Compress(compressor) => {
                let before_in = compressor.total_in();
                let before_out = compressor.total_out();
                let (data, flush) = match input {
                    Some(data) => (data, FlushCompress::None),
                    None => (&[][..], FlushCompress::Finish),
                };
                let status = compressor
                    .compress(data, output, flush)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                let consumed = (compressor.total_in() - before_in) as usize;
                let produced = (compressor.total_out() - before_out) as usize;
                if input.is_none() && status == Status::StreamEnd {
                    self.finished = true;
                }
                Ok((consumed, produced))
            }
            Direction::Decompress(decompressor) => {
                let before_in = decompressor.total_in();
                let before_out = decompressor.total_out();
                let (data, flush) = match input {
                    Some(data) => (data, FlushDecompress::None),
                    None => (&[][..], FlushDecompress::Finish),
                };
                let status = decompressor.decompress(data, output, flush).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("gzip stream corrupt: {e}"),
                    )
                })?;
                let consumed = (decompressor.total_in() - before_in) as usize;
                let produced = (decompressor.total_out() - before_out) as usize;
                if status == Status::StreamEnd {
                    self.finished = true;
                }
                Ok((consumed, produced))
            }
        }
    }

    fn input_same(&self) -> bool {
        false
    }

    fn done(&self) -> bool {
        self.finished
    }
}
