use std::io;

use crate::{Filter, FilterResult};

/// Tallies bytes passing through without altering them.
#[derive(Default)]
pub struct Size {
    total: u64,
    done: bool,
}

impl Size {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for Size {
    fn process_inout(&mut self, input: Option<&[u8]>, output: &mut [u8]) -> io::Result<(usize, usize)> {
        match input {
            Some(data) => {
                let n = data.len().min(output.len());
                output[..n].copy_from_slice(&data[..n]);
                self.total += n as u64;
                Ok((n, n))
            }
            None => {
                self.done = true;
                Ok((0, 0))
            }
        }
    }

    fn done(&self) -> bool {
        self.done
    }

    fn result(&self) -> FilterResult {
        FilterResult::Size(self.total)
    }
}
