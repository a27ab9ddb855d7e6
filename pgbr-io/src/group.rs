use std::io;

/// Terminal tally a filter may report once `done()`.
#[derive(Debug, Clone)]
pub enum FilterResult {
    None,
    Size(u64),
    Hash(String),
}

/// One stage of a `FilterGroup`. A filter is either a sink (`is_sink`,
/// drives via `process_in`) or a transformer (drives via `process_inout`);
/// `done` reports whether the filter has flushed everything it will ever
/// produce after seeing a `None` (end-of-stream) input.
pub trait Filter: Send {
    fn is_sink(&self) -> bool {
        false
    }

    fn process_in(&mut self, input: Option<&[u8]>) -> io::Result<usize> {
        let _ = input;
        Ok(0)
    }

    /// Consume a prefix of `input` (`None` signals end-of-stream), writing
    /// transformed bytes into `output`. Returns `(consumed, produced)`.
    fn process_inout(&mut self, input: Option<&[u8]>, output: &mut [u8]) -> io::Result<(usize, usize)>;

    fn done(&self) -> bool;

    /// True if the filter could not consume all of the last input it was
    /// given (output was full) and must be re-offered the same bytes
    /// before the group advances to a new chunk.
    fn input_same(&self) -> bool {
        false
    }

    fn result(&self) -> FilterResult {
        FilterResult::None
    }
}

const SCRATCH_SIZE: usize = 64 * 1024;

struct Stage {
    carry_in: Vec<u8>,
    eof_in: bool,
}

/// An ordered pipeline of filters, driven chunk by chunk. Buffers between
/// stages internally so callers only ever see the group's external input
/// and output, matching the orchestration contract: each call drains
/// back-to-front, prioritizing any filter that reported `input_same` on
/// the previous call, before the head filter accepts new input.
pub struct FilterGroup {
    filters: Vec<Box<dyn Filter>>,
    stages: Vec<Stage>,
    scratch: Vec<u8>,
}

impl FilterGroup {
    pub fn new(mut filters: Vec<Box<dyn Filter>>) -> Self {
        if filters.last().map(|f| f.is_sink()).unwrap_or(true) {
            filters.push(Box::new(super::Buffer::new()));
        }
        let n = filters.len();
        Self {
            filters,
            stages: (0..n)
                .map(|_| Stage {
                    carry_in: Vec::new(),
                    eof_in: false,
                })
                .collect(),
            scratch: vec![0u8; SCRATCH_SIZE],
        }
    }

    pub fn result(&self, index: usize) -> FilterResult {
        self.filters
            .get(index)
            .map(|f| f.result())
            .unwrap_or(FilterResult::None)
    }

    pub fn done(&self) -> bool {
        self.filters.last().map(|f| f.done()).unwrap_or(true)
    }

    /// Feed `input` (`None` = end-of-stream) and drain as much output as
    /// fits into `output`. Returns the number of bytes written.
    pub fn process(&mut self, input: Option<&[u8]>, output: &mut [u8]) -> io::Result<usize> {
        match input {
            Some(data) => self.stages[0].carry_in.extend_from_slice(data),
            None => self.stages[0].eof_in = true,
        }

        let mut out_pos = 0;
        loop {
            let mut progressed = false;

            // Back-to-front: a filter that left data unconsumed last round
            // must be retried before the head of the chain accepts more.
            for i in (0..self.filters.len()).rev() {
                if self.filters[i].input_same() {
                    progressed |= self.step(i, output, &mut out_pos)?;
                }
            }
            if progressed {
                continue;
            }

            for i in 0..self.filters.len() {
                progressed |= self.step(i, output, &mut out_pos)?;
                if out_pos >= output.len() {
                    break;
                }
            }

            if !progressed || out_pos >= output.len() {
                break;
            }
        }
        Ok(out_pos)
    }

    fn step(&mut self, i: usize, output: &mut [u8], out_pos: &mut usize) -> io::Result<bool> {
        if self.filters[i].done() {
            return Ok(false);
        }

        let is_last = i + 1 == self.filters.len();
        let stage_input: Option<&[u8]> = if !self.stages[i].carry_in.is_empty() {
            Some(self.stages[i].carry_in.as_slice())
        } else if self.stages[i].eof_in {
            None
        } else {
            return Ok(false);
        };
        let was_eof = stage_input.is_none();

        if self.filters[i].is_sink() {
            let consumed = self.filters[i].process_in(stage_input)?;
            if !was_eof {
                self.stages[i].carry_in.drain(..consumed);
            } else if self.filters[i].done() && i + 1 < self.stages.len() {
                self.stages[i + 1].eof_in = true;
            }
            return Ok(consumed > 0 || (was_eof && self.filters[i].done()));
        }

        let (consumed, produced) = if is_last {
            let room = output.len() - *out_pos;
            if room == 0 {
                return Ok(false);
            }
            let (c, p) = self.filters[i].process_inout(stage_input, &mut output[*out_pos..])?;
            *out_pos += p;
            (c, p)
        } else {
            let (c, p) = self.filters[i].process_inout(stage_input, &mut self.scratch)?;
            if p > 0 {
                let next = i + 1;
                self.stages[next].carry_in.extend_from_slice(&self.scratch[..p]);
            }
            (c, p)
        };

        if !was_eof {
            self.stages[i].carry_in.drain(..consumed);
        } else if self.filters[i].done() && i + 1 < self.stages.len() {
            self.stages[i + 1].eof_in = true;
        }

        Ok(consumed > 0 || produced > 0)
    }
}
