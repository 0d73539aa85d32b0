use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Input frames per resampler pass.
pub(crate) const CHUNK_FRAMES: usize = 1024;

/// Planar multi-channel sample-rate converter fed one chunk at a time.
pub(crate) struct AudioResampler {
    /// FFT-based resampler
    resampler: FftFixedIn<f32>,

    /// Reused output buffer, one `Vec` per channel
    output_buffer: Vec<Vec<f32>>,

    source_rate: u32,
    target_rate: u32,

    /// Output frames still owed to the filter delay
    delay_left: usize,
    frames_in: usize,
    frames_out: usize,
}

#[derive(Debug, Clone, Error)]
pub(crate) enum ResamplerError {
    #[error("Resampler initialization error: {0}")]
    Initialization(String),

    #[error("Resampling error: {0}")]
    Resampling(String),
}

impl AudioResampler {
    pub(crate) fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplerError> {
        let resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            CHUNK_FRAMES,
            2, // sub_chunks (quality/performance balance)
            channels,
        )
        .map_err(|e| ResamplerError::Initialization(e.to_string()))?;

        let output_buffer = resampler.output_buffer_allocate(true);
        let delay_left = resampler.output_delay();

        Ok(Self {
            resampler,
            output_buffer,
            source_rate,
            target_rate,
            delay_left,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Converts one chunk of at most [`CHUNK_FRAMES`] frames per channel.
    /// A short chunk is zero-padded and must be the last one before [`Self::flush`].
    ///
    /// The filter delay is trimmed, so early calls may return empty channels.
    pub(crate) fn process(&mut self, input: &[&[f32]]) -> Result<Vec<Vec<f32>>, ResamplerError> {
        let frames = input.first().map_or(0, |c| c.len());
        let (_, produced) = if frames == CHUNK_FRAMES {
            self.resampler
                .process_into_buffer(input, &mut self.output_buffer, None)
        } else {
            self.resampler
                .process_partial_into_buffer(Some(input), &mut self.output_buffer, None)
        }
        .map_err(|e| ResamplerError::Resampling(e.to_string()))?;
        self.frames_in += frames;
        Ok(self.take(produced))
    }

    /// Drains the filter tail once the input has ended.
    pub(crate) fn flush(&mut self) -> Result<Vec<Vec<f32>>, ResamplerError> {
        let (_, produced) = self
            .resampler
            .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buffer, None)
            .map_err(|e| ResamplerError::Resampling(e.to_string()))?;
        Ok(self.take(produced))
    }

    /// Copies out the usable part of the last pass: past the delay, and never
    /// beyond the length the input so far maps to.
    fn take(&mut self, produced: usize) -> Vec<Vec<f32>> {
        let start = self.delay_left.min(produced);
        self.delay_left -= start;

        let expected = self.frames_in * self.target_rate as usize / self.source_rate as usize;
        let len = (produced - start).min(expected.saturating_sub(self.frames_out));
        self.frames_out += len;

        self.output_buffer
            .iter()
            .map(|channel| channel[start..start + len].to_vec())
            .collect()
    }
}
