//! Float pixel storage shared by every pipeline stage.
//!
//! Samples are normalized `f32`, interleaved per pixel. Deep images store a
//! variable number of samples per pixel, each sample holding one value per
//! channel, ordered front to back.

#[derive(Debug, Clone, PartialEq)]
enum Samples {
    Flat(Vec<f32>),
    Deep(Vec<Vec<f32>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channel_names: Vec<String>,
    samples: Samples,
}

impl PixelBuffer {
    /// Wrap interleaved flat samples. Returns `None` if `data` does not hold
    /// exactly `width * height * channels` values.
    pub fn from_flat<S: AsRef<str>>(
        width: u32,
        height: u32,
        channel_names: &[S],
        data: Vec<f32>,
    ) -> Option<Self> {
        let expected = width as usize * height as usize * channel_names.len();
        if data.len() != expected || channel_names.is_empty() {
            return None;
        }
        Some(Self {
            width,
            height,
            channel_names: names(channel_names),
            samples: Samples::Flat(data),
        })
    }

    /// Wrap per-pixel deep samples. Returns `None` if the pixel count is wrong.
    /// The sample length of each pixel is not checked here; flattening does.
    pub fn from_deep<S: AsRef<str>>(
        width: u32,
        height: u32,
        channel_names: &[S],
        pixels: Vec<Vec<f32>>,
    ) -> Option<Self> {
        if pixels.len() != width as usize * height as usize || channel_names.is_empty() {
            return None;
        }
        Some(Self {
            width,
            height,
            channel_names: names(channel_names),
            samples: Samples::Deep(pixels),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn nchannels(&self) -> usize {
        self.channel_names.len()
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channel_names.iter().position(|c| c == name)
    }

    pub fn is_deep(&self) -> bool {
        matches!(self.samples, Samples::Deep(_))
    }

    pub fn flat(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::Flat(data) => Some(data),
            Samples::Deep(_) => None,
        }
    }

    pub fn flat_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.samples {
            Samples::Flat(data) => Some(data),
            Samples::Deep(_) => None,
        }
    }

    pub fn deep(&self) -> Option<&[Vec<f32>]> {
        match &self.samples {
            Samples::Deep(pixels) => Some(pixels),
            Samples::Flat(_) => None,
        }
    }

    /// Samples of the pixel at `(x, y)` in a flat buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[f32]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let n = self.nchannels();
        let start = (y as usize * self.width as usize + x as usize) * n;
        self.flat().map(|data| &data[start..start + n])
    }

    /// Approximate heap footprint, used for the decode cache budget.
    pub fn memory_bytes(&self) -> usize {
        let values = match &self.samples {
            Samples::Flat(data) => data.len(),
            Samples::Deep(pixels) => pixels.iter().map(Vec::len).sum(),
        };
        values * std::mem::size_of::<f32>()
    }
}

fn names<S: AsRef<str>>(channel_names: &[S]) -> Vec<String> {
    channel_names.iter().map(|c| c.as_ref().to_string()).collect()
}
