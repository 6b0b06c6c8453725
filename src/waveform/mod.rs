pub mod decoder;
pub mod normalizer;
pub mod peaks;
pub mod peaks_manager;

pub use decoder::{
    check_decode_tools_available, DecodeError, DecodeStrategy, ExtremaWaveformDecoder,
    PcmWaveformDecoder, ToolLimits, WaveformDecoder,
};
pub use normalizer::{AudioNormalizer, FfmpegNormalizer, ReencodeError};
pub use peaks::{peaks_from_extrema, peaks_from_samples, PeaksArtifact};
pub use peaks_manager::{PeaksError, PeaksManager};
