use thiserror::Error;

/// Pipeline-wide error type.
///
/// Discriminants are grouped by class so a host can map them onto small
/// integer status codes: 1-19 input, 20-39 resource, 40-49 arithmetic,
/// 50-69 storage, 70-89 coder, 100+ logic.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcerError {
    // Input errors
    #[error("JPEG header rejected")]
    JpegHeaderBad = 1,
    #[error("JPEG payload could not be decoded")]
    JpegDecodeFailed = 2,
    #[error("Image dimensions out of range")]
    InvalidDimensions = 3,

    // Resource errors
    #[error("Scratch allocation failed")]
    ScratchAllocFailed = 20,
    #[error("Datastream buffer exhausted")]
    SegmentAllocFailed = 21,
    #[error("Byte quota exceeded")]
    ByteQuotaExceeded = 22,
    #[error("Packet count exceeds maximum")]
    PacketCountExceeded = 23,
    #[error("Too many segments for subband")]
    TooManySegments = 24,

    // Arithmetic errors
    #[error("Multiplicative overflow in offset computation")]
    TransformOverflow = 40,
    #[error("LL mean exceeds 15-bit range")]
    IntegerOverflow = 41,

    // Storage errors
    #[error("Storage open failed")]
    StorageOpenFailed = 50,
    #[error("Storage read returned short")]
    StorageReadShort = 51,
    #[error("Storage write returned short")]
    StorageWriteShort = 52,
    #[error("Storage seek failed")]
    StorageSeekFailed = 53,
    #[error("Output size verification failed")]
    SizeMismatch = 54,
    #[error("Output file missing after emission")]
    OutputMissing = 55,

    // Coder errors
    #[error("Wavelet kernel rejected input")]
    WaveletFailed = 70,
    #[error("Bit-plane coder failed")]
    CoderFailed = 71,
    #[error("No output sink configured for emission")]
    NoOutputSink = 72,

    // Logic errors
    #[error("Invalid operation for current pipeline state")]
    InvalidOperation = 100,
    #[error("Invalid argument")]
    InvalidArgument = 101,
}

impl IcerError {
    /// Negative status code for hosts that speak small integers.
    pub fn code(self) -> i32 {
        -(self as i32)
    }
}
