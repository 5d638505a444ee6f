//! The flash-backed compression pipeline.
//!
//! Every stage streams between storage-resident files through small working
//! buffers; the only data resident in RAM at any time is one scanline, one
//! partition tile and a bounded set of coder structures.
//!
//! - `jpeg_stream`: storage-resident JPEG to storage-resident RGB plane.
//! - `yuv`: RGB plane to three 16-bit channel planes (plus the YUV422 path).
//! - `wavelet`: out-of-core multi-stage 2-D transform.
//! - `convert`: LL-mean subtraction and sign-magnitude conversion.
//! - `partition`: tile-streaming partition coder.
//! - `scheduler`: packet list, priority ordering and segment emission.
//! - `pipeline`: the driver and its temporary-file lifecycle.

pub mod convert;
pub mod jpeg_stream;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod wavelet;
pub mod yuv;

/// Temporary file names used by the pipeline. Process-global constants;
/// concurrent pipelines over one storage namespace would collide and are
/// not supported.
pub mod names {
    pub const TEMP_RGB: &str = "_temp_rgb.tmp";
    pub const Y_CHANNEL: &str = "_y_channel.tmp";
    pub const U_CHANNEL: &str = "_u_channel.tmp";
    pub const V_CHANNEL: &str = "_v_channel.tmp";
    pub const Y_TRANSFORMED: &str = "_y_transformed.tmp";
    pub const U_TRANSFORMED: &str = "_u_transformed.tmp";
    pub const V_TRANSFORMED: &str = "_v_transformed.tmp";
    pub const WAVELET_TEMP: &str = "_wavelet_temp.tmp";
    pub const WAVELET_STAGE_TEMP: &str = "_wavelet_stage_temp.tmp";
    pub const TEMP_CONVERT: &str = "_temp_convert.tmp";
    pub const ICER_RESULT: &str = "_icer_result.tmp";

    /// Every intermediate the pipeline may create (the default output name
    /// is handled separately: it survives success).
    pub const ALL_INTERMEDIATE: [&str; 10] = [
        TEMP_RGB,
        Y_CHANNEL,
        U_CHANNEL,
        V_CHANNEL,
        Y_TRANSFORMED,
        U_TRANSFORMED,
        V_TRANSFORMED,
        WAVELET_TEMP,
        WAVELET_STAGE_TEMP,
        TEMP_CONVERT,
    ];

    /// Intermediates of the YUV-file entry point, which must leave the
    /// caller's channel planes alone.
    pub const CORE_INTERMEDIATE: [&str; 6] = [
        Y_TRANSFORMED,
        U_TRANSFORMED,
        V_TRANSFORMED,
        WAVELET_TEMP,
        WAVELET_STAGE_TEMP,
        TEMP_CONVERT,
    ];
}
