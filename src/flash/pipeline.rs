//! Stage I: the pipeline driver.
//!
//! Orchestrates decode, channel separation, wavelet transform, sign-
//! magnitude conversion, partition coding and emission, and owns the
//! temporary-file lifecycle: every intermediate is removed before return on
//! success and on every failure path; the output file survives only a
//! verified success.

use log::{debug, info};

use crate::error::IcerError;
use crate::flash::names;
use crate::flash::{convert, jpeg_stream, partition, scheduler, wavelet, yuv};
use crate::icer::segment::DataStream;
use crate::icer::wavelet::{low_dim, Filter};
use crate::icer::{Channel, Subband, MAX_DECOMP_STAGES};
use crate::scratch::{PoolHint, ScratchAllocator};
use crate::storage::{Mode, Storage};

/// Ceiling for the datastream buffer; emission re-reads every sealed
/// segment from it, so all headers and payloads must fit at once.
const MAX_DATASTREAM_BYTES: usize = 400 * 1024;

/// Pipeline configuration surface.
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Wavelet decomposition stages, 1..=6.
    pub stages: u8,
    /// Lifting filter handed to the 1-D kernel.
    pub filter: Filter,
    /// Requested error-containment segments per subband.
    pub segments: u8,
    /// Target compressed size in bytes; 0 means lossless.
    pub target_size: usize,
    /// Auxiliary scratch pool size in bytes; 0 disables the pool.
    pub aux_pool_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            stages: 4,
            filter: Filter::A,
            segments: 6,
            target_size: 0,
            aux_pool_bytes: 512 * 1024,
        }
    }
}

impl CompressionConfig {
    fn validate(&self) -> Result<(), IcerError> {
        if self.stages == 0 || self.stages as usize > MAX_DECOMP_STAGES || self.segments == 0 {
            return Err(IcerError::InvalidArgument);
        }
        Ok(())
    }
}

/// Outcome of a successful compression run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineResult {
    pub compressed_size: u64,
    pub width: u32,
    pub height: u32,
}

/// Per-image state machine. Transitions are strictly forward, which is what
/// keeps the non-idempotent sign-magnitude pass from running twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PipelineState {
    Init,
    JpegDecoded,
    RgbSplit,
    WaveletDone,
    LlMeanDone,
    SignMagDone,
    PartitionsCoded,
    SegmentsEmitted,
    Verified,
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    debug_assert!(*state < next, "pipeline state must move forward");
    *state = next;
    debug!("pipeline state: {:?}", state);
}

/// Removes the registered intermediates when dropped, so every exit path
/// shares one cleanup.
struct TempCleanup<'a> {
    storage: &'a dyn Storage,
    names: &'a [&'a str],
}

impl Drop for TempCleanup<'_> {
    fn drop(&mut self) {
        for name in self.names {
            self.storage.remove(name);
        }
    }
}

/// Removes `name` on drop unless kept; guards the output file against
/// failure paths.
struct OutputGuard<'a> {
    storage: &'a dyn Storage,
    name: &'a str,
    keep: bool,
}

impl<'a> OutputGuard<'a> {
    fn new(storage: &'a dyn Storage, name: &'a str) -> Self {
        Self {
            storage,
            name,
            keep: false,
        }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for OutputGuard<'_> {
    fn drop(&mut self) {
        if !self.keep {
            self.storage.remove(self.name);
        }
    }
}

/// Compress a storage-resident JPEG file into an ICER bitstream file.
pub fn compress_jpeg_to_icer(
    storage: &dyn Storage,
    config: &CompressionConfig,
    jpeg_name: &str,
    output_name: &str,
) -> Result<PipelineResult, IcerError> {
    config.validate()?;
    let _cleanup = TempCleanup {
        storage,
        names: &names::ALL_INTERMEDIATE,
    };
    let mut state = PipelineState::Init;

    info!("pipeline: decoding {}", jpeg_name);
    let (width, height) = jpeg_stream::decode_jpeg_to_rgb(storage, jpeg_name, names::TEMP_RGB)?;
    advance(&mut state, PipelineState::JpegDecoded);

    yuv::split_rgb_to_yuv(
        storage,
        names::TEMP_RGB,
        names::Y_CHANNEL,
        names::U_CHANNEL,
        names::V_CHANNEL,
        width as usize,
        height as usize,
    )?;
    storage.remove(names::TEMP_RGB);
    advance(&mut state, PipelineState::RgbSplit);

    let compressed_size = run_core(
        storage,
        config,
        [names::Y_CHANNEL, names::U_CHANNEL, names::V_CHANNEL],
        width as usize,
        height as usize,
        output_name,
        false,
        state,
    )?;

    Ok(PipelineResult {
        compressed_size,
        width,
        height,
    })
}

/// Compress three existing channel plane files. With
/// `channels_pre_transformed` the wavelet stage is skipped and the input
/// planes are taken as already transformed; note that the mean-subtraction
/// and sign-magnitude passes still mutate them in place.
pub fn compress_yuv_files_to_icer(
    storage: &dyn Storage,
    config: &CompressionConfig,
    channel_names: [&str; 3],
    width: usize,
    height: usize,
    output_name: &str,
    channels_pre_transformed: bool,
) -> Result<u64, IcerError> {
    config.validate()?;
    let _cleanup = TempCleanup {
        storage,
        names: &names::CORE_INTERMEDIATE,
    };
    run_core(
        storage,
        config,
        channel_names,
        width,
        height,
        output_name,
        channels_pre_transformed,
        PipelineState::RgbSplit,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_core(
    storage: &dyn Storage,
    config: &CompressionConfig,
    channel_names: [&str; 3],
    width: usize,
    height: usize,
    output_name: &str,
    channels_pre_transformed: bool,
    mut state: PipelineState,
) -> Result<u64, IcerError> {
    if width == 0 || height == 0 {
        return Err(IcerError::InvalidDimensions);
    }
    // Plane offsets must stay within the storage device's 32-bit address
    // width; reject before any allocation or I/O.
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(2))
        .filter(|&v| v <= u32::MAX as usize)
        .ok_or(IcerError::TransformOverflow)?;

    let scratch = ScratchAllocator::new(config.aux_pool_bytes);
    let mut output_guard = OutputGuard::new(storage, output_name);

    // Stage E: out-of-core wavelet transform per channel.
    let transformed: [&str; 3] = if channels_pre_transformed {
        debug!("pipeline: channels pre-transformed, skipping wavelet stage");
        channel_names
    } else {
        let targets = [
            names::Y_TRANSFORMED,
            names::U_TRANSFORMED,
            names::V_TRANSFORMED,
        ];
        for (input, target) in channel_names.iter().zip(targets.iter()) {
            info!("pipeline: wavelet transform {}", input);
            wavelet::streaming_wavelet_transform(
                storage,
                &scratch,
                input,
                target,
                width,
                height,
                config.stages,
                config.filter,
            )?;
        }
        targets
    };
    advance(&mut state, PipelineState::WaveletDone);

    // Stage F: LL means, then subtraction and sign-magnitude conversion.
    let ll_w = low_dim(width, config.stages as u32);
    let ll_h = low_dim(height, config.stages as u32);
    let mut ll_means = [0u16; Channel::COUNT];
    for (chan, name) in transformed.iter().enumerate() {
        ll_means[chan] = convert::compute_ll_mean(storage, name, width, ll_w, ll_h)?;
    }
    advance(&mut state, PipelineState::LlMeanDone);

    for (chan, name) in transformed.iter().enumerate() {
        convert::subtract_ll_mean(storage, name, width, ll_w, ll_h, ll_means[chan])?;
        convert::convert_to_sign_magnitude(storage, name, width, height)?;
    }
    advance(&mut state, PipelineState::SignMagDone);

    // Byte quota and datastream sizing.
    let pixel_count = width
        .checked_mul(height)
        .ok_or(IcerError::TransformOverflow)?;
    let byte_quota = if config.target_size == 0 {
        pixel_count
            .checked_mul(6)
            .ok_or(IcerError::TransformOverflow)?
    } else {
        config.target_size
    };
    let buffer_size = byte_quota.min(MAX_DATASTREAM_BYTES);
    debug!(
        "pipeline: byte quota {} (datastream {} bytes)",
        byte_quota, buffer_size
    );

    let ds_buf = scratch.alloc_u8(buffer_size, PoolHint::Auxiliary)?;
    let mut ds = DataStream::new(ds_buf);
    let mut index = scheduler::SegmentIndex::new();

    // Stage H: packet list in priority order; stage G per packet.
    let mut packets =
        scheduler::build_packet_list(config.stages, ll_means, width as u32, height as u32)?;
    scheduler::sort_packets(&mut packets);

    for (it, pkt) in packets.iter().enumerate() {
        let level = pkt.decomp_level as u32;
        let (sub_w, sub_h, offset_samples) = match pkt.subband_type {
            Subband::Ll => (low_dim(width, level), low_dim(height, level), 0),
            Subband::Hl => (
                low_dim(width, level - 1) - low_dim(width, level),
                low_dim(height, level),
                low_dim(width, level),
            ),
            Subband::Lh => (
                low_dim(width, level),
                low_dim(height, level - 1) - low_dim(height, level),
                low_dim(height, level)
                    .checked_mul(width)
                    .ok_or(IcerError::TransformOverflow)?,
            ),
            Subband::Hh => (
                low_dim(width, level - 1) - low_dim(width, level),
                low_dim(height, level - 1) - low_dim(height, level),
                low_dim(height, level)
                    .checked_mul(width)
                    .and_then(|v| v.checked_add(low_dim(width, level)))
                    .ok_or(IcerError::TransformOverflow)?,
            ),
        };
        if sub_w == 0 || sub_h == 0 {
            continue;
        }
        let file_offset = offset_samples
            .checked_mul(2)
            .ok_or(IcerError::TransformOverflow)? as u64;

        let params =
            crate::icer::partition::generate_partition_params(sub_w, sub_h, config.segments)?;
        let chan_name = transformed[pkt.channel as usize];
        let mut chan_file = storage.open(chan_name, Mode::Read)?;
        let res = partition::compress_partition(
            chan_file.as_mut(),
            file_offset,
            &params,
            width,
            pkt,
            &mut ds,
            &scratch,
            &mut |segment, id| index.set(pkt, segment, id),
        );
        chan_file.close();

        match res {
            Ok(()) => {}
            Err(IcerError::ByteQuotaExceeded) => {
                // Already-written segments are final; stop coding and emit.
                info!(
                    "pipeline: byte quota reached after {} of {} packets",
                    it,
                    packets.len()
                );
                break;
            }
            Err(IcerError::SegmentAllocFailed) if ds.size_used() > 0 => {
                info!(
                    "pipeline: datastream full after {} of {} packets",
                    it,
                    packets.len()
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    advance(&mut state, PipelineState::PartitionsCoded);

    // Emission in canonical order, straight through the storage sink.
    storage.remove(output_name);
    let mut output_file = storage.open(output_name, Mode::Write)?;
    let emitted = scheduler::emit_segments(&mut ds, &index, Some(output_file.as_mut()))?;
    output_file.flush();
    output_file.close();
    advance(&mut state, PipelineState::SegmentsEmitted);

    // Verification: the output file must exist at exactly the emitted size.
    let file_size = {
        let mut verify = storage
            .open(output_name, Mode::Read)
            .map_err(|_| IcerError::OutputMissing)?;
        let size = verify.size();
        verify.close();
        size
    };
    if file_size != emitted {
        return Err(IcerError::SizeMismatch);
    }
    advance(&mut state, PipelineState::Verified);

    info!("pipeline: done, {} bytes", emitted);
    output_guard.keep();
    Ok(emitted)
}
