//! Decodes the input's audio track into quantized speaker ticks.
//!
//! The best audio stream is decoded, downmixed to mono and resampled to the
//! tick sample rate. Unless the caller supplies a normalization factor, it
//! is autodetected from the first ~10 MiB of decoded PCM so that only the
//! loudest 5% of samples clip.

use std::io;
use std::path::Path;

extern crate ffmpeg_next as ffmpeg;

use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::software::resampling;
use ffmpeg::{codec, frame, media, ChannelLayout};

use a2v::audio;

/// How much raw PCM feeds the normalization estimate.
const NORM_PROBE_BYTES: usize = 10 * 1024 * 1024;

/// Accumulates resampled samples and quantizes them once the normalization
/// factor is known.
struct TickSink {
    norm: Option<f32>,
    pending: Vec<f32>,
    ticks: Vec<i8>,
}

impl TickSink {
    fn new(norm: Option<f32>) -> Self {
        TickSink {
            norm,
            pending: Vec::new(),
            ticks: Vec::new(),
        }
    }

    fn push(&mut self, samples: &[f32]) {
        match self.norm {
            Some(norm) => {
                self.ticks.extend(
                    samples
                        .iter()
                        .map(|&s| audio::quantize(audio::normalize(s, norm))),
                );
            }
            None => self.pending.extend_from_slice(samples),
        }
    }

    /// Fix the normalization factor and drain everything buffered so far.
    fn freeze(&mut self) {
        let norm = audio::normalization(&self.pending);
        log::info!("autodetected audio normalization factor {:.4}", norm);
        self.norm = Some(norm);
        let pending = std::mem::take(&mut self.pending);
        self.push(&pending);
    }

    fn finish(mut self) -> Vec<i8> {
        if self.norm.is_none() {
            self.freeze();
        }
        self.ticks
    }
}

/// Decode, resample and quantize the whole audio track of `path`.
pub fn read_ticks(path: &Path, normalization: Option<f32>) -> io::Result<Vec<i8>> {
    crate::fflog::ensure_init();

    let mut ictx = ffmpeg::format::input(&path)
        .map_err(|e| io_err(format!("Opening {}: {}", path.display(), e)))?;

    let input = ictx
        .streams()
        .best(media::Type::Audio)
        .ok_or_else(|| io_err("No audio stream".into()))?;
    let stream_index = input.index();

    let ctx = codec::context::Context::from_parameters(input.parameters())
        .map_err(|e| io_err(format!("Decoder context: {}", e)))?;
    let mut decoder = ctx
        .decoder()
        .audio()
        .map_err(|e| io_err(format!("Audio decoder: {}", e)))?;
    // Some containers leave the layout unset; derive it from the channel
    // count so the resampler has a valid input description.
    if decoder.channel_layout().channels() == 0 {
        decoder.set_channel_layout(ChannelLayout::default(i32::from(decoder.channels())));
    }

    let mut resampler = resampling::Context::get(
        decoder.format(),
        decoder.channel_layout(),
        decoder.rate(),
        Sample::F32(SampleType::Packed),
        ChannelLayout::MONO,
        audio::SAMPLE_RATE,
    )
    .map_err(|e| io_err(format!("Resampler: {}", e)))?;

    let mut sink = TickSink::new(normalization);
    let mut decoded = frame::Audio::empty();
    let mut resampled = frame::Audio::empty();
    let mut raw_bytes = 0usize;

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| io_err(format!("Decoding audio: {}", e)))?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            raw_bytes += decoded.samples() * usize::from(decoded.channels()) * 2;
            resampler
                .run(&decoded, &mut resampled)
                .map_err(|e| io_err(format!("Resampling: {}", e)))?;
            push_frame(&mut sink, &resampled);

            if sink.norm.is_none() && raw_bytes >= NORM_PROBE_BYTES {
                sink.freeze();
            }
        }
    }

    // Drain the decoder, then the resampler's internal buffer.
    decoder.send_eof().ok();
    while decoder.receive_frame(&mut decoded).is_ok() {
        resampler
            .run(&decoded, &mut resampled)
            .map_err(|e| io_err(format!("Resampling: {}", e)))?;
        push_frame(&mut sink, &resampled);
    }
    while resampler.delay().is_some() {
        resampler
            .flush(&mut resampled)
            .map_err(|e| io_err(format!("Flushing resampler: {}", e)))?;
        if resampled.samples() == 0 {
            break;
        }
        push_frame(&mut sink, &resampled);
    }

    let ticks = sink.finish();
    if ticks.is_empty() {
        return Err(io_err("Audio stream decoded to zero samples".into()));
    }
    log::info!(
        "decoded {} audio ticks ({:.1}s at {} Hz)",
        ticks.len(),
        ticks.len() as f64 / f64::from(audio::SAMPLE_RATE),
        audio::SAMPLE_RATE
    );
    Ok(ticks)
}

fn push_frame(sink: &mut TickSink, resampled: &frame::Audio) {
    if resampled.samples() == 0 {
        return;
    }
    // Mono packed f32; rescale to the 16-bit range the normalization
    // percentiles are defined over.
    let plane = &resampled.plane::<f32>(0)[..resampled.samples()];
    let mut scaled = Vec::with_capacity(plane.len());
    scaled.extend(plane.iter().map(|&s| s * 32768.0));
    sink.push(&scaled);
}

fn io_err(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}
