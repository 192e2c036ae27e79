//! Extracts still frames from the input video and hands them to the
//! external converter that produces target display memory.
//!
//! Conversion output is cached per input file, mode and palette, so
//! repeated encodes of the same video skip the (slow) image conversion.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

extern crate ffmpeg_next as ffmpeg;

use ffmpeg::software::scaling;
use ffmpeg::{codec, format, frame, media};

use a2v::frames::{FrameSource, TargetFrame};
use a2v::screen::{MemoryMap, ROWS};
use a2v::{Palette, VideoMode};

/// Decodes video frames and converts them to display memory images via an
/// external `bmp2dhr`-style converter binary.
pub struct FileFrameGrabber {
    ictx: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    frame_rate: f64,
    frame_dir: PathBuf,
    mode: VideoMode,
    converter: String,
    palette_arg: String,
    index: usize,
    flushed: bool,
}

impl FileFrameGrabber {
    pub fn new(
        input_path: &Path,
        mode: VideoMode,
        palette: Palette,
        converter: &str,
    ) -> io::Result<Self> {
        crate::fflog::ensure_init();

        let ictx = format::input(&input_path)
            .map_err(|e| io_err(format!("Opening {}: {}", input_path.display(), e)))?;

        let video = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| io_err("No video stream".into()))?;
        let stream_index = video.index();

        let rate = video.rate();
        if rate.denominator() == 0 || rate.numerator() == 0 {
            return Err(io_err("Input video has no frame rate".into()));
        }
        let frame_rate = f64::from(rate.numerator()) / f64::from(rate.denominator());

        let ctx = codec::context::Context::from_parameters(video.parameters())
            .map_err(|e| io_err(format!("Decoder context: {}", e)))?;
        let decoder = ctx
            .decoder()
            .video()
            .map_err(|e| io_err(format!("Video decoder: {}", e)))?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(io_err("Zero video dimensions".into()));
        }

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            mode.x_res(),
            ROWS as u32,
            scaling::Flags::LANCZOS,
        )
        .map_err(|e| io_err(format!("Scaler: {}", e)))?;

        // Converted frames live next to the input, keyed by mode and
        // palette so different encodes never collide.
        let frame_dir = input_path
            .with_extension("")
            .join(mode.name())
            .join(palette.name());
        std::fs::create_dir_all(&frame_dir)?;

        Ok(FileFrameGrabber {
            ictx,
            decoder,
            scaler,
            stream_index,
            frame_rate,
            frame_dir,
            mode,
            converter: converter.to_string(),
            palette_arg: format!("P{}", palette.id()),
            index: 0,
            flushed: false,
        })
    }

    /// Convert one decoded frame, reusing the cached conversion when it
    /// exists.
    fn convert(&mut self, decoded: &frame::Video) -> io::Result<TargetFrame> {
        let idx = self.index;
        self.index += 1;

        let bin = self.frame_dir.join(format!("{:08}C.BIN", idx));
        let aux_bin = self.frame_dir.join(format!("{:08}C.AUX", idx));
        let cached = bin.exists() && (self.mode == VideoMode::Hgr || aux_bin.exists());

        if !cached {
            let bmp = self.frame_dir.join(format!("{:08}.bmp", idx));
            self.save_bmp(decoded, &bmp)?;

            let mode_arg = match self.mode {
                VideoMode::Hgr => "hgr",
                VideoMode::Dhgr => "dhgr",
            };
            // Buckels dither (D9) matches the distance model's palettes.
            let status = Command::new(&self.converter)
                .arg(&bmp)
                .arg(mode_arg)
                .arg(&self.palette_arg)
                .arg("D9")
                .status()
                .map_err(|e| io_err(format!("Running {}: {}", self.converter, e)))?;
            if !status.success() {
                return Err(io_err(format!(
                    "{} failed on {} ({})",
                    self.converter,
                    bmp.display(),
                    status
                )));
            }
            if let Err(e) = std::fs::remove_file(&bmp) {
                log::warn!("Could not delete {}: {}", bmp.display(), e);
            }
        }

        let main = read_memory_image(&bin)?;
        let aux = match self.mode {
            VideoMode::Hgr => None,
            VideoMode::Dhgr => Some(read_memory_image(&aux_bin)?),
        };
        Ok(TargetFrame::new(self.mode, main, aux))
    }

    /// Write the scaled RGB frame as a BMP for the converter.
    fn save_bmp(&mut self, decoded: &frame::Video, bmp: &Path) -> io::Result<()> {
        let mut rgb = frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| io_err(format!("Scaling: {}", e)))?;

        let (w, h) = (self.mode.x_res(), ROWS as u32);
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h as usize {
            let row = &data[y * stride..y * stride + (w * 3) as usize];
            pixels.extend_from_slice(row);
        }

        let img = image::RgbImage::from_raw(w, h, pixels)
            .ok_or_else(|| io_err("Frame buffer size mismatch".into()))?;
        img.save(bmp)
            .map_err(|e| io_err(format!("Writing {}: {}", bmp.display(), e)))
    }
}

impl FrameSource for FileFrameGrabber {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn next_frame(&mut self) -> io::Result<Option<TargetFrame>> {
        loop {
            let mut decoded = frame::Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }

            // Feed the next packet of our stream, or flush at end of input.
            let mut fed = false;
            for (stream, packet) in self.ictx.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                if let Err(e) = self.decoder.send_packet(&packet) {
                    log::warn!("Dropping undecodable packet: {}", e);
                }
                fed = true;
                break;
            }
            if !fed {
                self.decoder.send_eof().ok();
                self.flushed = true;
            }
        }
    }
}

/// Load one 8 KiB display-memory image produced by the converter.
fn read_memory_image(path: &Path) -> io::Result<MemoryMap> {
    let data = std::fs::read(path)
        .map_err(|e| io_err(format!("Reading converted frame {}: {}", path.display(), e)))?;
    if data.len() < 8192 {
        return Err(io_err(format!(
            "Converted frame {} is {} bytes, expected 8192",
            path.display(),
            data.len()
        )));
    }
    Ok(MemoryMap::from_flat(1, &data[..8192]))
}

fn io_err(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}
